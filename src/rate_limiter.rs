//! Per-identity rate limiting with escalating failure penalties
//!
//! Each identity (caller IP, client id, ...) gets a sliding window of its
//! allowed requests. Once `max_requests` fall inside the window, further
//! requests are denied until the oldest one ages out. Denied requests are
//! not counted, so a caller that backs off recovers after one window.
//!
//! [`RateLimiter::penalize`] is called after a failed attempt (unknown feed
//! token, bad client secret, bad admin credential). Every strike adds a
//! lockout of `penalty_base * 2^(strikes - 1)`, capped at `penalty_max`, on
//! top of whatever the window already imposes. Strikes are forgotten after
//! `window + penalty_max` without a new failure.
//!
//! Check-and-record runs under the identity's `DashMap` shard lock, so two
//! concurrent requests can never both slip past a just-reached threshold.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::{Error, Result};

/// Run a stale-entry purge every this many checks
const PURGE_EVERY: u64 = 1024;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allowed,
    /// The request must be rejected
    Denied {
        /// Time until a request from this identity can succeed again
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Convert a denial into [`Error::RateLimited`]
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied { retry_after } => Err(Error::RateLimited { retry_after }),
        }
    }
}

/// Sliding-window state of one identity
#[derive(Debug)]
struct Bucket {
    /// Allowed requests inside the current window, oldest first
    hits: VecDeque<Instant>,
    strikes: u32,
    locked_until: Option<Instant>,
    last_failure: Option<Instant>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            hits: VecDeque::new(),
            strikes: 0,
            locked_until: None,
            last_failure: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if oldest + window <= now {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn forget_old_strikes(&mut self, now: Instant, memory: Duration) {
        if let Some(last) = self.last_failure {
            if last + memory <= now {
                self.strikes = 0;
                self.last_failure = None;
            }
        }
    }

    /// When the window will next have room, if it is currently full
    fn window_release(&self, max_requests: usize, window: Duration) -> Option<Instant> {
        if self.hits.len() >= max_requests {
            // The request that must age out is the one `max_requests` back
            let idx = self.hits.len() - max_requests;
            self.hits.get(idx).map(|t| *t + window)
        } else {
            None
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.hits.is_empty()
            && self.strikes == 0
            && self.locked_until.is_none_or(|t| t <= now)
    }
}

/// Per-identity rate limiter
pub struct RateLimiter {
    /// Surface name for logs (`feeds`, `oauth`, `admin`)
    name: String,
    enabled: AtomicBool,
    max_requests: usize,
    window: Duration,
    penalty_base: Duration,
    penalty_max: Duration,
    buckets: DashMap<String, Bucket>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(config.enabled),
            max_requests: config.max_requests.max(1) as usize,
            window: config.window,
            penalty_base: config.penalty_base,
            penalty_max: config.penalty_max.max(config.penalty_base),
            buckets: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Count a request from `identity` if it is within budget
    pub fn check(&self, identity: &str) -> Decision {
        if !self.enabled.load(Ordering::Relaxed) {
            return Decision::Allowed;
        }

        // Purge before taking the entry lock: retain() locks every shard
        if self.checks.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_stale();
        }

        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(Bucket::new);

        bucket.prune(now, self.window);
        bucket.forget_old_strikes(now, self.strike_memory());

        let lockout_end = bucket.locked_until.filter(|t| *t > now);
        let window_end = bucket.window_release(self.max_requests, self.window);

        match lockout_end.into_iter().chain(window_end).max() {
            Some(until) => {
                let retry_after = until.saturating_duration_since(now);
                debug!(
                    limiter = %self.name,
                    identity = %identity,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit denied"
                );
                Decision::Denied { retry_after }
            }
            None => {
                bucket.hits.push_back(now);
                Decision::Allowed
            }
        }
    }

    /// Record a failed attempt from `identity`.
    ///
    /// Returns the lockout added by this strike.
    pub fn penalize(&self, identity: &str) -> Duration {
        if !self.enabled.load(Ordering::Relaxed) {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(Bucket::new);

        bucket.prune(now, self.window);
        bucket.forget_old_strikes(now, self.strike_memory());
        bucket.strikes = bucket.strikes.saturating_add(1);
        bucket.last_failure = Some(now);

        let penalty = self.penalty_for(bucket.strikes);

        // The penalty starts where the caller would otherwise have been free
        let mut start = now;
        if let Some(locked) = bucket.locked_until {
            start = start.max(locked);
        }
        if let Some(release) = bucket.window_release(self.max_requests, self.window) {
            start = start.max(release);
        }
        bucket.locked_until = Some(start + penalty);

        debug!(
            limiter = %self.name,
            identity = %identity,
            strikes = bucket.strikes,
            penalty_ms = penalty.as_millis() as u64,
            "Rate limit penalty applied"
        );
        penalty
    }

    /// Clear all state (test isolation)
    pub fn reset(&self) {
        self.buckets.clear();
        self.checks.store(0, Ordering::Relaxed);
    }

    /// Drop identities with no requests in the window, no lockout and no
    /// remembered strikes. Returns how many were removed.
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let memory = self.strike_memory();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.prune(now, window);
            bucket.forget_old_strikes(now, memory);
            !bucket.is_idle(now)
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Number of identities currently tracked
    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }

    /// Enable or disable rate limiting
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Surface name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn strike_memory(&self) -> Duration {
        self.window + self.penalty_max
    }

    fn penalty_for(&self, strikes: u32) -> Duration {
        let exponent = strikes.saturating_sub(1).min(31);
        self.penalty_base
            .checked_mul(1u32 << exponent)
            .map_or(self.penalty_max, |p| p.min(self.penalty_max))
    }
}

/// Spawn a background task that purges idle identities every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = limiter.purge_stale();
                    if purged > 0 {
                        debug!(limiter = %limiter.name(), count = purged, "Purged idle rate-limit entries");
                    }
                }
                _ = shutdown.recv() => {
                    debug!(limiter = %limiter.name(), "Rate-limit sweeper shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            &RateLimitConfig {
                enabled: true,
                max_requests,
                window: Duration::from_secs(window_secs),
                penalty_base: Duration::from_secs(2),
                penalty_max: Duration::from_secs(60),
                sweep_interval: Duration::from_secs(60),
            },
        )
    }

    fn retry_after(decision: Decision) -> Duration {
        match decision {
            Decision::Denied { retry_after } => retry_after,
            Decision::Allowed => panic!("expected denial"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn denies_request_over_threshold() {
        // GIVEN: a limiter allowing 3 requests per 10s
        let rl = limiter(3, 10);

        // WHEN: 4 requests arrive at once
        for _ in 0..3 {
            assert!(rl.check("ip:1").is_allowed());
        }
        let fourth = rl.check("ip:1");

        // THEN: the 4th is denied until the window rolls over
        assert_eq!(retry_after(fourth), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn allows_again_after_window() {
        let rl = limiter(2, 10);
        assert!(rl.check("ip:1").is_allowed());
        assert!(rl.check("ip:1").is_allowed());
        assert!(!rl.check("ip:1").is_allowed());

        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(rl.check("ip:1").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_per_request() {
        let rl = limiter(2, 10);
        assert!(rl.check("ip:1").is_allowed());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(rl.check("ip:1").is_allowed());

        // Oldest request leaves the window 4s from now
        assert_eq!(retry_after(rl.check("ip:1")), Duration::from_secs(4));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(rl.check("ip:1").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn identities_are_independent() {
        let rl = limiter(1, 10);
        assert!(rl.check("ip:1").is_allowed());
        assert!(!rl.check("ip:1").is_allowed());
        assert!(rl.check("ip:2").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_locks_out_below_threshold() {
        let rl = limiter(5, 10);
        assert!(rl.check("ip:1").is_allowed());

        rl.penalize("ip:1");

        assert_eq!(retry_after(rl.check("ip:1")), Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(rl.check("ip:1").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_strictly_extends_lockout() {
        // GIVEN: two identities with identical, saturating request history
        let rl = limiter(2, 10);
        for id in ["clean", "bad"] {
            assert!(rl.check(id).is_allowed());
            assert!(rl.check(id).is_allowed());
        }

        // WHEN: only one of them is penalized
        rl.penalize("bad");

        // THEN: the penalized identity waits strictly longer
        let clean = retry_after(rl.check("clean"));
        let bad = retry_after(rl.check("bad"));
        assert!(bad > clean, "penalized {bad:?} should exceed {clean:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn penalties_escalate_and_cap() {
        let rl = limiter(100, 10);
        assert_eq!(rl.penalize("ip:1"), Duration::from_secs(2));
        assert_eq!(rl.penalize("ip:1"), Duration::from_secs(4));
        assert_eq!(rl.penalize("ip:1"), Duration::from_secs(8));
        for _ in 0..10 {
            rl.penalize("ip:1");
        }
        assert_eq!(rl.penalize("ip:1"), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_penalties_accumulate() {
        let rl = limiter(100, 10);
        rl.penalize("ip:1");
        rl.penalize("ip:1");
        // 2s + 4s stacked
        assert_eq!(retry_after(rl.check("ip:1")), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn strikes_are_forgotten_after_quiet_period() {
        let rl = limiter(100, 10);
        rl.penalize("ip:1");
        rl.penalize("ip:1");

        // window (10s) + penalty_max (60s) without failures
        tokio::time::advance(Duration::from_secs(71)).await;

        assert_eq!(rl.penalize("ip:1"), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_denied_identity() {
        let rl = limiter(1, 60);
        assert!(rl.check("ip:1").is_allowed());
        rl.penalize("ip:1");
        assert!(!rl.check("ip:1").is_allowed());

        rl.reset();

        assert!(rl.check("ip:1").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_idle_identities() {
        let rl = limiter(5, 10);
        rl.check("idle");
        rl.check("active");
        rl.penalize("striking");

        tokio::time::advance(Duration::from_secs(11)).await;
        rl.check("active");

        let purged = rl.purge_stale();

        // "idle" aged out; "active" has a fresh hit; "striking" still remembered
        assert_eq!(purged, 1);
        assert_eq!(rl.tracked_identities(), 2);
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let rl = limiter(1, 60);
        rl.set_enabled(false);
        for _ in 0..10 {
            assert!(rl.check("ip:1").is_allowed());
        }
        assert_eq!(rl.penalize("ip:1"), Duration::ZERO);
    }

    #[tokio::test]
    async fn concurrent_checks_never_exceed_threshold() {
        let rl = Arc::new(limiter(50, 3600));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                tokio::spawn(async move {
                    (0..25).filter(|_| rl.check("shared").is_allowed()).count()
                })
            })
            .collect();

        let mut allowed = 0;
        for h in handles {
            allowed += h.await.unwrap();
        }
        assert_eq!(allowed, 50);
    }

    #[test]
    fn decision_into_result() {
        assert!(Decision::Allowed.into_result().is_ok());
        let err = Decision::Denied {
            retry_after: Duration::from_secs(3),
        }
        .into_result()
        .unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }
}
