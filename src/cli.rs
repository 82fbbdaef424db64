//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Access control for a personal media server: feed tokens, OAuth client
/// credentials with JWKS, and abuse-resistant rate limiting
#[derive(Parser, Debug)]
#[command(name = "feed-warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FEED_WARDEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FEED_WARDEN_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "FEED_WARDEN_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FEED_WARDEN_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FEED_WARDEN_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Print the JWKS document for the configured signing key.
    ///
    /// Generates and persists the key if `oauth.key_path` points to a
    /// missing file.
    Jwks {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::parse_from(["feed-warden"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_overrides_and_subcommand() {
        let cli = Cli::parse_from([
            "feed-warden",
            "--port",
            "8080",
            "--host",
            "0.0.0.0",
            "jwks",
            "--pretty",
            "--config",
            "warden.yaml",
        ]);
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.config, Some(PathBuf::from("warden.yaml")));
        assert!(matches!(cli.command, Some(Command::Jwks { pretty: true })));
    }
}
