//! HTTP surface

pub mod admin;
pub mod client_ip;
pub mod feeds;
pub mod oauth;
mod router;
mod server;

pub use admin::AdminPrincipal;
pub use client_ip::ClientIp;
pub use router::{AppState, Limiters, create_router};
pub use server::Warden;
