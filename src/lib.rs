pub mod api;
pub mod cli;
pub mod crypto;
pub mod totp;

/// User agent for outbound HTTP requests, "name/version"
pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
