//! Credential authentication: signup, login, profile, logout, plus the
//! session machinery shared with the 2FA and OAuth endpoints.

pub mod login;
pub mod me;
pub mod session;
pub(crate) mod session_state;
pub mod signup;
pub mod state;
pub(crate) mod storage;
pub mod types;
pub(crate) mod utils;
