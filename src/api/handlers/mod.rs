//! API handlers for the authentication service.
//!
//! `auth` carries the credential endpoints and the session machinery the
//! other modules build on; `twofa` and `oauth` add the second factor and the
//! Google login flow.

pub mod auth;
pub mod health;
pub mod oauth;
pub mod twofa;
