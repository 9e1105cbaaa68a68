//! Shared auth state and configuration.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

use crate::{crypto::EncryptionKey, totp::TotpEngine, APP_USER_AGENT};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_ISSUER: &str = "Signet";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_secret: SecretString,
    session_ttl_seconds: i64,
    production: bool,
    issuer: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, session_secret: SecretString) -> Self {
        Self {
            frontend_base_url,
            session_secret,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            production: false,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn session_secret(&self) -> &str {
        self.session_secret.expose_secret()
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    // Cookies only carry Secure in production; local development runs over
    // plain HTTP.
    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.production
    }
}

/// Google OAuth client settings. Absent entirely when the deployment does
/// not configure the provider.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    client_id: String,
    client_secret: SecretString,
    callback_url: String,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString, callback_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            callback_url,
        }
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }

    pub(crate) fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

pub struct AuthState {
    config: AuthConfig,
    encryption_key: EncryptionKey,
    totp: TotpEngine,
    oauth: Option<OAuthConfig>,
    http: reqwest::Client,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the outbound HTTP client cannot be constructed.
    pub fn new(
        config: AuthConfig,
        encryption_key: EncryptionKey,
        oauth: Option<OAuthConfig>,
    ) -> Result<Self> {
        let totp = TotpEngine::new(config.issuer().to_string());
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            encryption_key,
            totp,
            oauth,
            http,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }

    #[must_use]
    pub fn totp(&self) -> &TotpEngine {
        &self.totp
    }

    pub(crate) fn oauth(&self) -> Option<&OAuthConfig> {
        self.oauth.as_ref()
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use base64ct::{Base64, Encoding};

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_base64(&Base64::encode_string(&[1u8; 32])).unwrap()
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from("sekret".to_string()),
        );

        assert_eq!(config.frontend_base_url(), "http://localhost:5173");
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(config.issuer(), DEFAULT_ISSUER);
        assert!(!config.session_cookie_secure());

        let config = config
            .with_session_ttl_seconds(3600)
            .with_production(true)
            .with_issuer("Acme".to_string());

        assert_eq!(config.session_ttl_seconds(), 3600);
        assert_eq!(config.issuer(), "Acme");
        assert!(config.session_cookie_secure());
    }

    #[test]
    fn oauth_config_exposes_fields() {
        let oauth = OAuthConfig::new(
            "client-id".to_string(),
            SecretString::from("client-secret".to_string()),
            "http://localhost:3000/auth/google/callback".to_string(),
        );
        assert_eq!(oauth.client_id(), "client-id");
        assert_eq!(oauth.client_secret(), "client-secret");
        assert_eq!(
            oauth.callback_url(),
            "http://localhost:3000/auth/google/callback"
        );
    }

    #[test]
    fn auth_state_constructs_without_oauth() {
        let config = AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from("sekret".to_string()),
        );
        let state = AuthState::new(config, test_key(), None).unwrap();
        assert!(state.oauth().is_none());
        assert_eq!(state.config().issuer(), DEFAULT_ISSUER);
    }
}
