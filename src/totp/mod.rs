//! TOTP provisioning and verification.
//!
//! RFC 6238 with SHA-1, 6 digits, and a 30 second step. Verification accepts
//! a skew of two steps either side of the current one, so a code stays valid
//! for roughly a minute around its window.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 2;
const STEP_SECONDS: u64 = 30;

/// A freshly generated secret plus its provisioning URL.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub secret_base32: String,
    pub otpauth_url: String,
}

/// Stateless TOTP operations, labeled with the configured issuer.
#[derive(Clone)]
pub struct TotpEngine {
    issuer: String,
}

impl TotpEngine {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    fn instance(&self, secret_base32: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid TOTP secret: {e:?}"))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Generate a fresh 160-bit secret for `account`.
    ///
    /// # Errors
    /// Returns an error if secret generation or URL construction fails.
    pub fn provision(&self, account: &str) -> Result<Provisioned> {
        let secret = Secret::generate_secret();
        let secret_base32 = secret.to_encoded().to_string();
        let otpauth_url = self.provisioning_url(&secret_base32, account)?;
        Ok(Provisioned {
            secret_base32,
            otpauth_url,
        })
    }

    /// Re-derive the otpauth URL for an existing secret.
    ///
    /// # Errors
    /// Returns an error if the secret is not valid base32.
    pub fn provisioning_url(&self, secret_base32: &str, account: &str) -> Result<String> {
        Ok(self.instance(secret_base32, account)?.get_url())
    }

    /// Render the provisioning URL as a PNG QR code data URL.
    ///
    /// # Errors
    /// Returns an error if the secret is invalid or QR rendering fails.
    pub fn qr_data_url(&self, secret_base32: &str, account: &str) -> Result<String> {
        let totp = self.instance(secret_base32, account)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR gen error: {e}"))?;
        Ok(format!("data:image/png;base64,{qr}"))
    }

    /// Check a code against the current clock. Any failure (bad secret,
    /// clock error) counts as an invalid code.
    #[must_use]
    pub fn verify(&self, secret_base32: &str, code: &str) -> bool {
        let Ok(totp) = self.instance(secret_base32, code_account()) else {
            return false;
        };
        totp.check_current(code).unwrap_or(false)
    }

    /// Check a code at a fixed Unix timestamp. Used by tests to pin the
    /// window boundaries.
    #[must_use]
    pub fn verify_at(&self, secret_base32: &str, code: &str, timestamp: u64) -> bool {
        let Ok(totp) = self.instance(secret_base32, code_account()) else {
            return false;
        };
        totp.check(code, timestamp)
    }
}

// The account label has no effect on code verification.
fn code_account() -> &'static str {
    "user"
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn engine() -> TotpEngine {
        TotpEngine::new("Signet".to_string())
    }

    fn code_at(secret: &str, timestamp: u64) -> String {
        engine()
            .instance(secret, code_account())
            .unwrap()
            .generate(timestamp)
    }

    #[test]
    fn provision_yields_base32_secret_and_labeled_url() {
        let provisioned = engine().provision("user@example.com").unwrap();
        assert!(!provisioned.secret_base32.is_empty());
        assert!(provisioned.otpauth_url.starts_with("otpauth://totp/"));
        assert!(provisioned.otpauth_url.contains("issuer=Signet"));
        assert!(provisioned.otpauth_url.contains("user%40example.com"));
    }

    #[test]
    fn provision_yields_distinct_secrets() {
        let first = engine().provision("a@example.com").unwrap();
        let second = engine().provision("a@example.com").unwrap();
        assert_ne!(first.secret_base32, second.secret_base32);
    }

    #[test]
    fn qr_data_url_has_png_prefix() {
        let provisioned = engine().provision("user@example.com").unwrap();
        let qr = engine()
            .qr_data_url(&provisioned.secret_base32, "user@example.com")
            .unwrap();
        assert!(qr.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn code_valid_within_two_steps() {
        let secret = engine().provision("u@example.com").unwrap().secret_base32;
        let now = 1_700_000_010;
        let code = code_at(&secret, now);

        assert!(engine().verify_at(&secret, &code, now));
        assert!(engine().verify_at(&secret, &code, now + STEP_SECONDS));
        assert!(engine().verify_at(&secret, &code, now + 2 * STEP_SECONDS));
        assert!(engine().verify_at(&secret, &code, now.saturating_sub(2 * STEP_SECONDS)));
    }

    #[test]
    fn code_invalid_outside_two_steps() {
        let secret = engine().provision("u@example.com").unwrap().secret_base32;
        // Mid-step timestamp so the offsets stay inside their own windows.
        let now = 1_700_000_015;
        let code = code_at(&secret, now);

        assert!(!engine().verify_at(&secret, &code, now + 3 * STEP_SECONDS));
        assert!(!engine().verify_at(&secret, &code, now - 3 * STEP_SECONDS));
    }

    #[test]
    fn wrong_code_rejected() {
        let secret = engine().provision("u@example.com").unwrap().secret_base32;
        let now = 1_700_000_010;
        let code = code_at(&secret, now);
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert!(!engine().verify_at(&secret, wrong, now));
    }

    #[test]
    fn invalid_secret_never_verifies() {
        assert!(!engine().verify("not base32 at all!!", "123456"));
    }

    #[test]
    fn url_rederivation_matches_provisioned_url() {
        let provisioned = engine().provision("user@example.com").unwrap();
        let rederived = engine()
            .provisioning_url(&provisioned.secret_base32, "user@example.com")
            .unwrap();
        assert_eq!(provisioned.otpauth_url, rederived);
    }
}
