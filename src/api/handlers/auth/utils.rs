//! Small helpers for auth validation and session token handling.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Server-side password policy: at least 8 characters with one uppercase
/// letter, one lowercase letter, one digit, and one non-alphanumeric
/// character.
pub(super) fn valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_alphanumeric())
}

/// Split a provider display name into first/last on the first space.
/// A single-word name yields no last name.
pub(crate) fn split_display_name(name: &str) -> (String, Option<String>) {
    let trimmed = name.trim();
    match trimmed.split_once(' ') {
        Some((first, rest)) => (first.to_string(), Some(rest.trim().to_string())),
        None => (trimmed.to_string(), None),
    }
}

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the database stores a hash.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Random `state` value for the OAuth round trip.
pub(crate) fn generate_state_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate state token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session token, keyed with the configured session secret, so raw
/// values never touch the database. The hash is used for lookups when the
/// cookie is presented.
pub(crate) fn hash_session_token(secret: &str, token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_password_accepts_all_classes() {
        assert!(valid_password("Abcdef1!"));
        assert!(valid_password("longer Passw0rd with spaces!"));
    }

    #[test]
    fn valid_password_rejects_missing_classes() {
        assert!(!valid_password("abc12345"));
        assert!(!valid_password("Abc1!"));
        assert!(!valid_password("ABCDEF1!"));
        assert!(!valid_password("Abcdefg!"));
        assert!(!valid_password("Abcdefg1"));
    }

    #[test]
    fn split_display_name_on_first_space() {
        assert_eq!(
            split_display_name("Ada Lovelace"),
            ("Ada".to_string(), Some("Lovelace".to_string()))
        );
        assert_eq!(
            split_display_name("Ada King Lovelace"),
            ("Ada".to_string(), Some("King Lovelace".to_string()))
        );
        assert_eq!(split_display_name("Ada"), ("Ada".to_string(), None));
    }

    #[test]
    fn generate_session_token_round_trip() {
        let decoded_len = generate_session_token()
            .ok()
            .and_then(|token| Base64UrlUnpadded::decode_vec(&token).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_session_token_stable_and_keyed() {
        let first = hash_session_token("secret", "token");
        let second = hash_session_token("secret", "token");
        let other_token = hash_session_token("secret", "other");
        let other_key = hash_session_token("another", "token");
        assert_eq!(first, second);
        assert_ne!(first, other_token);
        assert_ne!(first, other_key);
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
