//! Recovery code generation and verification helpers.
//!
//! Recovery codes are intended for one-time account recovery when the
//! authenticator is unavailable. Each code carries 16 bytes of randomness,
//! displayed as 32 hex characters, and only Argon2id hashes are stored.

use anyhow::{anyhow, Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::{rngs::OsRng, RngCore};

pub(crate) const RECOVERY_CODE_COUNT: usize = 10;
const RECOVERY_CODE_BYTES: usize = 16;

/// A freshly generated recovery-code batch (plaintext + hashes).
#[derive(Debug)]
pub(crate) struct RecoveryCodeBatch {
    pub(crate) codes: Vec<String>,
    pub(crate) code_hashes: Vec<String>,
}

impl RecoveryCodeBatch {
    /// Generate a full batch. The plaintext codes leave the server exactly
    /// once, in the enrollment response.
    pub(crate) fn generate() -> Result<Self> {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_code()?;
            let hash = hash_recovery_code(&code)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Verify a recovery code against a stored hash.
// TODO: wire this to a redemption endpoint that marks the code consumed.
#[allow(dead_code)]
pub(crate) fn verify_recovery_code(code: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(code.trim().to_lowercase().as_bytes(), &parsed)
        .is_ok()
}

fn generate_code() -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_BYTES];
    OsRng
        .try_fill_bytes(&mut raw)
        .context("failed to generate recovery code")?;
    let mut code = String::with_capacity(RECOVERY_CODE_BYTES * 2);
    for byte in raw {
        code.push_str(&format!("{byte:02x}"));
    }
    Ok(code)
}

fn hash_recovery_code(code: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(code.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash recovery code"))?
        .to_string();
    Ok(hash)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn batch_has_ten_distinct_hex_codes() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        assert_eq!(batch.codes.len(), RECOVERY_CODE_COUNT);
        assert_eq!(batch.code_hashes.len(), RECOVERY_CODE_COUNT);

        let unique: HashSet<&String> = batch.codes.iter().collect();
        assert_eq!(unique.len(), RECOVERY_CODE_COUNT);

        for code in &batch.codes {
            assert_eq!(code.len(), RECOVERY_CODE_BYTES * 2);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn successive_batches_are_disjoint() {
        let first = RecoveryCodeBatch::generate().unwrap();
        let second = RecoveryCodeBatch::generate().unwrap();
        let first_set: HashSet<&String> = first.codes.iter().collect();
        assert!(second.codes.iter().all(|code| !first_set.contains(code)));
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        let code = batch.codes.first().unwrap();
        let hash = batch.code_hashes.first().unwrap();
        assert!(verify_recovery_code(code, hash));
        assert!(!verify_recovery_code("0000000000000000", hash));
    }

    #[test]
    fn verify_tolerates_whitespace_and_case() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        let code = batch.codes.first().unwrap();
        let hash = batch.code_hashes.first().unwrap();
        assert!(verify_recovery_code(&format!(" {} ", code.to_uppercase()), hash));
    }

    #[test]
    fn plaintext_never_equals_stored_hash() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        for (code, hash) in batch.codes.iter().zip(&batch.code_hashes) {
            assert_ne!(code, hash);
            assert!(hash.starts_with("$argon2"));
        }
    }
}
