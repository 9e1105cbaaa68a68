//! Password hashing and at-rest encryption for sensitive fields.
//!
//! Passwords are hashed with Argon2id. Sensitive columns (phone numbers,
//! TOTP secrets) are sealed with AES-256-GCM under a single process-wide key
//! loaded from configuration at startup.
//!
//! Ciphertext envelope: `v1.<b64 nonce>.<b64 tag>.<b64 ciphertext>`. Two
//! legacy forms stay readable: an untagged colon-delimited triple, and bare
//! plaintext (no delimiter at all), which is returned unchanged. The
//! plaintext path is a permanent compatibility rule for rows that predate
//! encryption, not a transitional shim.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use std::fmt;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ENVELOPE_VERSION: &str = "v1";

/// Process-wide 256-bit encryption key, decoded once at startup.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Decode a base64-encoded key. The decoded value must be exactly 32
    /// bytes; anything else is a fatal configuration error.
    ///
    /// # Errors
    /// Returns an error if the value is not valid base64 or has the wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Base64::decode_vec(encoded.trim())
            .map_err(|_| anyhow!("encryption key must be base64-encoded"))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| anyhow!("encryption key must decode to exactly {KEY_LEN} bytes"))?;
        Ok(Self(key))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(redacted)")
    }
}

/// Hash a password with Argon2id and a fresh random salt.
///
/// Callers run this through `spawn_blocking`; the work is CPU-bound.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored hash.
///
/// Returns `false` (never errors) for a missing, empty, or unparsable hash,
/// so OAuth-only accounts fail credential login uniformly.
#[must_use]
pub fn verify_password(password: &str, hash: Option<&str>) -> bool {
    let Some(hash) = hash.filter(|hash| !hash.is_empty()) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Encrypt a sensitive value into the versioned envelope.
///
/// Every call draws a fresh random nonce, so equal plaintexts produce
/// different ciphertexts.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &str) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the 16-byte tag to the ciphertext.
    let sealed = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("encryption failure: {e}"))?;
    if sealed.len() < TAG_LEN {
        return Err(anyhow!("encryption produced a short ciphertext"));
    }
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    Ok([
        ENVELOPE_VERSION,
        &Base64::encode_string(&nonce_bytes),
        &Base64::encode_string(tag),
        &Base64::encode_string(ciphertext),
    ]
    .join("."))
}

/// Decrypt an envelope produced by [`encrypt`], or one of the legacy forms.
///
/// A value containing neither `.` nor `:` is legacy plaintext and is
/// returned unchanged without touching the cipher.
///
/// # Errors
/// Returns an error if the envelope is malformed, a component has the wrong
/// length, or the authentication tag does not verify. Tampered input never
/// yields plaintext.
pub fn decrypt(key: &EncryptionKey, blob: &str) -> Result<String> {
    if !blob.contains('.') && !blob.contains(':') {
        return Ok(blob.to_string());
    }

    let parts: Vec<&str> = if blob.contains('.') {
        blob.split('.').collect()
    } else {
        blob.split(':').collect()
    };

    let (nonce_b64, tag_b64, ciphertext_b64) = match parts.as_slice() {
        [ENVELOPE_VERSION, nonce, tag, ciphertext] => (*nonce, *tag, *ciphertext),
        // Legacy untagged triple: nonce:tag:ciphertext.
        [nonce, tag, ciphertext] => (*nonce, *tag, *ciphertext),
        _ => return Err(anyhow!("invalid ciphertext envelope")),
    };

    let nonce_bytes =
        Base64::decode_vec(nonce_b64).map_err(|_| anyhow!("invalid envelope nonce"))?;
    let tag = Base64::decode_vec(tag_b64).map_err(|_| anyhow!("invalid envelope tag"))?;
    let ciphertext =
        Base64::decode_vec(ciphertext_b64).map_err(|_| anyhow!("invalid envelope ciphertext"))?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(anyhow!("invalid envelope nonce length"));
    }
    if tag.len() != TAG_LEN {
        return Err(anyhow!("invalid envelope tag length"));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(nonce, sealed.as_slice())
        .map_err(|e| anyhow!("decryption failure: {e}"))?;

    String::from_utf8(plaintext).context("decrypted value is not valid UTF-8")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey([7u8; KEY_LEN])
    }

    #[test]
    fn from_base64_accepts_32_byte_key() {
        let encoded = Base64::encode_string(&[42u8; KEY_LEN]);
        assert!(EncryptionKey::from_base64(&encoded).is_ok());
    }

    #[test]
    fn from_base64_rejects_wrong_length() {
        let encoded = Base64::encode_string(&[42u8; 16]);
        assert!(EncryptionKey::from_base64(&encoded).is_err());
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(EncryptionKey::from_base64("not base64!!!").is_err());
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = test_key();
        let blob = encrypt(&key, "+1 555 0100").unwrap();
        assert!(blob.starts_with("v1."));
        assert_eq!(decrypt(&key, &blob).unwrap(), "+1 555 0100");
    }

    #[test]
    fn encrypting_twice_yields_distinct_ciphertexts() {
        let key = test_key();
        let first = encrypt(&key, "same plaintext").unwrap();
        let second = encrypt(&key, "same plaintext").unwrap();
        assert_ne!(first, second);
        assert_eq!(decrypt(&key, &first).unwrap(), "same plaintext");
        assert_eq!(decrypt(&key, &second).unwrap(), "same plaintext");
    }

    #[test]
    fn legacy_plaintext_returned_unchanged() {
        let key = test_key();
        assert_eq!(decrypt(&key, "rawphone123").unwrap(), "rawphone123");
    }

    #[test]
    fn legacy_colon_form_decrypts() {
        let key = test_key();
        let blob = encrypt(&key, "legacy secret").unwrap();
        let legacy = blob
            .strip_prefix("v1.")
            .map(|rest| rest.replace('.', ":"))
            .unwrap();
        assert_eq!(decrypt(&key, &legacy).unwrap(), "legacy secret");
    }

    #[test]
    fn tampered_tag_fails() {
        let key = test_key();
        let blob = encrypt(&key, "sensitive").unwrap();
        let parts: Vec<&str> = blob.split('.').collect();
        let mut tag = Base64::decode_vec(parts[2]).unwrap();
        tag[0] ^= 0xFF;
        let tampered = format!(
            "{}.{}.{}.{}",
            parts[0],
            parts[1],
            Base64::encode_string(&tag),
            parts[3]
        );
        assert!(decrypt(&key, &tampered).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let blob = encrypt(&key, "sensitive").unwrap();
        let parts: Vec<&str> = blob.split('.').collect();
        let mut ciphertext = Base64::decode_vec(parts[3]).unwrap();
        ciphertext[0] ^= 0xFF;
        let tampered = format!(
            "{}.{}.{}.{}",
            parts[0],
            parts[1],
            parts[2],
            Base64::encode_string(&ciphertext)
        );
        assert!(decrypt(&key, &tampered).is_err());
    }

    #[test]
    fn wrong_part_count_fails() {
        let key = test_key();
        assert!(decrypt(&key, "v1.only-two").is_err());
        assert!(decrypt(&key, "a.b.c.d.e").is_err());
    }

    #[test]
    fn wrong_version_tag_fails() {
        let key = test_key();
        let blob = encrypt(&key, "x").unwrap();
        let downgraded = blob.replacen("v1.", "v9.", 1);
        assert!(decrypt(&key, &downgraded).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let blob = encrypt(&test_key(), "secret").unwrap();
        let other = EncryptionKey([9u8; KEY_LEN]);
        assert!(decrypt(&other, &blob).is_err());
    }

    #[test]
    fn hash_and_verify_password_round_trip() {
        let hash = hash_password("Sup3r$ecret").unwrap();
        assert!(verify_password("Sup3r$ecret", Some(&hash)));
        assert!(!verify_password("wrong", Some(&hash)));
    }

    #[test]
    fn verify_password_handles_missing_hash() {
        assert!(!verify_password("anything", None));
        assert!(!verify_password("anything", Some("")));
        assert!(!verify_password("anything", Some("not-a-phc-string")));
    }
}
