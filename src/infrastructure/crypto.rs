use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const DIGEST_PREFIX: &str = "$argon2";

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Password hashing failed: {0}")]
    PasswordHashing(String),
}

/// AES-256-GCM for user API keys at rest. Ciphertext is the random nonce
/// followed by the sealed bytes.
pub struct SecretsEncryption {
    cipher: Aes256Gcm,
}

impl SecretsEncryption {
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .map_err(|_| EncryptionError::InvalidKeyLength)?;

        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| EncryptionError::InvalidKeyLength)?;

        warn_on_weak_key(&key);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<String, EncryptionError> {
        if sealed.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptionFailed(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
    }
}

fn warn_on_weak_key(key: &[u8; 32]) {
    let first = key[0];
    if key.iter().all(|&b| b == first) {
        warn!("CRITICAL: Encryption key has uniform bytes - this is extremely insecure!");
        return;
    }

    let unique: HashSet<u8> = key.iter().copied().collect();
    let ratio = unique.len() as f32 / key.len() as f32;
    if ratio < 0.5 {
        warn!(
            "WARNING: Encryption key has low entropy ({:.1}% unique bytes). Consider using a stronger key.",
            ratio * 100.0
        );
    }
}

/// Argon2id digest as a PHC string (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> Result<String, EncryptionError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| EncryptionError::PasswordHashing(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EncryptionError::PasswordHashing(e.to_string()))
}

pub fn is_password_digest(stored: &str) -> bool {
    stored.starts_with(DIGEST_PREFIX)
}

/// Checks `candidate` against a stored digest, or against a legacy
/// plaintext value that has not been upgraded yet.
pub fn verify_password(stored: &str, candidate: &str) -> bool {
    if !is_password_digest(stored) {
        return stored == candidate;
    }

    let parsed = match PasswordHash::new(stored) {
        Ok(hash) => hash,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXoxMjM0NTY=";

    #[test]
    fn test_encrypt_decrypt() {
        let encryption = SecretsEncryption::new(TEST_KEY).unwrap();

        let api_key = "AIza-test-key-12345";
        let sealed = encryption.encrypt(api_key).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], api_key.as_bytes());
        assert_eq!(encryption.decrypt(&sealed).unwrap(), api_key);
    }

    #[test]
    fn rejects_short_keys_and_ciphertexts() {
        assert!(matches!(
            SecretsEncryption::new("c2hvcnQ="),
            Err(EncryptionError::InvalidKeyLength)
        ));

        let encryption = SecretsEncryption::new(TEST_KEY).unwrap();
        assert!(encryption.decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn password_digest_verifies_and_is_salted() {
        let first = hash_password("hunter2").unwrap();
        let second = hash_password("hunter2").unwrap();

        assert!(first.starts_with("$argon2id$"));
        assert!(is_password_digest(&first));
        assert_ne!(first, second);
        assert!(verify_password(&first, "hunter2"));
        assert!(!verify_password(&first, "hunter3"));
    }

    #[test]
    fn legacy_plaintext_still_verifies() {
        assert!(verify_password("fghrty", "fghrty"));
        assert!(!verify_password("fghrty", "other"));
        assert!(!verify_password("$argon2id$broken", "$argon2id$broken"));
    }
}
