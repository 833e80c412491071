//! Subscription secret generation and encryption at rest.
//!
//! Secrets are sealed with AES-256-GCM and stored as
//! `base64(nonce || ciphertext || tag)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::WebhookError;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const SECRET_BYTES: usize = 32;

pub const SECRET_PREFIX: &str = "whsec_";

/// Generates a fresh signing secret: `whsec_` followed by 64 hex characters.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Encrypts and decrypts subscription secrets with a fixed 256-bit key.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher([REDACTED])")
    }
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> Result<Self, WebhookError> {
        if key.len() != KEY_SIZE {
            return Err(WebhookError::EncryptionFailed(format!(
                "Invalid key length: expected {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, WebhookError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, encoded: &str) -> Result<String, WebhookError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

        if sealed.len() <= NONCE_SIZE {
            return Err(WebhookError::EncryptionFailed(
                "Invalid encrypted data format".to_string(),
            ));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
    }
}
