//! Encryption of OAuth tokens at rest
//!
//! Uses AES-256-GCM with a key derived by Argon2id from the configured
//! bridge secret and an application salt. Ciphertexts are stored as
//! base64(nonce || ciphertext).

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, Params, ParamsBuilder};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;
use tracing::debug;

use crate::types::error::BridgeError;

/// Application-specific salt for key derivation
const APP_SALT: &[u8] = b"mailgram.v1.token.encryption.salt";

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

/// Minimum accepted length of the configured secret
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),
}

impl From<EncryptionError> for BridgeError {
    fn from(err: EncryptionError) -> Self {
        BridgeError::Credential(err.to_string())
    }
}

pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Derive the token key from the bridge secret
    pub fn from_secret(secret: &str) -> Result<Self, EncryptionError> {
        // 64 MiB, 3 iterations, 4 lanes
        let params = ParamsBuilder::new()
            .m_cost(65536)
            .t_cost(3)
            .p_cost(4)
            .build()
            .map_err(|e| {
                EncryptionError::KeyDerivation(format!("Failed to build Argon2 params: {}", e))
            })?;
        Self::with_params(secret, params)
    }

    fn with_params(secret: &str, params: Params) -> Result<Self, EncryptionError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(EncryptionError::KeyDerivation(format!(
                "secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        let key = derive_key(secret.as_bytes(), params)?;
        let cipher = Aes256Gcm::new(&key.into());
        debug!("Initialized token encryption");
        Ok(Self { cipher })
    }

    /// Encrypt a token. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Err(EncryptionError::Encryption(
                "Cannot encrypt empty plaintext".to_string(),
            ));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        use aes_gcm::aead::rand_core::RngCore;
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        if encrypted.is_empty() {
            return Err(EncryptionError::InvalidFormat(
                "Cannot decrypt empty string".to_string(),
            ));
        }

        let combined = BASE64.decode(encrypted).map_err(|e| {
            EncryptionError::InvalidFormat(format!("Invalid base64 encoding: {}", e))
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(EncryptionError::InvalidFormat(format!(
                "Encrypted data too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self.cipher.decrypt(nonce, ciphertext).map_err(|e| {
            EncryptionError::Decryption(format!(
                "AES-GCM decryption failed (wrong secret or corrupted data): {}",
                e
            ))
        })?;

        String::from_utf8(plaintext_bytes).map_err(|e| {
            EncryptionError::Decryption(format!("Decrypted data is not valid UTF-8: {}", e))
        })
    }
}

fn derive_key(secret: &[u8], params: Params) -> Result<[u8; 32], EncryptionError> {
    let mut output_key = [0u8; 32];
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    argon2
        .hash_password_into(secret, APP_SALT, &mut output_key)
        .map_err(|e| {
            EncryptionError::KeyDerivation(format!("Argon2 key derivation failed: {}", e))
        })?;

    Ok(output_key)
}

/// Cheap key derivation so unit tests don't spend seconds in Argon2
#[cfg(test)]
pub(crate) fn test_cipher(secret: &str) -> TokenCipher {
    let params = ParamsBuilder::new()
        .m_cost(1024)
        .t_cost(1)
        .p_cost(1)
        .build()
        .unwrap();
    TokenCipher::with_params(secret, params).unwrap()
}
