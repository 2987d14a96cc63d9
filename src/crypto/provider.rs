use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroize;

/// Symmetric key length (256-bit)
const KEY_LEN: usize = 32;

/// Nonce length (24 bytes, XChaCha20-Poly1305)
const NONCE_LEN: usize = 24;

/// KDF salt length
const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Ciphertext plus the random salt and nonce it was produced with.
///
/// Salt and nonce are fresh per write and never reused; the stored form is
/// base64 so the record serializes cleanly as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub ciphertext: String,
    pub nonce: String,
    pub salt: String,
}

pub struct CryptoProvider;

impl CryptoProvider {
    /// Derive a symmetric key from a password and salt via Argon2id.
    /// Deterministic for a given (password, salt) pair.
    pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    /// Encrypt a plaintext under a password with fresh random salt and nonce.
    pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedRecord, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut key = Self::derive_key(password, &salt)?;
        let cipher = XChaCha20Poly1305::new((&key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()));
        key.zeroize();

        Ok(EncryptedRecord {
            ciphertext: BASE64.encode(ciphertext?),
            nonce: BASE64.encode(nonce),
            salt: BASE64.encode(salt),
        })
    }

    /// Decrypt a record, re-deriving the key from the stored salt.
    ///
    /// Fails with `DecryptionFailed` when the authentication tag does not
    /// verify (tampered ciphertext or wrong password); never returns partial
    /// plaintext.
    pub fn decrypt(record: &EncryptedRecord, password: &str) -> Result<Vec<u8>, CryptoError> {
        let salt = BASE64.decode(&record.salt)?;
        let nonce = BASE64.decode(&record.nonce)?;
        let ciphertext = BASE64.decode(&record.ciphertext)?;

        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::DecryptionFailed(format!(
                "bad nonce length {}",
                nonce.len()
            )));
        }

        let mut key = Self::derive_key(password, &salt)?;
        let cipher = XChaCha20Poly1305::new((&key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()));
        key.zeroize();

        plaintext
    }

    /// One-way SHA-256 digest (base64) for integrity-checking stored values.
    /// Not suitable for password storage.
    pub fn hash(data: &[u8]) -> String {
        BASE64.encode(Sha256::digest(data))
    }

    /// Verify a digest against the original data.
    pub fn verify_hash(data: &[u8], digest: &str) -> bool {
        Self::hash(data) == digest
    }

    /// Random v4 UUID
    pub fn generate_uuid() -> Uuid {
        Uuid::new_v4()
    }

    /// Cryptographically random alphanumeric string
    pub fn generate_secure_random_string(length: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
