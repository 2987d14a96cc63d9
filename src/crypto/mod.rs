//! Cryptographic primitives for local data protection.
//!
//! This module provides the `CryptoProvider` used by the secure storage
//! layer: password-based authenticated encryption, integrity digests, and
//! random identifier generation.
//!
//! Encryption is XChaCha20-Poly1305 with a per-write random salt and nonce;
//! keys are derived with Argon2id so brute-forcing the application
//! passphrase stays expensive.

pub mod provider;

pub use provider::{CryptoError, CryptoProvider, EncryptedRecord};
