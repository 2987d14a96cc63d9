//! Encrypted local storage module.
//!
//! This module provides the `SecureStore`, a namespaced key-value store with
//! optional per-key encryption, lazy expiry, and integrity verification.
//! Sensitive session material (tokens, user profile) lives here; corruption
//! degrades to a cache miss rather than an error.

pub mod store;

pub use store::{SecureStore, StorageError, StorageOptions};
