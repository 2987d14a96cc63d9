use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::storage::{SecureStore, StorageError, StorageOptions};

/// Fixed storage keys for the persisted token pair
const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Persisted refresh token outlives the access token by this factor
const REFRESH_LIFETIME_FACTOR: u32 = 2;

#[derive(Debug, Default)]
struct TokenState {
    access: Option<String>,
    refresh: Option<String>,
}

/// Claims subset read during client-side expiry introspection.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// Holds the current access/refresh tokens in memory and mirrors them to
/// the encrypted store under fixed keys.
///
/// Reads are synchronous against the in-memory holders; the persisted
/// copies are only consulted at process start via `load_from_storage`.
pub struct TokenStore {
    store: Arc<SecureStore>,
    state: Mutex<TokenState>,
    /// Persisted lifetime for the access token; the refresh token gets
    /// `REFRESH_LIFETIME_FACTOR` times this.
    access_lifetime: Duration,
}

impl TokenStore {
    pub fn new(store: Arc<SecureStore>, access_lifetime: Duration) -> Self {
        Self {
            store,
            state: Mutex::new(TokenState::default()),
            access_lifetime,
        }
    }

    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the in-memory access token and persist it encrypted.
    pub fn set_token(&self, token: &str) -> Result<(), StorageError> {
        self.store.set_item(
            ACCESS_TOKEN_KEY,
            &token,
            &StorageOptions::encrypted_with_expiry(self.access_lifetime),
        )?;
        self.state().access = Some(token.to_string());
        Ok(())
    }

    /// Update the in-memory refresh token and persist it encrypted.
    pub fn set_refresh_token(&self, token: &str) -> Result<(), StorageError> {
        self.store.set_item(
            REFRESH_TOKEN_KEY,
            &token,
            &StorageOptions::encrypted_with_expiry(
                self.access_lifetime * REFRESH_LIFETIME_FACTOR,
            ),
        )?;
        self.state().refresh = Some(token.to_string());
        Ok(())
    }

    /// Persist both tokens, returning only after the durable writes
    /// complete. The session manager calls this before publishing an
    /// authenticated state so a page reload cannot observe a user with no
    /// token backing.
    pub fn save_tokens_to_storage(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.set_token(access)?;
        self.set_refresh_token(refresh)?;
        debug!("Token pair persisted to secure storage");
        Ok(())
    }

    pub fn get_token(&self) -> Option<String> {
        self.state().access.clone()
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.state().refresh.clone()
    }

    /// Clear both in-memory holders and both persisted keys. Always clears
    /// the pair together; one token without the other is an invalid state.
    pub fn clear_tokens(&self) -> Result<(), StorageError> {
        {
            let mut state = self.state();
            state.access = None;
            state.refresh = None;
        }
        self.store.remove_item(ACCESS_TOKEN_KEY)?;
        self.store.remove_item(REFRESH_TOKEN_KEY)?;
        Ok(())
    }

    /// Restore tokens persisted by a previous run. Returns true when an
    /// access token was found.
    pub fn load_from_storage(&self) -> Result<bool, StorageError> {
        let access: Option<String> = self.store.get_item(ACCESS_TOKEN_KEY)?;
        let refresh: Option<String> = self.store.get_item(REFRESH_TOKEN_KEY)?;

        let found = access.is_some();
        let mut state = self.state();
        state.access = access;
        state.refresh = refresh;
        Ok(found)
    }

    /// True iff an access token is present and its decoded expiry is in
    /// the future.
    pub fn is_authenticated(&self) -> bool {
        match self.get_token() {
            Some(token) => !Self::is_token_expired(&token),
            None => false,
        }
    }

    /// Trust-on-read expiry check: decodes the token's payload segment
    /// without verifying the signature. This is an optimization to avoid a
    /// doomed round trip, not a security boundary - the server still
    /// validates every request. Any parse failure reads as expired.
    pub fn is_token_expired(token: &str) -> bool {
        match Self::decode_expiry(token) {
            Some(expiry) => Utc::now() >= expiry,
            None => {
                warn!("Token payload could not be decoded, treating as expired");
                true
            }
        }
    }

    /// Extract the `exp` claim from a JWT-shaped token.
    pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
        let mut segments = token.split('.');
        let _header = segments.next()?;
        let payload = segments.next()?;
        segments.next()?;

        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
        Utc.timestamp_opt(claims.exp, 0).single()
    }
}

// ============================================================================
// Tests
// ============================================================================
