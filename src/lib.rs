//! Client core for the BlockTrade trade-finance platform.
//!
//! This crate provides the secure client-side foundation the UI layers sit
//! on: encrypted local storage, token lifecycle, an HTTP pipeline with
//! smart retry and single-flight token refresh, and session management
//! with countdown and forced-logout policy.
//!
//! The pieces compose top-down:
//!
//! - [`crypto::CryptoProvider`] - passphrase-based authenticated encryption
//!   and hashing primitives
//! - [`storage::SecureStore`] - namespaced key-value store with optional
//!   encryption, expiry, and integrity verification
//! - [`auth::TokenStore`] - in-memory token pair mirrored to the store
//! - [`api::ApiClient`] - request pipeline (retry, backoff, 401 refresh)
//! - [`auth::SessionManager`] - login/logout/refresh rules, countdown
//!   timers, and the published session state
//!
//! [`BlockTradeClient`] wires them together:
//!
//! ```no_run
//! use blocktrade_client::{BlockTradeClient, ClientConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = BlockTradeClient::new(ClientConfig::load()?)?;
//! client.init()?;
//!
//! let mut state = client.session().subscribe();
//! println!("authenticated: {}", state.borrow().is_authenticated);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Result;

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiResponse};
pub use auth::{SessionEvent, SessionManager, SessionState, TokenStore};
pub use config::ClientConfig;
pub use storage::{SecureStore, StorageOptions};

/// Top-level client context: owns the storage, token, API, and session
/// components and wires them together.
pub struct BlockTradeClient {
    config: ClientConfig,
    store: Arc<SecureStore>,
    tokens: Arc<TokenStore>,
    api: Arc<ApiClient>,
    session: Arc<SessionManager>,
}

impl BlockTradeClient {
    /// Build the component graph from a configuration. No I/O beyond
    /// creating the storage directory; call [`init`](Self::init) to restore
    /// a persisted session and start background monitoring.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store = Arc::new(SecureStore::new(
            config.storage_dir.clone(),
            config.storage_passphrase.clone(),
        )?);
        let tokens = Arc::new(TokenStore::new(
            Arc::clone(&store),
            config.session_duration(),
        ));
        let api = Arc::new(ApiClient::new(&config, Arc::clone(&tokens))?);
        let session = SessionManager::new(&config, Arc::clone(&api), Arc::clone(&tokens), Arc::clone(&store));

        Ok(Self {
            config,
            store,
            tokens,
            api,
            session,
        })
    }

    /// Restore any persisted session and start the background tasks.
    /// Must be called from within a Tokio runtime.
    pub fn init(&self) -> Result<(), storage::StorageError> {
        self.session.init()
    }

    /// Stop all timers and background tasks. Does not clear the session;
    /// a later `init` restores it.
    pub fn dispose(&self) {
        self.session.dispose();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SecureStore> {
        &self.store
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }
}
