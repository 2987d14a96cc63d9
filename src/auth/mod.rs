//! Authentication module: token lifecycle and session management.
//!
//! This module provides:
//! - `TokenStore`: in-memory access/refresh token holders mirrored to the
//!   encrypted store, with client-side expiry introspection
//! - `SessionManager`: login/logout/refresh rules, session countdown, and
//!   broadcast of the current authentication state
//!
//! All token and session mutation is funneled through the session manager
//! so the in-memory and persisted views never drift apart.

pub mod session;
pub mod tokens;

pub use session::{SessionEvent, SessionManager, SessionState};
pub use tokens::TokenStore;
