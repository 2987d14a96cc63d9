//! Session lifecycle management.
//!
//! The `SessionManager` owns the login/logout/refresh business rules, the
//! session countdown, and the forced-logout policy. It is the only
//! component allowed to mutate the token store and the published session
//! state, keeping the in-memory and persisted views consistent.
//!
//! State is published through a `watch` channel; discrete events (expiry
//! warning, forced logout) go out on a `broadcast` channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ApiResponse};
use crate::config::ClientConfig;
use crate::models::{
    AuthPayload, AuthTokens, ChangePassword, ForgotPassword, LoginRequest, OrganizationType,
    Permission, RegisterRequest, ResetPassword, User, UserProfile, UserRole,
};
use crate::storage::{SecureStore, StorageError, StorageOptions};

use super::TokenStore;

// Storage keys for the persisted profile
const USER_DATA_KEY: &str = "user_data";
const LAST_LOGIN_KEY: &str = "last_login";

// Auth endpoints
const LOGIN_ENDPOINT: &str = "/auth/login";
const REGISTER_ENDPOINT: &str = "/auth/register";
const LOGOUT_ENDPOINT: &str = "/auth/logout";
const ME_ENDPOINT: &str = "/auth/me";
const PROFILE_ENDPOINT: &str = "/auth/profile";
const CHANGE_PASSWORD_ENDPOINT: &str = "/auth/change-password";
const FORGOT_PASSWORD_ENDPOINT: &str = "/auth/forgot-password";
const RESET_PASSWORD_ENDPOINT: &str = "/auth/reset-password";

/// Capacity for the session event channel; events are small and consumers
/// are expected to keep up.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Snapshot of the authentication state observed by UI consumers.
/// Mutated only by the session manager.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub current_user: Option<User>,
    pub is_authenticated: bool,
    pub permissions: HashSet<Permission>,
    pub remaining_seconds: u64,
}

/// Discrete session notifications for UI consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session will expire soon; `extend_session` can keep it alive.
    ExpiryWarning { remaining_seconds: u64 },
    /// The client terminated the session without user action.
    ForcedLogout { reason: String },
    /// Ordinary user-initiated logout completed.
    LoggedOut,
}

/// Owns session state, timers, and all token mutation.
///
/// Constructed once per running client and shared via `Arc`; `init` starts
/// the background reconciliation task and `dispose` tears every timer down.
pub struct SessionManager {
    api: Arc<ApiClient>,
    tokens: Arc<TokenStore>,
    store: Arc<SecureStore>,
    session_duration: Duration,
    warning_lead: Duration,
    drift_poll: Duration,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    /// Countdown/warning/expiry timers; replaced wholesale on every re-arm
    timers: Mutex<Vec<JoinHandle<()>>>,
    /// Long-lived background tasks (auth drift poll)
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: &ClientConfig,
        api: Arc<ApiClient>,
        tokens: Arc<TokenStore>,
        store: Arc<SecureStore>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            api,
            tokens,
            store,
            session_duration: config.session_duration(),
            warning_lead: config.warning_lead(),
            drift_poll: config.drift_poll_period(),
            state_tx,
            events_tx,
            timers: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
        })
    }

    fn timers_guard(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn background_guard(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore any persisted session and start background monitoring.
    /// A persisted user with no live token stays unauthenticated until the
    /// next login.
    pub fn init(self: &Arc<Self>) -> Result<(), StorageError> {
        self.tokens.load_from_storage()?;

        if let Some(user) = self.store.get_item::<User>(USER_DATA_KEY)? {
            if self.tokens.is_authenticated() {
                info!(username = %user.username, "Restored persisted session");
                self.publish_authenticated(user);
                self.arm_timers();
            } else {
                debug!("Persisted user found but token is expired or absent");
            }
        }

        self.start_drift_monitor();
        Ok(())
    }

    /// Abort every owned timer and background task.
    pub fn dispose(&self) {
        for handle in self.timers_guard().drain(..) {
            handle.abort();
        }
        for handle in self.background_guard().drain(..) {
            handle.abort();
        }
    }

    // ===== State transitions =====

    /// Authenticate against the platform. On success the token pair and
    /// profile are durably persisted before the authenticated state is
    /// published, so no consumer can observe a user without token backing.
    /// Failures propagate untouched; the UI decides the message.
    pub async fn login(self: &Arc<Self>, credentials: &LoginRequest) -> Result<AuthPayload, ApiError> {
        let response: ApiResponse<AuthPayload> = self.api.post(LOGIN_ENDPOINT, credentials).await?;
        let payload = response.into_data("Login")?;
        self.establish_session(&payload)?;
        info!(username = %payload.user.username, "Login succeeded");
        Ok(payload)
    }

    /// Register a new account; a successful registration establishes a
    /// session exactly like a login.
    pub async fn register(
        self: &Arc<Self>,
        registration: &RegisterRequest,
    ) -> Result<AuthPayload, ApiError> {
        let response: ApiResponse<AuthPayload> =
            self.api.post(REGISTER_ENDPOINT, registration).await?;
        let payload = response.into_data("Registration")?;
        self.establish_session(&payload)?;
        Ok(payload)
    }

    /// Notify the server (best effort) and tear the local session down
    /// unconditionally. A failed server call never leaves the client
    /// believing it is still logged in.
    pub async fn logout(self: &Arc<Self>) -> Result<(), StorageError> {
        if let Err(e) = self
            .api
            .authenticated_request::<serde_json::Value>(Method::POST, LOGOUT_ENDPOINT, None)
            .await
        {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }

        self.clear_session()?;
        let _ = self.events_tx.send(SessionEvent::LoggedOut);
        info!("Logged out");
        Ok(())
    }

    /// Refresh the token pair. Success re-arms the countdown; failure
    /// forces logout.
    pub async fn refresh_token(self: &Arc<Self>) -> Result<AuthTokens, ApiError> {
        match self.api.refresh_access_token().await {
            Ok(tokens) => {
                self.arm_timers();
                Ok(tokens)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, forcing logout");
                self.force_logout("Session expired");
                Err(e)
            }
        }
    }

    /// Client-triggered session termination (expiry, drift, security).
    pub fn force_logout(self: &Arc<Self>, reason: &str) {
        warn!(reason, "Forcing logout");
        if let Err(e) = self.clear_session() {
            warn!(error = %e, "Failed to clear persisted session data");
        }
        let _ = self.events_tx.send(SessionEvent::ForcedLogout {
            reason: reason.to_string(),
        });
    }

    /// Restart the countdown from now.
    pub fn extend_session(self: &Arc<Self>) {
        if self.state_tx.borrow().is_authenticated {
            self.arm_timers();
        }
    }

    // ===== Profile operations =====

    /// Fetch the profile of the logged-in user and republish it. An
    /// unrecoverable 401 tears the session down.
    pub async fn fetch_current_user(self: &Arc<Self>) -> Result<User, ApiError> {
        let result = self
            .api
            .authenticated_request::<User>(Method::GET, ME_ENDPOINT, None)
            .await;

        match result {
            Ok(response) => {
                let user = response.into_data("Profile")?;
                self.set_current_user(user.clone())?;
                Ok(user)
            }
            Err(e @ (ApiError::Unauthorized | ApiError::MissingRefreshToken)) => {
                self.force_logout("Session expired");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_profile(self: &Arc<Self>, profile: &UserProfile) -> Result<User, ApiError> {
        let body = serde_json::to_value(profile)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable profile: {}", e)))?;
        let response: ApiResponse<User> = self
            .api
            .authenticated_request(Method::PUT, PROFILE_ENDPOINT, Some(body))
            .await?;
        let user = response.into_data("Profile")?;
        self.set_current_user(user.clone())?;
        Ok(user)
    }

    pub async fn change_password(self: &Arc<Self>, data: &ChangePassword) -> Result<(), ApiError> {
        let body = serde_json::to_value(data)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable body: {}", e)))?;
        self.api
            .authenticated_request::<serde_json::Value>(
                Method::POST,
                CHANGE_PASSWORD_ENDPOINT,
                Some(body),
            )
            .await?
            .ensure_success()
    }

    pub async fn forgot_password(&self, data: &ForgotPassword) -> Result<(), ApiError> {
        self.api
            .post::<serde_json::Value, _>(FORGOT_PASSWORD_ENDPOINT, data)
            .await?
            .ensure_success()
    }

    pub async fn reset_password(&self, data: &ResetPassword) -> Result<(), ApiError> {
        self.api
            .post::<serde_json::Value, _>(RESET_PASSWORD_ENDPOINT, data)
            .await?
            .ensure_success()
    }

    // ===== Pure reads =====

    /// True iff both the published state and the token store agree.
    pub fn is_authenticated(&self) -> bool {
        self.state_tx.borrow().is_authenticated && self.tokens.is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state_tx.borrow().current_user.clone()
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.state_tx.borrow().remaining_seconds
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.state_tx.borrow().permissions.contains(&permission)
    }

    pub fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        let state = self.state_tx.borrow();
        permissions.iter().any(|p| state.permissions.contains(p))
    }

    pub fn has_all_permissions(&self, permissions: &[Permission]) -> bool {
        let state = self.state_tx.borrow();
        permissions.iter().all(|p| state.permissions.contains(p))
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.state_tx
            .borrow()
            .current_user
            .as_ref()
            .is_some_and(|u| u.role == role)
    }

    pub fn has_organization_type(&self, organization_type: OrganizationType) -> bool {
        self.state_tx
            .borrow()
            .current_user
            .as_ref()
            .is_some_and(|u| u.organization_type == organization_type)
    }

    /// Reactive subscription to the session state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscription to discrete session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    // ===== Internals =====

    /// Persist tokens and profile, then publish the authenticated state,
    /// then arm the countdown. The ordering is load-bearing: publishing
    /// first would open a window where a reload silently loses the session.
    fn establish_session(self: &Arc<Self>, payload: &AuthPayload) -> Result<(), ApiError> {
        self.tokens.save_tokens_to_storage(
            &payload.tokens.access_token,
            &payload.tokens.refresh_token,
        )?;
        self.persist_user(&payload.user)?;

        self.publish_authenticated(payload.user.clone());
        self.arm_timers();
        Ok(())
    }

    fn persist_user(&self, user: &User) -> Result<(), StorageError> {
        self.store.set_item(
            USER_DATA_KEY,
            user,
            &StorageOptions::encrypted_with_expiry(self.session_duration),
        )?;
        self.store
            .set_item(LAST_LOGIN_KEY, &Utc::now(), &StorageOptions::default())
    }

    /// Republish the profile and its permission set.
    fn set_current_user(&self, user: User) -> Result<(), StorageError> {
        self.persist_user(&user)?;
        self.state_tx.send_modify(|state| {
            state.permissions = user.permissions.iter().copied().collect();
            state.current_user = Some(user);
        });
        Ok(())
    }

    fn publish_authenticated(&self, user: User) {
        let remaining = self.session_duration.as_secs();
        self.state_tx.send_replace(SessionState {
            permissions: user.permissions.iter().copied().collect(),
            current_user: Some(user),
            is_authenticated: true,
            remaining_seconds: remaining,
        });
    }

    /// Clear tokens, persisted profile, timers, and published state, in
    /// that order. Idempotent.
    fn clear_session(&self) -> Result<(), StorageError> {
        self.tokens.clear_tokens()?;
        self.store.remove_item(USER_DATA_KEY)?;
        self.store.remove_item(LAST_LOGIN_KEY)?;

        for handle in self.timers_guard().drain(..) {
            handle.abort();
        }
        self.state_tx.send_replace(SessionState::default());
        Ok(())
    }

    /// Cancel and replace the warning, expiry, and countdown timers.
    /// Old timers are always aborted first so a re-arm can never produce a
    /// duplicate forced logout.
    fn arm_timers(self: &Arc<Self>) {
        let mut timers = self.timers_guard();
        for handle in timers.drain(..) {
            handle.abort();
        }

        let duration = self.session_duration;
        let warning_at = duration.saturating_sub(self.warning_lead);
        let warning_lead = self.warning_lead;

        // Warning timer
        let events = self.events_tx.clone();
        timers.push(tokio::spawn(async move {
            tokio::time::sleep(warning_at).await;
            debug!("Session expiry warning");
            let _ = events.send(SessionEvent::ExpiryWarning {
                remaining_seconds: warning_lead.as_secs(),
            });
        }));

        // Expiry timer
        let manager = Arc::clone(self);
        timers.push(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            manager.force_logout("Session expired");
        }));

        // One-second countdown publication
        let state_tx = self.state_tx.clone();
        timers.push(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.tick().await; // first tick is immediate
            loop {
                tick.tick().await;
                let elapsed = started.elapsed();
                let remaining = duration.saturating_sub(elapsed).as_secs();
                state_tx.send_modify(|state| state.remaining_seconds = remaining);
                if remaining == 0 {
                    break;
                }
            }
        }));
    }

    /// Periodically reconcile the published state against the token store;
    /// a token that expired or was cleared out-of-band forces logout.
    fn start_drift_monitor(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let period = self.drift_poll;
        self.background_guard().push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                let claims_authenticated = manager.state_tx.borrow().is_authenticated;
                if claims_authenticated && !manager.tokens.is_authenticated() {
                    manager.force_logout("Session expired");
                }
            }
        }));
    }
}

// ============================================================================
// Tests
// ============================================================================
