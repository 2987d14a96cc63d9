//! HTTP client for the BlockTrade platform API.
//!
//! All requests share one connection pool, attach bearer authentication
//! when a token is held, and classify failures into the `ApiError`
//! taxonomy. Transient failures (network errors, 5xx) are retried with
//! exponential backoff; 401 responses on authenticated requests trigger a
//! single-flight token refresh followed by exactly one resubmission.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::TokenStore;
use crate::config::ClientConfig;
use crate::models::AuthTokens;

use super::ApiError;

/// Endpoint the refresh flow posts the refresh token to
const REFRESH_ENDPOINT: &str = "/auth/refresh";

/// Standard response envelope returned by every platform endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

impl<T> ApiResponse<T> {
    /// Reject an envelope the application layer marked as failed, even
    /// when it arrived with HTTP 200.
    pub fn ensure_success(&self) -> Result<(), ApiError> {
        if self.success {
            return Ok(());
        }
        let detail = self
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.message.clone());
        Err(ApiError::Rejected(detail))
    }

    /// Unwrap the payload; `success: false` or an absent `data` field is an
    /// error regardless of the HTTP status.
    pub fn into_data(self, what: &str) -> Result<T, ApiError> {
        self.ensure_success()?;
        self.data
            .ok_or_else(|| ApiError::InvalidResponse(format!("{} response carried no data", what)))
    }
}

/// Structured error detail carried inside an `ApiResponse`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    tokens: AuthTokens,
}

/// API client for the BlockTrade platform.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    retry_attempts: u32,
    retry_base_delay: Duration,
    /// Single-flight guard: at most one refresh per client at a time.
    /// Concurrent callers queue on the lock and revalidate after acquiring
    /// it instead of issuing their own refresh.
    refresh_lock: tokio::sync::Mutex<()>,
    /// Count of completed refreshes. Lets a caller that waited on the lock
    /// detect a refresh that finished in the meantime, even when the server
    /// reissued a byte-identical access token.
    refresh_generation: AtomicU64,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, tokens: Arc<TokenStore>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            retry_attempts: config.retry_attempts,
            retry_base_delay: config.retry_base_delay(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.tokens.get_token() {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("Invalid token header: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Issue the request once, classifying transport and status failures.
    async fn send_once<T: DeserializeOwned>(
        &self,
        method: &Method,
        endpoint: &str,
        query: Option<&HashMap<String, String>>,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.url(endpoint);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .headers(self.auth_headers()?);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Smart retry: resubmit only on network-class failures and 5xx, with
    /// exponential backoff (base, 2x base, 4x base ...), up to the
    /// configured ceiling. Client errors propagate immediately.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: Option<&HashMap<String, String>>,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&method, endpoint, query, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        endpoint,
                        attempt = attempt + 1,
                        max = self.retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient API failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ===== Generic verbs =====

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.execute(Method::GET, endpoint, None, None).await
    }

    /// GET with query parameters encoded onto the URL by the client.
    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.execute(Method::GET, endpoint, Some(params), None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable body: {}", e)))?;
        self.execute(Method::POST, endpoint, None, Some(&body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable body: {}", e)))?;
        self.execute(Method::PUT, endpoint, None, Some(&body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable body: {}", e)))?;
        self.execute(Method::PATCH, endpoint, None, Some(&body)).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.execute(Method::DELETE, endpoint, None, None).await
    }

    /// DELETE with query parameters encoded onto the URL by the client.
    pub async fn delete_with_params<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.execute(Method::DELETE, endpoint, Some(params), None).await
    }

    /// Multipart file upload. No JSON content type and no retry; repeating
    /// an upload could duplicate a document submission.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        file_name: &str,
        bytes: Vec<u8>,
        extra: Option<HashMap<String, String>>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.send_multipart(endpoint, form, extra).await
    }

    /// Upload several files in one multipart request, all under the
    /// `files` field.
    pub async fn upload_multiple<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        files: Vec<(String, Vec<u8>)>,
        extra: Option<HashMap<String, String>>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let mut form = reqwest::multipart::Form::new();
        for (file_name, bytes) in files {
            let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
            form = form.part("files", part);
        }
        self.send_multipart(endpoint, form, extra).await
    }

    async fn send_multipart<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        mut form: reqwest::multipart::Form,
        extra: Option<HashMap<String, String>>,
    ) -> Result<ApiResponse<T>, ApiError> {
        if let Some(extra) = extra {
            for (key, value) in extra {
                form = form.text(key, value);
            }
        }

        let response = self
            .http
            .post(self.url(endpoint))
            .headers(self.auth_headers()?)
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Download a binary body, optionally saving it to `save_as`.
    pub async fn download(
        &self,
        endpoint: &str,
        save_as: Option<&Path>,
    ) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .get(self.url(endpoint))
            .headers(self.auth_headers()?)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(ApiError::from_transport)?
            .to_vec();

        if let Some(path) = save_as {
            std::fs::write(path, &bytes).map_err(crate::storage::StorageError::Io)?;
        }

        Ok(bytes)
    }

    // ===== Authenticated pipeline =====

    /// Issue a request, and on 401 run the refresh-then-retry sequence:
    /// refresh the token pair (single-flight across concurrent callers)
    /// and resubmit the original request exactly once. A refresh failure
    /// is surfaced to the caller, who is responsible for forcing logout.
    pub async fn authenticated_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        match self.execute(method.clone(), endpoint, None, body.as_ref()).await {
            Err(ApiError::Unauthorized) => {
                debug!(endpoint, "Request rejected with 401, refreshing token");
                self.refresh_unless_already_done(observed).await?;
                self.execute(method, endpoint, None, body.as_ref()).await
            }
            other => other,
        }
    }

    /// Explicit refresh of the token pair, regardless of the current
    /// token's apparent freshness.
    pub async fn refresh_access_token(&self) -> Result<AuthTokens, ApiError> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        self.refresh_unless_already_done(observed).await
    }

    /// Exchange the refresh token for a new pair, unless another caller
    /// completed a refresh after `observed_generation` was read and the
    /// resulting token is still live. Most backends invalidate a refresh
    /// token after first use, so concurrent refreshes must share one
    /// exchange. The generation counter detects a completed refresh even
    /// when the server reissues a byte-identical access token.
    async fn refresh_unless_already_done(
        &self,
        observed_generation: u64,
    ) -> Result<AuthTokens, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        if self.refresh_generation.load(Ordering::Acquire) != observed_generation {
            if let Some(current) = self.tokens.get_token() {
                if !TokenStore::is_token_expired(&current) {
                    debug!("Token already refreshed by a concurrent caller");
                    return Ok(AuthTokens {
                        refresh_token: self.tokens.get_refresh_token().unwrap_or_default(),
                        expires_in: TokenStore::decode_expiry(&current)
                            .map(|exp| (exp - Utc::now()).num_seconds().max(0))
                            .unwrap_or(0),
                        access_token: current,
                        token_type: None,
                    });
                }
            }
        }

        let refresh_token = self
            .tokens
            .get_refresh_token()
            .ok_or(ApiError::MissingRefreshToken)?;

        // Not retried: resubmitting a consumed refresh token cannot succeed
        let response: ApiResponse<RefreshData> = self
            .send_once(
                &Method::POST,
                REFRESH_ENDPOINT,
                None,
                Some(&serde_json::json!({ "refreshToken": refresh_token })),
            )
            .await?;
        let tokens = response.into_data("Refresh")?.tokens;

        self.tokens
            .save_tokens_to_storage(&tokens.access_token, &tokens.refresh_token)?;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        debug!("Access token refreshed");

        Ok(tokens)
    }
}

// ============================================================================
// Tests
// ============================================================================
