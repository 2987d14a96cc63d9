use thiserror::Error;

/// Failure taxonomy surfaced by the request pipeline.
///
/// Messages are derived from the HTTP status rather than leaking raw
/// transport errors; the original error is retained as the source where
/// one exists.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error - please check your connection")]
    Network(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Local storage failure: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data.
    /// The cut is moved back to a character boundary so a multibyte
    /// sequence straddling the limit cannot cause a slice panic.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 => ApiError::Validation(truncated),
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(truncated),
            404 => ApiError::NotFound(truncated),
            500..=599 => ApiError::Server(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout(error)
        } else {
            ApiError::Network(error)
        }
    }

    /// Whether the pipeline may retry the request. Only network-class
    /// failures and 5xx responses qualify; retrying a client error would
    /// not change the outcome and could duplicate side effects.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::Server(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "missing field"),
            ApiError::Validation(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, ""),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, ""),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::Server(_)
        ));
    }

    #[test]
    fn test_retry_eligibility() {
        assert!(ApiError::Server("boom".into()).is_retryable());
        assert!(!ApiError::Validation("bad".into()).is_retryable());
        assert!(!ApiError::Unauthorized.is_retryable());
        assert!(!ApiError::NotFound("".into()).is_retryable());
    }

    #[test]
    fn test_body_truncation() {
        let long = "x".repeat(2000);
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &long);
        let message = err.to_string();
        assert!(message.len() < 700);
        assert!(message.contains("truncated"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // A two-byte character straddles the truncation limit
        let mut body = "x".repeat(MAX_ERROR_BODY_LENGTH - 1);
        body.push_str(&"é".repeat(40));
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body);
        let message = err.to_string();
        assert!(message.contains("truncated"));

        // A localized error page made of multibyte characters only
        let body = "サーバーエラーが発生しました。".repeat(60);
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, &body);
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_rejection_is_not_retryable() {
        assert!(!ApiError::Rejected("quota exceeded".into()).is_retryable());
    }
}
