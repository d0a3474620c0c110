//! Error types shared across the session and request layers.
//!
//! ERROR HANDLING
//! ==============
//! Only two things surface as `Err` from `api_fetch`: the local
//! `NO_ACCESS_TOKEN` failure and transport errors from `reqwest`. Non-2xx
//! responses are returned as ordinary responses; the typed endpoint helpers
//! in `api` are the layer that converts them into `ApiError::Status`.

use reqwest::StatusCode;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code, HTTP status, and retryable flag for client errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn status(&self) -> Option<StatusCode> {
        None
    }

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Failures reading or writing persisted tokens.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("token storage io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("token storage file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_STORAGE_IO",
            Self::Corrupt(_) => "E_STORAGE_CORRUPT",
        }
    }
}

// =============================================================================
// API
// =============================================================================

/// Failures from authenticated requests and the typed endpoint helpers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No access token was held and a refresh could not produce one.
    #[error("no access token available")]
    NoAccessToken,

    /// The held access token cannot be sent as an `Authorization` header.
    #[error("access token is not a valid header value")]
    InvalidAccessToken,

    /// The underlying HTTP transport failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A typed endpoint received a non-success status.
    #[error("request failed with status {status}")]
    Status { status: StatusCode, body: String },

    /// A request URL could not be resolved against the base URL.
    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    /// A response body could not be decoded into the expected shape.
    #[error("response parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    /// Persisting tokens after login or registration failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoAccessToken => "NO_ACCESS_TOKEN",
            Self::InvalidAccessToken => "E_INVALID_ACCESS_TOKEN",
            Self::Http(_) => "E_HTTP",
            Self::Status { .. } => "E_STATUS",
            Self::InvalidUrl(_) => "E_INVALID_URL",
            Self::Parse(_) => "E_PARSE",
            Self::Storage(e) => e.error_code(),
        }
    }

    fn status(&self) -> Option<StatusCode> {
        match self {
            Self::NoAccessToken => Some(StatusCode::UNAUTHORIZED),
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status(),
            _ => None,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => status.as_u16() == 429 || status.is_server_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
