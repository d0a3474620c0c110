//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse failed: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, without a trailing slash. Endpoint paths are appended to it.
    pub base_url: String,
    pub timeouts: Timeouts,
    /// Where persisted tokens live. `None` keeps them in memory only.
    pub token_file: Option<PathBuf>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: normalize_base_url(&base_url.into()), timeouts: Timeouts::default(), token_file: None }
    }

    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `INCIDENT_API_BASE_URL`: default `http://127.0.0.1:5000/api/v1`
    /// - `INCIDENT_REQUEST_TIMEOUT_SECS`: default 30
    /// - `INCIDENT_CONNECT_TIMEOUT_SECS`: default 10
    /// - `INCIDENT_TOKEN_FILE`: token file path; unset means in-memory tokens
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is not a positive integer or the result
    /// fails [`ClientConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("INCIDENT_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        let timeouts = Timeouts {
            request_secs: env_parse_secs("INCIDENT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse_secs("INCIDENT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let token_file = std::env::var_os("INCIDENT_TOKEN_FILE").filter(|v| !v.is_empty()).map(PathBuf::from);

        let config = Self { base_url: normalize_base_url(&base_url), timeouts, token_file };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings every construction path must satisfy.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not `http(s)` or a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Parse(format!("base URL must be http(s): {}", self.base_url)));
        }
        if self.timeouts.request_secs == 0 {
            return Err(ConfigError::Parse("request timeout must be a positive number of seconds".into()));
        }
        if self.timeouts.connect_secs == 0 {
            return Err(ConfigError::Parse("connect timeout must be a positive number of seconds".into()));
        }
        Ok(())
    }

    /// Build the shared HTTP client with the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(self.timeouts.connect_secs))
            .build()?;
        Ok(client)
    }

    /// Join an endpoint path onto the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn env_parse_secs(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::Parse(format!("{key} must be a positive integer, got '{raw}'"))),
            Ok(secs) => Ok(secs),
        },
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
