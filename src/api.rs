//! Typed endpoints of the incident index API.
//!
//! SYSTEM CONTEXT
//! ==============
//! Login, registration, profile, officer/agency/unit detail, and search
//! views all go through `IndexClient`. Authenticated calls use `api_fetch`,
//! so they share its refresh-and-retry behavior; login and registration are
//! sent without a token and store the returned grant through the provider.
//!
//! Unlike raw `api_fetch`, these helpers turn non-2xx responses into
//! `ApiError::Status` so callers can match on them.

use std::sync::Arc;

use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ClientConfig, ConfigError};
use crate::error::{ApiError, StorageError};
use crate::fetch::{ApiClient, RequestInit};
use crate::provider::{AuthProvider, SessionPhase, TokenGrant};
use crate::storage::TokenStorage;
use crate::store::AuthStore;

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// The signed-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Officer {
    pub uid: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub ethnicity: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    /// Fields this client does not model (employment history, allegations, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Officer {
    /// "First Middle Last Suffix", skipping missing parts.
    #[must_use]
    pub fn full_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.last_name, &self.suffix]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A law enforcement organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub hq_city: Option<String>,
    #[serde(default)]
    pub hq_state: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub agency_uid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub uid: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub content_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

// =============================================================================
// CLIENT
// =============================================================================

/// Session-aware client for the incident index API.
#[derive(Clone, Debug)]
pub struct IndexClient {
    fetch: ApiClient,
    provider: AuthProvider,
}

impl IndexClient {
    /// Wire a store, provider, and fetch client over one HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, store: AuthStore, storage: Arc<dyn TokenStorage>) -> Result<Self, ConfigError> {
        let http = config.http_client()?;
        let provider = AuthProvider::new(store.clone(), storage, http.clone(), &config);
        let fetch = ApiClient::new(http, store, config);
        Ok(Self { fetch, provider })
    }

    /// Hydrate the session from storage. Call once before other requests.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted tokens cannot be read.
    pub fn mount(&self) -> Result<SessionPhase, StorageError> {
        self.provider.mount()
    }

    #[must_use]
    pub fn provider(&self) -> &AuthProvider {
        &self.provider
    }

    #[must_use]
    pub fn fetch(&self) -> &ApiClient {
        &self.fetch
    }

    #[must_use]
    pub fn store(&self) -> &AuthStore {
        self.fetch.store()
    }

    /// Exchange credentials for tokens and start a session.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Status` on rejected credentials, or a transport,
    /// parse, or storage error.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let grant: TokenGrant = self.post_unauthenticated("/auth/login", &body).await?;
        self.provider.apply_grant(&grant)?;
        tracing::info!("logged in");
        Ok(())
    }

    /// Create an account and start a session with the returned tokens.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Status` if the backend rejects the registration, or
    /// a transport, parse, or storage error.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let grant: TokenGrant = self.post_unauthenticated("/auth/register", request).await?;
        self.provider.apply_grant(&grant)?;
        tracing::info!("registered and logged in");
        Ok(())
    }

    /// Tell the backend the session ended (best effort), then clear it locally.
    ///
    /// # Errors
    ///
    /// Returns an error only if local token storage cannot be cleared.
    pub async fn logout(&self) -> Result<(), StorageError> {
        if let Some(token) = self.provider.access_token() {
            let url = self.fetch.config().endpoint("/auth/logout");
            let result = self.http().post(url).bearer_auth(token).send().await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::debug!(status = %response.status(), "backend logout not acknowledged");
                }
                Err(e) => tracing::debug!(error = %e, "backend logout failed"),
                Ok(_) => {}
            }
        }
        self.provider.logout()
    }

    /// # Errors
    ///
    /// Returns `ApiError::NoAccessToken` when logged out, or a status,
    /// transport, or parse error.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get_json("/auth/whoami").await
    }

    /// # Errors
    ///
    /// Returns `ApiError::Status` with 404 for unknown officers, or any
    /// `api_fetch` error.
    pub async fn officer(&self, uid: &str) -> Result<Officer, ApiError> {
        let url = self.resource_url("officers", uid)?;
        self.get_json(&url).await
    }

    /// # Errors
    ///
    /// Returns `ApiError::Status` for unknown agencies, or any `api_fetch` error.
    pub async fn agency(&self, uid: &str) -> Result<Agency, ApiError> {
        let url = self.resource_url("agencies", uid)?;
        self.get_json(&url).await
    }

    /// # Errors
    ///
    /// Returns `ApiError::Status` for unknown units, or any `api_fetch` error.
    pub async fn unit(&self, uid: &str) -> Result<Unit, ApiError> {
        let url = self.resource_url("units", uid)?;
        self.get_json(&url).await
    }

    /// Full-text search across officers, agencies, and units.
    ///
    /// # Errors
    ///
    /// Returns any `api_fetch` error or a non-2xx status.
    pub async fn search(&self, term: &str, page: u32) -> Result<SearchPage, ApiError> {
        let endpoint = self.fetch.config().endpoint("/search");
        let page = page.max(1).to_string();
        let url = Url::parse_with_params(&endpoint, &[("term", term), ("page", page.as_str())])
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        self.get_json(url.as_str()).await
    }

    /// Authenticated GET returning the raw response, for ad-hoc paths.
    ///
    /// # Errors
    ///
    /// Returns any `api_fetch` error.
    pub async fn get_raw(&self, path: &str) -> Result<Response, ApiError> {
        self.fetch.api_fetch(path, RequestInit::get()).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.fetch.api_fetch(url, RequestInit::get()).await?;
        decode(response).await
    }

    async fn post_unauthenticated<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.fetch.config().endpoint(path);
        let response = self.http().post(url).json(body).send().await?;
        decode(response).await
    }

    fn resource_url(&self, collection: &str, uid: &str) -> Result<String, ApiError> {
        let mut url =
            Url::parse(&self.fetch.config().endpoint(collection)).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(format!("base url cannot hold paths: {collection}")))?
            .push(uid);
        Ok(url.into())
    }

    fn http(&self) -> &reqwest::Client {
        self.fetch.http()
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        tracing::debug!(%status, "api request failed");
        return Err(ApiError::Status { status, body });
    }
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
