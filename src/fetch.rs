//! Authenticated fetch with one-shot refresh-and-retry on 401.
//!
//! ARCHITECTURE
//! ============
//! `api_fetch` reads the store, attaches `Authorization: Bearer <token>`
//! (unless the caller already set one), and sends the request. On a 401 it
//! asks the store's `RefreshCoordinator` for a new token, so concurrent 401s
//! share a single refresh call, then retries exactly once with the result.
//!
//! ```text
//!   no token ──refresh──┬─ token ──> send
//!                       └─ none  ──> logout, Err(NoAccessToken)
//!   send ── 401 ──refresh──┬─ token ──> send again, return whatever comes back
//!                          └─ none  ──> logout, return the original 401
//!   send ── 401, store already holds a newer token ──> send again with it
//! ```
//!
//! ERROR HANDLING
//! ==============
//! Only `NoAccessToken`, an unsendable token, and transport failures are
//! errors. Every other status, including a 401 after the retry, is returned
//! to the caller.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::store::AuthStore;

// =============================================================================
// REQUEST DESCRIPTION
// =============================================================================

/// One field of a multipart form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartValue {
    Text(String),
    File { bytes: Vec<u8>, file_name: String, mime: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: MultipartValue::Text(value.into()) }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), value: MultipartValue::File { bytes, file_name: file_name.into(), mime: None } }
    }
}

/// Request body, kept in owned form so the retry can resend it.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
}

impl RequestBody {
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }
}

/// Method, headers, and body for one `api_fetch` call.
#[derive(Debug, Clone)]
pub struct RequestInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl Default for RequestInit {
    fn default() -> Self {
        Self { method: Method::GET, headers: HeaderMap::new(), body: None }
    }
}

impl RequestInit {
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn post(body: RequestBody) -> Self {
        Self { method: Method::POST, headers: HeaderMap::new(), body: Some(body) }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Cloneable authenticated HTTP client bound to one auth store.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    store: AuthStore,
    config: ClientConfig,
}

impl ApiClient {
    #[must_use]
    pub fn new(http: reqwest::Client, store: AuthStore, config: ClientConfig) -> Self {
        Self { http, store, config }
    }

    #[must_use]
    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    /// The underlying transport, for requests that must not carry a token.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send an authenticated request, refreshing and retrying once on 401.
    ///
    /// `url` is either absolute (`http://` / `https://`) or a path joined to
    /// the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NoAccessToken` when no token is held and none can be
    /// refreshed (no request is sent in that case),
    /// `ApiError::InvalidAccessToken` when the token cannot be put in a header,
    /// or `ApiError::Http` when the transport fails.
    pub async fn api_fetch(&self, url: &str, init: RequestInit) -> Result<Response, ApiError> {
        let url = self.resolve(url)?;

        let token = match self.store.get_auth().access_token() {
            Some(token) => token.to_owned(),
            None => {
                tracing::debug!(%url, "no access token; refreshing before request");
                match self.refresh().await {
                    Some(token) => token,
                    None => {
                        self.force_logout();
                        return Err(ApiError::NoAccessToken);
                    }
                }
            }
        };

        let response = self.send(&url, &init, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let current = self.store.get_auth().access_token().map(str::to_owned);
        let retry_token = match current {
            Some(current) if current != token => {
                tracing::debug!(%url, "access token replaced while request was in flight; retrying with it");
                Some(current)
            }
            _ => {
                tracing::info!(%url, "request unauthorized; refreshing access token");
                self.refresh().await
            }
        };
        let Some(token) = retry_token else {
            self.force_logout();
            return Ok(response);
        };
        self.send(&url, &init, &token).await
    }

    async fn refresh(&self) -> Option<String> {
        let refresher = self.store.get_auth().refresher();
        self.store.refresh_coordinator().refresh(refresher).await
    }

    fn force_logout(&self) {
        if self.store.get_auth().logout() {
            tracing::warn!("token refresh failed; session logged out");
        }
    }

    async fn send(&self, url: &str, init: &RequestInit, token: &str) -> Result<Response, ApiError> {
        let mut headers = init.headers.clone();
        if !headers.contains_key(AUTHORIZATION) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                tracing::warn!(%url, "access token is not a valid header value; request not sent");
                ApiError::InvalidAccessToken
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if init.body.as_ref().is_some_and(RequestBody::is_multipart) {
            // The transport sets multipart/form-data with its own boundary.
            headers.remove(CONTENT_TYPE);
        }

        let mut request = self.http.request(init.method.clone(), url).headers(headers);
        request = match &init.body {
            None => request,
            Some(RequestBody::Json(value)) => request.json(value),
            Some(RequestBody::Text(text)) => request.body(text.clone()),
            Some(RequestBody::Bytes(bytes)) => request.body(bytes.clone()),
            Some(RequestBody::Form(pairs)) => request.form(pairs),
            Some(RequestBody::Multipart(fields)) => request.multipart(multipart_form(fields)?),
        };

        let response = request.send().await?;
        tracing::debug!(%url, status = %response.status(), "api response");
        Ok(response)
    }

    fn resolve(&self, url: &str) -> Result<String, ApiError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ApiError::InvalidUrl("empty url".into()));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_owned());
        }
        if url.contains("://") {
            return Err(ApiError::InvalidUrl(format!("unsupported scheme: {url}")));
        }
        Ok(self.config.endpoint(url))
    }
}

fn multipart_form(fields: &[MultipartField]) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    for field in fields {
        form = match &field.value {
            MultipartValue::Text(text) => form.text(field.name.clone(), text.clone()),
            MultipartValue::File { bytes, file_name, mime } => {
                let mut part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    part = part.mime_str(mime)?;
                }
                form.part(field.name.clone(), part)
            }
        };
    }
    Ok(form)
}

#[cfg(test)]
#[path = "fetch_test.rs"]
mod tests;
