//! Token lifecycle owner: hydration, persistence, logout, and refresh.
//!
//! ARCHITECTURE
//! ============
//! `AuthProvider` holds the access and refresh tokens, mirrors them into
//! `TokenStorage`, and pushes the access token into the `AuthStore` together
//! with its own refresher and logout hook. Those hooks keep only a weak
//! reference back to the provider, so the store never keeps a dropped
//! provider alive; after the provider is gone they resolve to no-ops.
//!
//! Every write takes the provider's token lock, writes storage first, then
//! replaces the store tuple. Listeners are notified after the lock is
//! released, so they may call back into the provider. An observer that sees
//! a cleared snapshot therefore always finds cleared storage as well.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are returned to the caller but never leave memory stale:
//! the in-memory session always takes the new value. Refresh failures
//! (transport error, non-2xx, malformed body) are absorbed into `None` and
//! clear the access token. The refresh token is kept on failure. A refresh
//! outcome is dropped if the refresh token changed while it was in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{ApiError, StorageError};
use crate::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TokenStorage};
use crate::store::{AuthState, AuthStore, LogoutHook, TokenRefresher};

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Token payload returned by login, registration, and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Where the provider is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// `mount` has not run; persisted tokens have not been read.
    Uninitialized,
    /// Mounted with a non-null access token.
    Authenticated,
    /// Mounted with no access token (the refresh token may still be held).
    Unauthenticated,
}

#[derive(Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

struct ProviderInner {
    store: AuthStore,
    storage: Arc<dyn TokenStorage>,
    http: reqwest::Client,
    refresh_url: String,
    tokens: Mutex<Tokens>,
    mounted: AtomicBool,
}

/// Cloneable handle to the session's token owner.
#[derive(Clone)]
pub struct AuthProvider {
    inner: Arc<ProviderInner>,
}

impl AuthProvider {
    pub fn new(
        store: AuthStore,
        storage: Arc<dyn TokenStorage>,
        http: reqwest::Client,
        config: &ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                store,
                storage,
                http,
                refresh_url: config.endpoint(REFRESH_PATH),
                tokens: Mutex::new(Tokens::default()),
                mounted: AtomicBool::new(false),
            }),
        }
    }

    /// Load persisted tokens and install this provider's hooks in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted tokens cannot be read; the provider stays
    /// uninitialized in that case.
    pub fn mount(&self) -> Result<SessionPhase, StorageError> {
        let access = self.inner.storage.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.inner.storage.get(REFRESH_TOKEN_KEY)?;
        {
            let mut tokens = self.lock_tokens();
            tokens.access = access;
            tokens.refresh = refresh;
            self.inner.store.replace(self.auth_state(tokens.access.clone()));
            self.inner.mounted.store(true, Ordering::Release);
        }
        self.inner.store.notify();

        let phase = self.phase();
        tracing::debug!(?phase, "auth provider mounted");
        Ok(phase)
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if !self.inner.mounted.load(Ordering::Acquire) {
            return SessionPhase::Uninitialized;
        }
        if self.is_logged_in() { SessionPhase::Authenticated } else { SessionPhase::Unauthenticated }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.lock_tokens().access.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.lock_tokens().refresh.clone()
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.lock_tokens().access.is_some()
    }

    #[must_use]
    pub fn store(&self) -> &AuthStore {
        &self.inner.store
    }

    /// Set or clear the access token, persisting the change and publishing it
    /// to the store.
    ///
    /// # Errors
    ///
    /// Returns an error if storage could not be updated. The in-memory session
    /// is updated regardless.
    pub fn set_access_token(&self, token: Option<String>) -> Result<(), StorageError> {
        let persisted = {
            let mut tokens = self.lock_tokens();
            let persisted = persist(self.inner.storage.as_ref(), ACCESS_TOKEN_KEY, token.as_deref());
            tokens.access = token;
            self.inner.store.replace(self.auth_state(tokens.access.clone()));
            persisted
        };
        self.inner.store.notify();
        persisted
    }

    /// Set or clear the refresh token. Independent of the access token and not
    /// visible through the store.
    ///
    /// # Errors
    ///
    /// Returns an error if storage could not be updated. The in-memory value
    /// is updated regardless.
    pub fn set_refresh_token(&self, token: Option<String>) -> Result<(), StorageError> {
        let mut tokens = self.lock_tokens();
        let persisted = persist(self.inner.storage.as_ref(), REFRESH_TOKEN_KEY, token.as_deref());
        tokens.refresh = token;
        persisted
    }

    /// Store both tokens from a login/registration/refresh grant.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub fn apply_grant(&self, grant: &TokenGrant) -> Result<(), StorageError> {
        let refreshed = match &grant.refresh_token {
            Some(refresh) => self.set_refresh_token(Some(refresh.clone())),
            None => Ok(()),
        };
        let access = self.set_access_token(Some(grant.access_token.clone()));
        refreshed.and(access)
    }

    /// Clear both tokens from memory, storage, and the store. Calling it when
    /// already logged out changes nothing and notifies no one.
    ///
    /// # Errors
    ///
    /// Returns an error if storage could not be cleared. Memory and the store
    /// are cleared regardless.
    pub fn logout(&self) -> Result<(), StorageError> {
        let (was_active, removed) = {
            let mut tokens = self.lock_tokens();
            let was_active = tokens.access.is_some() || tokens.refresh.is_some();
            let access = self.inner.storage.remove(ACCESS_TOKEN_KEY);
            let refresh = self.inner.storage.remove(REFRESH_TOKEN_KEY);
            *tokens = Tokens::default();
            if was_active {
                self.inner.store.replace(self.auth_state(None));
            }
            (was_active, access.and(refresh))
        };
        if was_active {
            self.inner.store.notify();
            tracing::info!("session cleared");
        }
        removed
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Returns `None` without any network call when no refresh token is held.
    /// On failure the access token is cleared and `None` is returned.
    ///
    /// The outcome is only applied if the session still holds the refresh
    /// token the request was sent with. A logout or login that lands while the
    /// request is in flight wins, and the session's current access token is
    /// returned instead.
    pub async fn refresh_access_token(&self) -> Option<String> {
        let Some(refresh_token) = self.refresh_token() else {
            tracing::debug!("no refresh token held; skipping refresh");
            return None;
        };

        match self.request_refresh(&refresh_token).await {
            Ok(grant) => {
                if let Some(expires_in) = grant.expires_in {
                    tracing::debug!(expires_in, "access token refreshed");
                } else {
                    tracing::debug!("access token refreshed");
                }
                self.commit_refresh(&refresh_token, Some(&grant))
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed; clearing access token");
                self.commit_refresh(&refresh_token, None)
            }
        }
    }

    /// Apply a refresh outcome (`None` = failed) if `sent` is still the held
    /// refresh token. Returns the access token the session ends up with.
    fn commit_refresh(&self, sent: &str, grant: Option<&TokenGrant>) -> Option<String> {
        let access = {
            let mut tokens = self.lock_tokens();
            if tokens.refresh.as_deref() != Some(sent) {
                tracing::debug!("session changed during token refresh; discarding result");
                return tokens.access.clone();
            }
            let storage = self.inner.storage.as_ref();
            if let Some(rotated) = grant.and_then(|g| g.refresh_token.as_deref()) {
                // persist() logs failures.
                let _ = persist(storage, REFRESH_TOKEN_KEY, Some(rotated));
                tokens.refresh = Some(rotated.to_owned());
            }
            let access = grant.map(|g| g.access_token.clone());
            let _ = persist(storage, ACCESS_TOKEN_KEY, access.as_deref());
            tokens.access.clone_from(&access);
            self.inner.store.replace(self.auth_state(access.clone()));
            access
        };
        self.inner.store.notify();
        access
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        let response = self
            .inner
            .http
            .post(&self.inner.refresh_url)
            .header(AUTHORIZATION, format!("Bearer {refresh_token}"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn auth_state(&self, access_token: Option<String>) -> AuthState {
        let weak = Arc::downgrade(&self.inner);
        AuthState::new(access_token, Arc::new(ProviderRefresher(weak.clone()))).with_logout(logout_hook(weak))
    }

    fn lock_tokens(&self) -> MutexGuard<'_, Tokens> {
        self.inner.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens = self.lock_tokens();
        f.debug_struct("AuthProvider")
            .field("refresh_url", &self.inner.refresh_url)
            .field("has_access_token", &tokens.access.is_some())
            .field("has_refresh_token", &tokens.refresh.is_some())
            .field("mounted", &self.inner.mounted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn persist(storage: &dyn TokenStorage, key: &str, value: Option<&str>) -> Result<(), StorageError> {
    let result = match value {
        Some(value) => storage.set(key, value),
        None => storage.remove(key),
    };
    if let Err(e) = &result {
        tracing::error!(key, error = %e, "token storage write failed");
    }
    result
}

// =============================================================================
// STORE HOOKS
// =============================================================================

struct ProviderRefresher(Weak<ProviderInner>);

#[async_trait::async_trait]
impl TokenRefresher for ProviderRefresher {
    async fn refresh_access_token(&self) -> Option<String> {
        let inner = self.0.upgrade()?;
        AuthProvider { inner }.refresh_access_token().await
    }
}

fn logout_hook(weak: Weak<ProviderInner>) -> LogoutHook {
    Arc::new(move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if let Err(e) = (AuthProvider { inner }).logout() {
            tracing::error!(error = %e, "forced logout could not clear token storage");
        }
    })
}

#[cfg(test)]
#[path = "provider_test.rs"]
mod tests;
