//! Coalesced access-token refresh.
//!
//! ARCHITECTURE
//! ============
//! Every request path that needs a new access token goes through one
//! `RefreshCoordinator`, owned by the `AuthStore`. The coordinator holds at
//! most one pending refresh as a `Shared` future: the first caller creates
//! it, concurrent callers clone and await the same future, and all of them
//! observe the same `Option<String>` result.
//!
//! The check-then-create step runs under a mutex since requests may run on
//! any runtime worker thread. The slot is cleared by the refresh future
//! itself when it completes, so a 401 arriving after that starts a new
//! refresh rather than reusing a stale result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::store::TokenRefresher;

type PendingRefresh = Shared<BoxFuture<'static, Option<String>>>;

/// Single-flight gate for token refreshes.
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Arc<Mutex<Option<PendingRefresh>>>,
    started: AtomicU64,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending refresh, or start one with `refresher` if none is
    /// pending. `refresher` is ignored when joining.
    pub async fn refresh(&self, refresher: Arc<dyn TokenRefresher>) -> Option<String> {
        let pending = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pending) = slot.as_ref() {
                tracing::debug!("joining in-flight token refresh");
                pending.clone()
            } else {
                let release = Arc::clone(&self.in_flight);
                let pending = async move {
                    let token = refresher.refresh_access_token().await;
                    *release.lock().unwrap_or_else(PoisonError::into_inner) = None;
                    token
                }
                .boxed()
                .shared();
                *slot = Some(pending.clone());
                let n = self.started.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(refresh = n, "starting token refresh");
                pending
            }
        };
        pending.await
    }

    /// Whether a refresh is currently pending.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Number of refreshes started since creation (joins are not counted).
    #[must_use]
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &self.in_flight())
            .field("started", &self.refreshes_started())
            .finish()
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
