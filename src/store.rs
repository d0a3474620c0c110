//! Auth snapshot store with synchronous change notification.
//!
//! DESIGN
//! ======
//! `AuthStore` is the single shared mutable resource of the session layer.
//! It holds the current `{access_token, refresher, logout}` tuple and a list
//! of listeners. Writers replace the tuple wholesale; readers always get a
//! fresh `AuthSnapshot` value, so no reader ever sees a partial update.
//!
//! Listeners run synchronously, in registration order, on the thread that
//! performed the write, and before `set_auth_refresh` returns. They are
//! called with no store lock held, so a listener may read the store or
//! (un)subscribe. A panicking listener is logged and skipped; the rest still
//! run.
//!
//! TRADE-OFFS
//! ==========
//! The store is an explicit service object rather than hidden module state.
//! `AuthStore::global()` exists for hosts that want one per process, but all
//! consumers take a store by reference, which keeps tests isolated.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use crate::refresh::RefreshCoordinator;

// =============================================================================
// REFRESH + LOGOUT HOOKS
// =============================================================================

/// Something that can obtain a fresh access token.
///
/// Implementations absorb their own failures and report them as `None`.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(&self) -> Option<String>;
}

/// Refresher installed before any provider mounts. Always yields `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefresher;

#[async_trait::async_trait]
impl TokenRefresher for NoopRefresher {
    async fn refresh_access_token(&self) -> Option<String> {
        None
    }
}

/// Callback that forces the session into the logged-out state.
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

type Listener = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// AUTH STATE
// =============================================================================

/// The tuple held by the store. `is_logged_in` is not part of it; snapshots
/// derive it on read.
#[derive(Clone)]
pub struct AuthState {
    pub access_token: Option<String>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub logout: Option<LogoutHook>,
}

impl AuthState {
    pub fn new(access_token: Option<String>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { access_token, refresher, logout: None }
    }

    #[must_use]
    pub fn with_logout(mut self, logout: LogoutHook) -> Self {
        self.logout = Some(logout);
        self
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(None, Arc::new(NoopRefresher))
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("logout", &self.logout.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Read-only view of the store at one instant.
#[derive(Clone, Debug)]
pub struct AuthSnapshot {
    state: AuthState,
}

impl AuthSnapshot {
    #[must_use]
    pub fn new(state: AuthState) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.state.access_token.as_deref()
    }

    /// Always exactly `access_token().is_some()`.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.state.access_token.is_some()
    }

    #[must_use]
    pub fn refresher(&self) -> Arc<dyn TokenRefresher> {
        Arc::clone(&self.state.refresher)
    }

    /// Call the refresher captured in this snapshot directly, bypassing
    /// coalescing. Use `RefreshCoordinator::refresh` for request paths.
    pub async fn refresh_access_token(&self) -> Option<String> {
        self.state.refresher.refresh_access_token().await
    }

    #[must_use]
    pub fn has_logout(&self) -> bool {
        self.state.logout.is_some()
    }

    /// Invoke the logout hook if one is installed. Returns whether it ran.
    pub fn logout(&self) -> bool {
        match &self.state.logout {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

struct StoreInner {
    state: RwLock<AuthState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    refresh: RefreshCoordinator,
}

/// Shared, cloneable handle to one auth store.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<StoreInner>,
}

impl AuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(AuthState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                refresh: RefreshCoordinator::new(),
            }),
        }
    }

    /// Process-wide store, created on first use.
    pub fn global() -> &'static AuthStore {
        static GLOBAL: OnceLock<AuthStore> = OnceLock::new();
        GLOBAL.get_or_init(AuthStore::new)
    }

    /// Replace the stored tuple and notify every listener before returning.
    pub fn set_auth_refresh(&self, next: AuthState) {
        self.replace(next);
        self.notify();
    }

    /// Fresh snapshot of the current tuple.
    #[must_use]
    pub fn get_auth(&self) -> AuthSnapshot {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        AuthSnapshot::new(state.clone())
    }

    /// Register `listener`; it is called with no arguments after every write.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.push((id, Arc::new(listener)));
        Unsubscribe { store: Arc::downgrade(&self.inner), id, done: AtomicBool::new(false) }
    }

    /// Restore the initial tuple. Listeners stay registered and are not
    /// notified.
    pub fn reset_auth(&self) {
        self.replace(AuthState::default());
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// The single refresh slot shared by every request made against this store.
    #[must_use]
    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    pub(crate) fn downgrade(&self) -> WeakAuthStore {
        WeakAuthStore(Arc::downgrade(&self.inner))
    }

    pub(crate) fn replace(&self, next: AuthState) {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = next;
    }

    pub(crate) fn notify(&self) {
        let listeners: Vec<Listener> = {
            let listeners = self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::error!(listener = index, "auth listener panicked; continuing with remaining listeners");
            }
        }
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStore")
            .field("state", &*self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Non-owning store handle for callbacks registered inside the store itself.
#[derive(Clone)]
pub(crate) struct WeakAuthStore(Weak<StoreInner>);

impl WeakAuthStore {
    pub(crate) fn upgrade(&self) -> Option<AuthStore> {
        self.0.upgrade().map(|inner| AuthStore { inner })
    }
}

// =============================================================================
// UNSUBSCRIBE
// =============================================================================

/// Handle returned by [`AuthStore::subscribe`]. Dropping it leaves the
/// listener registered; call [`Unsubscribe::unsubscribe`] to remove it.
#[must_use = "the listener stays registered until `unsubscribe` is called"]
pub struct Unsubscribe {
    store: Weak<StoreInner>,
    id: u64,
    done: AtomicBool,
}

impl Unsubscribe {
    /// Remove exactly the listener this handle was created for. Later calls
    /// are no-ops.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|(id, _)| *id != self.id);
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
