//! Reactive binding from the auth store to a consumer-local value.
//!
//! SYSTEM CONTEXT
//! ==============
//! Views and long-running tasks hold an `AuthBinding` to follow session
//! changes (e.g. to redirect on forced logout) without polling the store.
//! Each binding reads the store once on creation, then republishes every
//! notification through a `watch` channel. Dropping the binding deregisters
//! its listener.

use tokio::sync::watch;

use crate::store::{AuthSnapshot, AuthStore, Unsubscribe};

/// A live, per-instance copy of the store's snapshot.
pub struct AuthBinding {
    rx: watch::Receiver<AuthSnapshot>,
    subscription: Unsubscribe,
}

impl AuthBinding {
    #[must_use]
    pub fn new(store: &AuthStore) -> Self {
        let (tx, rx) = watch::channel(store.get_auth());
        let weak = store.downgrade();
        let subscription = store.subscribe(move || {
            if let Some(store) = weak.upgrade() {
                tx.send_replace(store.get_auth());
            }
        });
        Self { rx, subscription }
    }

    /// The value as of the last notification.
    #[must_use]
    pub fn current(&self) -> AuthSnapshot {
        self.rx.borrow().clone()
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.rx.borrow().is_logged_in()
    }

    /// Wait for the next store notification and return the new value.
    pub async fn changed(&mut self) -> AuthSnapshot {
        // The sender lives in the store's listener list, which this binding
        // keeps registered; a closed channel means the store was dropped.
        if self.rx.changed().await.is_err() {
            tracing::debug!("auth store dropped; binding keeps its last value");
        }
        self.rx.borrow_and_update().clone()
    }

    /// An independent receiver for fan-out to other tasks.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.rx.clone()
    }
}

impl Drop for AuthBinding {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl std::fmt::Debug for AuthBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBinding").field("current", &*self.rx.borrow()).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "binding_test.rs"]
mod tests;
