//! Session and request layer for the incident index web API.
//!
//! ARCHITECTURE
//! ============
//! ```text
//!   AuthProvider ──writes──> TokenStorage (memory / JSON file)
//!        │
//!        └──set_auth_refresh──> AuthStore ──notify──> listeners, AuthBinding
//!                                  │
//!   ApiClient::api_fetch ──reads───┘──> RefreshCoordinator (one refresh in flight)
//!        │
//!   IndexClient (login, search, officer/agency/unit lookups)
//! ```
//!
//! The store is the only shared mutable state. The provider owns the tokens
//! and installs its refresher and logout hook into the store; `api_fetch`
//! only talks to the store, so it never needs a handle to the provider.

pub mod api;
pub mod binding;
pub mod config;
pub mod error;
pub mod fetch;
pub mod provider;
pub mod refresh;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use api::IndexClient;
pub use binding::AuthBinding;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, ErrorCode, StorageError};
pub use fetch::{ApiClient, RequestBody, RequestInit};
pub use provider::{AuthProvider, SessionPhase, TokenGrant};
pub use refresh::RefreshCoordinator;
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
pub use store::{AuthSnapshot, AuthState, AuthStore, NoopRefresher, TokenRefresher, Unsubscribe};
