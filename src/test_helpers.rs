//! In-process mock of the incident index API for async tests.
//!
//! Binds an axum router to `127.0.0.1:0` and records per-route hit counts,
//! the `Authorization` headers it saw, and the content types of requests to
//! `/protected`. Access tokens are accepted only if a login, register, or
//! refresh call minted them (or a test seeded them with `accept_token`).

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::config::ClientConfig;

pub(crate) const GOOD_PASSWORD: &str = "correct-horse";

#[derive(Clone, Debug)]
pub(crate) enum RefreshMode {
    /// Mint this access token (and accept it afterwards).
    Grant(String),
    /// Mint an access token and rotate the refresh token.
    GrantRotating { access: String, refresh: String },
    /// Respond 401.
    Reject,
    /// Respond 200 with a body that has no `access_token`.
    Malformed,
}

pub(crate) struct BackendState {
    pub refresh_calls: AtomicUsize,
    pub protected_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    refresh_mode: Mutex<RefreshMode>,
    refresh_delay: Mutex<Duration>,
    protected_delay: Mutex<Duration>,
    valid_tokens: Mutex<HashSet<String>>,
    seen_auth: Mutex<Vec<Option<String>>>,
    seen_refresh_bodies: Mutex<Vec<Value>>,
    seen_content_types: Mutex<Vec<Option<String>>>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_mode: Mutex::new(RefreshMode::Reject),
            refresh_delay: Mutex::new(Duration::ZERO),
            protected_delay: Mutex::new(Duration::ZERO),
            valid_tokens: Mutex::new(HashSet::new()),
            seen_auth: Mutex::new(Vec::new()),
            seen_refresh_bodies: Mutex::new(Vec::new()),
            seen_content_types: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) struct MockBackend {
    pub base_url: String,
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new(self.base_url.clone())
    }

    pub(crate) fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.state.refresh_mode.lock().unwrap() = mode;
    }

    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_protected_delay(&self, delay: Duration) {
        *self.state.protected_delay.lock().unwrap() = delay;
    }

    pub(crate) fn accept_token(&self, token: &str) {
        self.state.valid_tokens.lock().unwrap().insert(token.to_owned());
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn protected_calls(&self) -> usize {
        self.state.protected_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_auth(&self) -> Vec<Option<String>> {
        self.state.seen_auth.lock().unwrap().clone()
    }

    pub(crate) fn seen_refresh_bodies(&self) -> Vec<Value> {
        self.state.seen_refresh_bodies.lock().unwrap().clone()
    }

    pub(crate) fn seen_content_types(&self) -> Vec<Option<String>> {
        self.state.seen_content_types.lock().unwrap().clone()
    }
}

/// Start a mock backend on an ephemeral port. The server lives as long as
/// the test runtime.
pub(crate) async fn spawn_backend() -> MockBackend {
    let state = Arc::new(BackendState::default());
    let api = Router::new()
        .route("/auth/refresh", post(refresh))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/logout", post(logout))
        .route("/auth/whoami", get(whoami))
        .route("/protected", any(protected))
        .route("/officers/{uid}", get(officer))
        .route("/agencies/{uid}", get(agency))
        .route("/units/{uid}", get(unit))
        .route("/search", get(search))
        .with_state(Arc::clone(&state));
    let app = Router::new().nest("/api/v1", api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend { base_url: format!("http://{addr}/api/v1"), state }
}

// =============================================================================
// HANDLERS
// =============================================================================

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn authorized(state: &BackendState, headers: &HeaderMap) -> bool {
    bearer(headers).is_some_and(|t| state.valid_tokens.lock().unwrap().contains(&t))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token expired" }))).into_response()
}

fn mint(state: &BackendState, access: &str, refresh: &str) -> Response {
    state.valid_tokens.lock().unwrap().insert(access.to_owned());
    Json(json!({ "access_token": access, "refresh_token": refresh, "expires_in": 900 })).into_response()
}

async fn refresh(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    state.seen_refresh_bodies.lock().unwrap().push(body);
    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let mode = state.refresh_mode.lock().unwrap().clone();
    match mode {
        RefreshMode::Grant(token) => {
            state.valid_tokens.lock().unwrap().insert(token.clone());
            Json(json!({ "access_token": token, "expires_in": 900 })).into_response()
        }
        RefreshMode::GrantRotating { access, refresh } => mint(&state, &access, &refresh),
        RefreshMode::Reject => unauthorized(),
        RefreshMode::Malformed => Json(json!({ "token": "wrong-shape" })).into_response(),
    }
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    if body["password"] == GOOD_PASSWORD {
        mint(&state, "login-access", "login-refresh")
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid credentials" }))).into_response()
    }
}

async fn register(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    if body["email"].as_str().is_some_and(|e| e.contains('@')) {
        mint(&state, "register-access", "register-refresh")
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "message": "invalid email" }))).into_response()
    }
}

async fn logout(State(state): State<Arc<BackendState>>) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn whoami(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(json!({
        "uid": "user-1",
        "email": "analyst@example.org",
        "first_name": "Ada",
        "last_name": "Analyst",
        "role": "Public"
    }))
    .into_response()
}

async fn protected(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.protected_calls.fetch_add(1, Ordering::SeqCst);
    state.seen_auth.lock().unwrap().push(
        headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_owned),
    );
    state.seen_content_types.lock().unwrap().push(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_owned),
    );
    let delay = *state.protected_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(json!({ "ok": true })).into_response()
}

async fn officer(State(state): State<Arc<BackendState>>, headers: HeaderMap, Path(uid): Path<String>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    if uid == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "officer not found" }))).into_response();
    }
    Json(json!({
        "uid": uid,
        "first_name": "Jane",
        "last_name": "Doe",
        "ethnicity": "Unknown",
        "badge_history": [{ "badge_number": "1234" }]
    }))
    .into_response()
}

async fn agency(State(state): State<Arc<BackendState>>, headers: HeaderMap, Path(uid): Path<String>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(json!({ "uid": uid, "name": "Metro Police Department", "hq_city": "Springfield", "hq_state": "IL" }))
        .into_response()
}

async fn unit(State(state): State<Arc<BackendState>>, headers: HeaderMap, Path(uid): Path<String>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(json!({ "uid": uid, "name": "Precinct 9", "agency_uid": "agency-1" })).into_response()
}

async fn search(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let term = params.get("term").cloned().unwrap_or_default();
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    Json(json!({
        "results": [{
            "uid": "officer-7",
            "title": format!("Officer matching {term}"),
            "subtitle": "Metro Police Department",
            "content_type": "Officer",
            "source": "Public records",
            "last_updated": "2024-01-01"
        }],
        "page": page,
        "per_page": 20,
        "total": 1
    }))
    .into_response()
}
