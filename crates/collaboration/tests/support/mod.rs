//! Stub of the Code-Sync API for integration tests
#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use collaboration::{
    AuthResponse, AuthUser, ClientConfig, CodeVersion, LoginCredentials, NewVersion,
    RegisterCredentials, VersionListing,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PASSWORD: &str = "secret";
pub const ALICE_TOKEN: &str = "token-alice";

#[derive(Default)]
pub struct StubState {
    /// email -> (password, user)
    pub accounts: HashMap<String, (String, AuthUser)>,
    /// token -> user
    pub sessions: HashMap<String, AuthUser>,
    pub versions: Vec<CodeVersion>,
    pub current: Option<String>,
    /// Authorization headers seen, in order
    pub authorizations: Vec<String>,
    /// When set, the next request answers 500 with an empty body
    pub fail_next: bool,
}

pub type Shared = Arc<Mutex<StubState>>;

pub struct StubBackend {
    pub url: String,
    pub state: Shared,
    handle: JoinHandle<()>,
}

impl StubBackend {
    /// Serve on an ephemeral port with one account, alice.
    pub async fn start() -> Self {
        let alice = AuthUser {
            id: "u-alice".to_string(),
            email: ALICE_EMAIL.to_string(),
            username: "alice".to_string(),
            avatar: None,
            is_admin: false,
        };

        let mut stub = StubState::default();
        stub.accounts
            .insert(ALICE_EMAIL.to_string(), (ALICE_PASSWORD.to_string(), alice.clone()));
        stub.sessions.insert(ALICE_TOKEN.to_string(), alice);
        let state = Arc::new(Mutex::new(stub));

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/register", post(register))
            .route("/auth/me", get(me))
            .route("/versions", get(list_versions).post(create_version))
            .route("/versions/:id", get(get_version).delete(delete_version))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_api_url(self.url.clone())
            .with_timeout(5)
    }

    pub fn fail_next(&self) {
        self.state.lock().fail_next = true;
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.state.lock().authorizations.clone()
    }

    pub fn version_count(&self) -> usize {
        self.state.lock().versions.len()
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn injected_failure(state: &mut StubState) -> Option<Response> {
    if state.fail_next {
        state.fail_next = false;
        return Some(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }
    None
}

/// Resolve the bearer token to a user, recording the header.
fn authorize(state: &mut StubState, headers: &HeaderMap) -> Result<AuthUser, Response> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.authorizations.push(header.clone());

    header
        .strip_prefix("Bearer ")
        .and_then(|token| state.sessions.get(token).cloned())
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Invalid token"))
}

async fn login(State(state): State<Shared>, Json(creds): Json<LoginCredentials>) -> Response {
    let mut state = state.lock();
    if let Some(failure) = injected_failure(&mut state) {
        return failure;
    }

    match state.accounts.get(&creds.email) {
        Some((password, user)) if *password == creds.password => {
            let user = user.clone();
            let token = format!("token-{}", user.username);
            state.sessions.insert(token.clone(), user.clone());
            Json(AuthResponse { token, user }).into_response()
        }
        _ => error(StatusCode::UNAUTHORIZED, "Invalid email or password"),
    }
}

async fn register(
    State(state): State<Shared>,
    Json(creds): Json<RegisterCredentials>,
) -> Response {
    let mut state = state.lock();
    if let Some(failure) = injected_failure(&mut state) {
        return failure;
    }

    if state.accounts.contains_key(&creds.email) {
        return error(StatusCode::CONFLICT, "Email already registered");
    }

    let user = AuthUser {
        id: format!("u-{}", creds.username),
        email: creds.email.clone(),
        username: creds.username.clone(),
        avatar: None,
        is_admin: false,
    };
    let token = format!("token-{}", creds.username);
    state
        .accounts
        .insert(creds.email, (creds.password, user.clone()));
    state.sessions.insert(token.clone(), user.clone());
    Json(AuthResponse { token, user }).into_response()
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock();
    match authorize(&mut state, &headers) {
        Ok(user) => Json(user).into_response(),
        Err(response) => response,
    }
}

async fn list_versions(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    if let Some(failure) = injected_failure(&mut state) {
        return failure;
    }

    let current_version = state
        .current
        .as_ref()
        .and_then(|id| state.versions.iter().find(|v| &v.id == id))
        .cloned();
    Json(VersionListing {
        versions: state.versions.clone(),
        current_version,
    })
    .into_response()
}

async fn create_version(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<NewVersion>,
) -> Response {
    let mut state = state.lock();
    let user = match authorize(&mut state, &headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Some(failure) = injected_failure(&mut state) {
        return failure;
    }

    if state.versions.iter().any(|v| v.name == body.name) {
        return error(StatusCode::CONFLICT, "Version name already taken");
    }

    let version = CodeVersion {
        id: format!("v-{}", state.versions.len() + 1),
        name: body.name,
        description: body.description,
        created_at: chrono::Utc::now(),
        created_by: user.username,
        file_structure: Some(body.file_structure),
    };
    state.current = Some(version.id.clone());
    state.versions.push(version.clone());
    (StatusCode::CREATED, Json(version)).into_response()
}

async fn get_version(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    if let Some(failure) = injected_failure(&mut state) {
        return failure;
    }

    match state.versions.iter().find(|v| v.id == id).cloned() {
        Some(version) => {
            state.current = Some(version.id.clone());
            Json(version).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "Version not found"),
    }
}

async fn delete_version(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, &headers) {
        return response;
    }
    if let Some(failure) = injected_failure(&mut state) {
        return failure;
    }

    let before = state.versions.len();
    state.versions.retain(|v| v.id != id);
    if state.versions.len() == before {
        return error(StatusCode::NOT_FOUND, "Version not found");
    }
    if state.current.as_deref() == Some(id.as_str()) {
        state.current = None;
    }
    StatusCode::NO_CONTENT.into_response()
}
