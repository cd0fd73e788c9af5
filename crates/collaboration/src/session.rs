/// Authentication session: signed-in user, bearer token and its persistence
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::check_response;
use crate::{ClientConfig, CollaborationError, Notifier, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Field-wise update of [`AuthUser`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUserPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub is_admin: Option<bool>,
}

impl AuthUser {
    pub fn apply(&mut self, patch: AuthUserPatch) {
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(username) = patch.username {
            self.username = username;
        }
        if let Some(avatar) = patch.avatar {
            self.avatar = Some(avatar);
        }
        if let Some(is_admin) = patch.is_admin {
            self.is_admin = is_admin;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCredentials {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for AuthState {
    /// Loading until the persisted token has been checked.
    fn default() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: true,
            error: None,
        }
    }
}

impl AuthState {
    fn signed_in(user: AuthUser) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
            is_loading: false,
            error: None,
        }
    }

    fn signed_out(error: Option<String>) -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: false,
            error,
        }
    }
}

/// Body of a successful login or registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: AuthUser,
}

/// Who is acting, as seen by the coordinators
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    fn is_authenticated(&self) -> bool;

    fn token(&self) -> Option<String>;

    fn display_name(&self) -> String {
        self.current_user()
            .map(|u| u.username)
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

/// Fixed identity, for embedders that authenticate elsewhere
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user: Option<AuthUser>,
    token: Option<String>,
}

impl StaticSession {
    pub fn authenticated(user: AuthUser, token: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.is_some()
    }

    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;

    async fn save(&self, token: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Token kept as plain text in a single file
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollaborationError::StorageError(e.to_string())),
        }
    }

    async fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CollaborationError::StorageError(e.to_string()))?;
        }
        tokio::fs::write(&self.path, token)
            .await
            .map_err(|e| CollaborationError::StorageError(e.to_string()))?;
        debug!("Saved auth token to {:?}", self.path);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CollaborationError::StorageError(e.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().clone())
    }

    async fn save(&self, token: &str) -> Result<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

const SESSION_EXPIRED: &str = "Session expired. Please login again.";
const LOGIN_FAILED: &str = "Login failed. Please try again.";
const REGISTER_FAILED: &str = "Registration failed. Please try again.";

/// Session backed by the auth endpoints of the API
pub struct AuthSession {
    config: ClientConfig,
    client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    state: RwLock<AuthState>,
    token: RwLock<Option<String>>,
}

impl AuthSession {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self {
            config,
            client,
            tokens,
            notifier,
            state: RwLock::new(AuthState::default()),
            token: RwLock::new(None),
        })
    }

    pub fn state(&self) -> AuthState {
        self.state.read().clone()
    }

    /// Resume a persisted session. A token the server rejects is discarded.
    pub async fn restore(&self) -> Option<AuthUser> {
        let token = match self.tokens.load().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.state.write().is_loading = false;
                return None;
            }
            Err(e) => {
                warn!("Failed to read auth token: {}", e);
                self.state.write().is_loading = false;
                return None;
            }
        };

        match self.fetch_me(&token).await {
            Ok(user) => {
                info!("Restored session for {}", user.username);
                *self.token.write() = Some(token);
                *self.state.write() = AuthState::signed_in(user.clone());
                Some(user)
            }
            Err(e) => {
                warn!("Stored session rejected: {}", e);
                if let Err(e) = self.tokens.clear().await {
                    warn!("Failed to clear auth token: {}", e);
                }
                *self.token.write() = None;
                *self.state.write() = AuthState::signed_out(Some(SESSION_EXPIRED.to_string()));
                None
            }
        }
    }

    async fn fetch_me(&self, token: &str) -> Result<AuthUser> {
        let url = self.config.endpoint("auth/me");
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;

        let user: AuthUser = check_response(response).await?.json().await?;
        Ok(user)
    }

    pub async fn login(&self, credentials: LoginCredentials) -> Result<AuthUser> {
        let result = self.authenticate("auth/login", &credentials).await;
        match result {
            Ok(user) => {
                self.notifier
                    .success(&format!("Welcome back, {}!", user.username));
                Ok(user)
            }
            Err(e) => Err(self.fail(e, LOGIN_FAILED)),
        }
    }

    pub async fn register(&self, credentials: RegisterCredentials) -> Result<AuthUser> {
        let result = self.authenticate("auth/register", &credentials).await;
        match result {
            Ok(user) => {
                self.notifier.success(&format!("Welcome, {}!", user.username));
                Ok(user)
            }
            Err(e) => Err(self.fail(e, REGISTER_FAILED)),
        }
    }

    async fn authenticate<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<AuthUser> {
        {
            let mut state = self.state.write();
            state.is_loading = true;
            state.error = None;
        }

        let url = self.config.endpoint(path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        let body: AuthResponse = check_response(response).await?.json().await?;
        let AuthResponse { token, user } = body;

        self.tokens.save(&token).await?;
        *self.token.write() = Some(token);
        *self.state.write() = AuthState::signed_in(user.clone());
        info!("Signed in as {}", user.username);
        Ok(user)
    }

    fn fail(&self, e: CollaborationError, fallback: &str) -> CollaborationError {
        warn!("{}: {}", fallback, e);
        let message = e.display_message(fallback);
        {
            let mut state = self.state.write();
            state.is_loading = false;
            state.error = Some(message.clone());
        }
        self.notifier.error(&message);
        e
    }

    pub async fn logout(&self) -> Result<()> {
        let cleared = self.tokens.clear().await;
        *self.token.write() = None;
        *self.state.write() = AuthState::signed_out(None);
        info!("Signed out");
        self.notifier.success("You have been logged out.");
        cleared
    }

    /// Patch the signed-in user locally. No-op when nobody is signed in.
    pub fn update_user(&self, patch: AuthUserPatch) {
        if let Some(user) = self.state.write().user.as_mut() {
            user.apply(patch);
        }
    }
}

impl SessionProvider for AuthSession {
    fn current_user(&self) -> Option<AuthUser> {
        self.state.read().user.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.state.read().is_authenticated
    }

    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }
}
