/// Client configuration shared by the auth session, version store and
/// realtime transport.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CollaborationError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_REALTIME_URL: &str = "ws://127.0.0.1:8080";

const ENV_API_URL: &str = "CODESYNC_BACKEND_URL";
const ENV_REALTIME_URL: &str = "CODESYNC_REALTIME_URL";
const ENV_TOKEN_PATH: &str = "CODESYNC_TOKEN_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the HTTP API (no trailing slash)
    pub api_url: String,

    /// WebSocket endpoint of the realtime relay
    pub realtime_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    pub user_agent: String,

    /// Where the bearer token is persisted between runs
    pub token_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            request_timeout_secs: 30,
            user_agent: format!("CodeSync/{}", env!("CARGO_PKG_VERSION")),
            token_path: default_token_path(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `CODESYNC_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(ENV_API_URL) {
            config = config.with_api_url(url);
        }
        if let Ok(url) = std::env::var(ENV_REALTIME_URL) {
            config = config.with_realtime_url(url);
        }
        if let Ok(path) = std::env::var(ENV_TOKEN_PATH) {
            config = config.with_token_path(PathBuf::from(path));
        }
        config
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_token_path(mut self, path: PathBuf) -> Self {
        self.token_path = path;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    /// URL of one item under `collection`, with `id` escaped as a single
    /// path segment.
    pub fn item_url(&self, collection: &str, id: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.endpoint(collection))
            .map_err(|e| CollaborationError::InvalidOp(format!("invalid API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                CollaborationError::InvalidOp(format!("API URL {} has no path", self.api_url))
            })?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.request_timeout())
            .build()
            .map_err(|e| CollaborationError::NetworkError(e.to_string()))
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| CollaborationError::StorageError(format!("Failed to write config: {}", e)))
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CollaborationError::StorageError(format!("Failed to read config: {}", e))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        let api_url = config.api_url.clone();
        Ok(config.with_api_url(api_url))
    }
}

fn default_token_path() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("codesync").join("auth_token")
}
