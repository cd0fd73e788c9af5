/// Client-side collaboration layer for Code-Sync
/// Authentication session, version/code-freeze coordination, realtime
/// transport and simulated test runs, shared by `Arc` handles.
use thiserror::Error;

mod config;
pub use config::*;

mod notify;
pub use notify::*;

mod session;
pub use session::*;

mod realtime;
pub use realtime::*;

mod ws;
pub use ws::*;

mod store;
pub use store::*;

mod freeze;
pub use freeze::*;

mod versions;
pub use versions::*;

mod test_lab;
pub use test_lab::*;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("remote returned {status}{}", server_suffix(.message))]
    Remote {
        status: u16,
        message: Option<String>,
    },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid file tree: {0}")]
    InvalidFileTree(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("invalid operation: {0}")]
    InvalidOp(String),
}

impl CollaborationError {
    /// Message suitable for display: what the server said when it said
    /// anything, otherwise `fallback`.
    pub fn display_message(&self, fallback: &str) -> String {
        match self {
            Self::Remote {
                message: Some(message),
                ..
            } => message.clone(),
            Self::InvalidOp(message) | Self::NotFound(message) => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

impl From<reqwest::Error> for CollaborationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::SerializationError(e.to_string())
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CollaborationError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<workspace::WorkspaceError> for CollaborationError {
    fn from(e: workspace::WorkspaceError) -> Self {
        Self::InvalidFileTree(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

fn server_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}
