/// Version coordination: saved snapshots of the file tree, the current
/// version pointer, and the code freeze flag.
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use workspace::{FileTree, FileTreeProvider};

use crate::{
    CodeFreeze, CollaborationError, EventHandler, NewVersion, Notifier, RealtimeChannel, Result,
    SessionProvider, SocketEvent, SubscriptionId, VersionStore,
};

/// Named, immutable snapshot of the project tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeVersion {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    /// Absent in list responses from some stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_structure: Option<FileTree>,
}

/// What the UI renders: the collection plus the outcome of the last call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionState {
    pub versions: Vec<CodeVersion>,
    pub current_version: Option<CodeVersion>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl VersionState {
    pub fn find(&self, id: &str) -> Option<&CodeVersion> {
        self.versions.iter().find(|v| v.id == id)
    }
}

const FETCH_FAILED: &str = "Failed to fetch versions";
const CREATE_FAILED: &str = "Failed to create version";
const SWITCH_FAILED: &str = "Failed to switch version";
const DELETE_FAILED: &str = "Failed to delete version";
const TOGGLE_FAILED: &str = "Failed to toggle code freeze";

/// Mediates every version lifecycle call and the code freeze toggle.
///
/// Operations take `&self` and may interleave: each completed response is
/// applied to the state as it arrives, list updates keyed by version id.
/// Nothing is cancellable.
pub struct VersionCoordinator {
    store: Arc<dyn VersionStore>,
    session: Arc<dyn SessionProvider>,
    files: Arc<dyn FileTreeProvider>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    notifier: Arc<dyn Notifier>,
    state: Arc<RwLock<VersionState>>,
    freeze: Arc<RwLock<CodeFreeze>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl VersionCoordinator {
    pub fn new(
        store: Arc<dyn VersionStore>,
        session: Arc<dyn SessionProvider>,
        files: Arc<dyn FileTreeProvider>,
        channel: Option<Arc<dyn RealtimeChannel>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            session,
            files,
            channel,
            notifier,
            state: Arc::new(RwLock::new(VersionState::default())),
            freeze: Arc::new(RwLock::new(CodeFreeze::inactive())),
            subscription: Mutex::new(None),
        }
    }

    /// Listen for freeze broadcasts and load the version list when a user
    /// is signed in.
    pub async fn start(&self) {
        self.listen_for_freeze_updates();

        if self.session.is_authenticated() {
            if let Err(e) = self.fetch_versions().await {
                debug!("initial version fetch failed: {}", e);
            }
        }
    }

    /// Stop listening for freeze broadcasts. In-flight calls still land.
    pub fn stop(&self) {
        if let (Some(channel), Some(id)) = (&self.channel, self.subscription.lock().take()) {
            channel.unsubscribe_handler(id);
            debug!("stopped listening for code freeze updates");
        }
    }

    fn listen_for_freeze_updates(&self) {
        let Some(channel) = &self.channel else {
            return;
        };

        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }

        let freeze = Arc::clone(&self.freeze);
        let notifier = Arc::clone(&self.notifier);
        let handler: EventHandler = Arc::new(move |payload: &serde_json::Value| {
            apply_remote_freeze(&freeze, notifier.as_ref(), payload);
        });

        *subscription = Some(channel.subscribe(SocketEvent::CodeFreezeUpdate.as_str(), handler));
    }

    pub fn state(&self) -> VersionState {
        self.state.read().clone()
    }

    pub fn versions(&self) -> Vec<CodeVersion> {
        self.state.read().versions.clone()
    }

    pub fn current_version(&self) -> Option<CodeVersion> {
        self.state.read().current_version.clone()
    }

    pub fn code_freeze(&self) -> CodeFreeze {
        self.freeze.read().clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze.read().is_active()
    }

    /// Replace the local collection with the store's list.
    pub async fn fetch_versions(&self) -> Result<VersionState> {
        let token = match self.authenticated_token() {
            Some(token) => token,
            None => return Err(CollaborationError::NotAuthenticated),
        };

        self.begin_loading();
        match self.store.list_versions(&token).await {
            Ok(listing) => {
                let mut state = self.state.write();
                *state = VersionState {
                    versions: listing.versions,
                    current_version: listing.current_version,
                    is_loading: false,
                    error: None,
                };
                info!("Fetched {} versions", state.versions.len());
                Ok(state.clone())
            }
            Err(e) => {
                error!("Failed to fetch versions: {}", e);
                self.fail_loading(e.display_message(FETCH_FAILED));
                Err(e)
            }
        }
    }

    /// Save the current file tree as a new version and make it current.
    pub async fn create_version(&self, name: &str, description: &str) -> Result<CodeVersion> {
        let token = match (self.authenticated_token(), self.session.current_user()) {
            (Some(token), Some(_)) => token,
            _ => return Err(self.reject("You must be logged in to create a version")),
        };

        self.begin_loading();
        let request = NewVersion {
            name: name.to_string(),
            description: description.to_string(),
            file_structure: self.files.snapshot(),
        };

        match self.store.create_version(&token, request).await {
            Ok(created) => {
                {
                    let mut state = self.state.write();
                    state.versions.push(created.clone());
                    state.current_version = Some(created.clone());
                    state.is_loading = false;
                    state.error = None;
                }
                info!("Created version {} ({})", created.name, created.id);
                self.notifier
                    .success(&format!("Version \"{}\" created successfully", name));
                Ok(created)
            }
            Err(e) => Err(self.fail_operation(e, CREATE_FAILED)),
        }
    }

    /// Replace the whole live file tree with a stored snapshot. Unsaved
    /// edits are discarded.
    pub async fn switch_version(&self, version_id: &str) -> Result<CodeVersion> {
        let token = match self.authenticated_token() {
            Some(token) => token,
            None => return Err(self.reject("You must be logged in to switch versions")),
        };

        self.begin_loading();
        let fetched = self
            .store
            .get_version(&token, version_id)
            .await
            .and_then(|version| match version.file_structure.clone() {
                Some(tree) => Ok((version, tree)),
                None => Err(CollaborationError::InvalidFileTree(format!(
                    "version {} has no file snapshot",
                    version_id
                ))),
            });

        match fetched {
            Ok((version, tree)) => {
                self.files.replace(tree);
                {
                    let mut state = self.state.write();
                    state.current_version = Some(version.clone());
                    state.is_loading = false;
                    state.error = None;
                }
                info!("Switched to version {} ({})", version.name, version.id);
                self.notifier
                    .success(&format!("Switched to version \"{}\"", version.name));
                Ok(version)
            }
            Err(e) => Err(self.fail_operation(e, SWITCH_FAILED)),
        }
    }

    /// Delete a version; clears the current pointer only if it pointed at it.
    pub async fn delete_version(&self, version_id: &str) -> Result<()> {
        let token = match self.authenticated_token() {
            Some(token) => token,
            None => return Err(self.reject("You must be logged in to delete a version")),
        };

        self.begin_loading();
        match self.store.delete_version(&token, version_id).await {
            Ok(()) => {
                {
                    let mut state = self.state.write();
                    state.versions.retain(|v| v.id != version_id);
                    if state
                        .current_version
                        .as_ref()
                        .is_some_and(|v| v.id == version_id)
                    {
                        state.current_version = None;
                    }
                    state.is_loading = false;
                    state.error = None;
                }
                info!("Deleted version {}", version_id);
                self.notifier.success("Version deleted successfully");
                Ok(())
            }
            Err(e) => Err(self.fail_operation(e, DELETE_FAILED)),
        }
    }

    /// Flip the freeze flag locally and broadcast the new value.
    pub async fn toggle_code_freeze(&self, reason: Option<String>) -> Result<CodeFreeze> {
        let user = match (self.session.is_authenticated(), self.session.current_user()) {
            (true, Some(user)) => user,
            _ => return Err(self.reject("You must be logged in to toggle code freeze")),
        };

        let next = {
            let mut freeze = self.freeze.write();
            *freeze = freeze.toggled(&user.username, Utc::now(), reason);
            freeze.clone()
        };

        if let Some(channel) = &self.channel {
            let sent = serde_json::to_value(&next)
                .map_err(CollaborationError::from)
                .and_then(|payload| {
                    channel.emit(SocketEvent::CodeFreezeUpdate.as_str(), payload)
                });

            if let Err(e) = sent {
                warn!("Failed to broadcast code freeze: {}", e);
                self.notifier.error(TOGGLE_FAILED);
                return Err(e);
            }
        }

        if next.is_active() {
            info!("Code freeze activated by {}", user.username);
            self.notifier.success("Code freeze activated");
        } else {
            info!("Code freeze deactivated by {}", user.username);
            self.notifier.success("Code freeze deactivated");
        }
        Ok(next)
    }

    /// Apply a freeze value received from another client.
    pub fn receive_code_freeze(&self, payload: &serde_json::Value) {
        apply_remote_freeze(&self.freeze, self.notifier.as_ref(), payload);
    }

    fn authenticated_token(&self) -> Option<String> {
        if !self.session.is_authenticated() {
            return None;
        }
        self.session.token()
    }

    fn reject(&self, message: &str) -> CollaborationError {
        warn!("{}", message);
        self.notifier.error(message);
        CollaborationError::NotAuthenticated
    }

    fn begin_loading(&self) {
        self.state.write().is_loading = true;
    }

    fn fail_loading(&self, message: String) {
        let mut state = self.state.write();
        state.is_loading = false;
        state.error = Some(message);
    }

    fn fail_operation(&self, e: CollaborationError, fallback: &str) -> CollaborationError {
        error!("{}: {}", fallback, e);
        let message = e.display_message(fallback);
        self.fail_loading(message.clone());
        self.notifier.error(&message);
        e
    }
}

impl Drop for VersionCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_remote_freeze(
    freeze: &RwLock<CodeFreeze>,
    notifier: &dyn Notifier,
    payload: &serde_json::Value,
) {
    let update: CodeFreeze = match serde_json::from_value(payload.clone()) {
        Ok(update) => update,
        Err(e) => {
            warn!("Ignoring malformed code freeze update: {}", e);
            return;
        }
    };

    let announcement = update.announcement();
    let active = update.is_active();
    *freeze.write() = update;

    if active {
        notifier.error(&announcement);
    } else {
        notifier.success(&announcement);
    }
}
