/// Remote version store: the system of record for saved versions
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use workspace::FileTree;

use crate::{ClientConfig, CodeVersion, CollaborationError, Result};

/// Response body of `GET /versions`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    #[serde(default)]
    pub versions: Vec<CodeVersion>,
    #[serde(default)]
    pub current_version: Option<CodeVersion>,
}

/// Request body of `POST /versions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVersion {
    pub name: String,
    pub description: String,
    pub file_structure: FileTree,
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn list_versions(&self, token: &str) -> Result<VersionListing>;

    async fn create_version(&self, token: &str, version: NewVersion) -> Result<CodeVersion>;

    /// Full record, snapshot included.
    async fn get_version(&self, token: &str, id: &str) -> Result<CodeVersion>;

    async fn delete_version(&self, token: &str, id: &str) -> Result<()>;
}

/// Error body shape used by the API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Turn a non-2xx response into [`CollaborationError::Remote`], keeping the
/// server's `message` when the body carries one.
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty());

    Err(CollaborationError::Remote {
        status: status.as_u16(),
        message,
    })
}

/// Version store over the HTTP API, bearer-token authenticated
pub struct HttpVersionStore {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpVersionStore {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }
}

#[async_trait]
impl VersionStore for HttpVersionStore {
    async fn list_versions(&self, token: &str) -> Result<VersionListing> {
        let url = self.config.endpoint("versions");
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;

        let listing: VersionListing = check_response(response).await?.json().await?;
        Ok(listing)
    }

    async fn create_version(&self, token: &str, version: NewVersion) -> Result<CodeVersion> {
        let url = self.config.endpoint("versions");
        debug!("POST {} ({} files)", url, version.file_structure.file_count());

        let response = self
            .client
            .post(&url)
            .header("Authorization", Self::bearer(token))
            .json(&version)
            .send()
            .await?;

        let created: CodeVersion = check_response(response).await?.json().await?;
        Ok(created)
    }

    async fn get_version(&self, token: &str, id: &str) -> Result<CodeVersion> {
        let url = self.config.item_url("versions", id)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;

        let version: CodeVersion = check_response(response).await?.json().await?;
        if version.file_structure.is_none() {
            return Err(CollaborationError::InvalidFileTree(format!(
                "version {} has no file snapshot",
                id
            )));
        }
        Ok(version)
    }

    async fn delete_version(&self, token: &str, id: &str) -> Result<()> {
        let url = self.config.item_url("versions", id)?;
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(url)
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;

        check_response(response).await?;
        Ok(())
    }
}

/// Store kept in process memory. Accepts any token.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    versions: Vec<CodeVersion>,
    current: Option<String>,
    calls: usize,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `versions`, none current.
    pub fn with_versions(versions: Vec<CodeVersion>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                versions,
                current: None,
                calls: 0,
            }),
        }
    }

    /// Number of store calls served so far.
    pub fn call_count(&self) -> usize {
        self.inner.lock().calls
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn list_versions(&self, _token: &str) -> Result<VersionListing> {
        let mut inner = self.inner.lock();
        inner.calls += 1;

        let current_version = inner
            .current
            .as_ref()
            .and_then(|id| inner.versions.iter().find(|v| &v.id == id))
            .cloned();

        Ok(VersionListing {
            versions: inner.versions.clone(),
            current_version,
        })
    }

    async fn create_version(&self, _token: &str, version: NewVersion) -> Result<CodeVersion> {
        let mut inner = self.inner.lock();
        inner.calls += 1;

        let created = CodeVersion {
            id: uuid::Uuid::new_v4().to_string(),
            name: version.name,
            description: version.description,
            created_at: chrono::Utc::now(),
            created_by: String::new(),
            file_structure: Some(version.file_structure),
        };
        inner.current = Some(created.id.clone());
        inner.versions.push(created.clone());
        Ok(created)
    }

    async fn get_version(&self, _token: &str, id: &str) -> Result<CodeVersion> {
        let mut inner = self.inner.lock();
        inner.calls += 1;

        let found = inner
            .versions
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| CollaborationError::Remote {
                status: 404,
                message: Some("Version not found".to_string()),
            })?;
        inner.current = Some(found.id.clone());
        Ok(found)
    }

    async fn delete_version(&self, _token: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls += 1;

        let before = inner.versions.len();
        inner.versions.retain(|v| v.id != id);
        if inner.versions.len() == before {
            return Err(CollaborationError::Remote {
                status: 404,
                message: Some("Version not found".to_string()),
            });
        }
        if inner.current.as_deref() == Some(id) {
            inner.current = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workspace::FileNode;

    fn new_version(name: &str) -> NewVersion {
        NewVersion {
            name: name.to_string(),
            description: "desc".to_string(),
            file_structure: FileTree::new(FileNode::directory(
                "project",
                vec![FileNode::file("main.rs", "fn main() {}")],
            ))
            .unwrap(),
        }
    }

    #[test]
    fn test_new_version_wire_shape() {
        let value = serde_json::to_value(new_version("v1")).unwrap();
        assert_eq!(value["name"], "v1");
        assert_eq!(value["fileStructure"]["type"], "directory");
        assert!(value.get("file_structure").is_none());
    }

    #[test]
    fn test_listing_accepts_null_current() {
        let listing: VersionListing =
            serde_json::from_str(r#"{"versions": [], "currentVersion": null}"#).unwrap();
        assert!(listing.versions.is_empty());
        assert!(listing.current_version.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = InMemoryVersionStore::new();

        let created = store.create_version("t", new_version("v1")).await.unwrap();
        let listing = store.list_versions("t").await.unwrap();
        assert_eq!(listing.versions.len(), 1);
        assert_eq!(listing.current_version.map(|v| v.id), Some(created.id.clone()));

        store.delete_version("t", &created.id).await.unwrap();
        let listing = store.list_versions("t").await.unwrap();
        assert!(listing.versions.is_empty());
        assert!(listing.current_version.is_none());

        let err = store.get_version("t", &created.id).await.unwrap_err();
        assert_eq!(err.display_message("Failed to switch version"), "Version not found");
        assert_eq!(store.call_count(), 5);
    }
}
