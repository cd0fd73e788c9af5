/// HTTP version store against the stub API
mod support;

use collaboration::*;
use support::{StubBackend, ALICE_TOKEN};
use workspace::{FileNode, FileTree};

fn snapshot(content: &str) -> FileTree {
    FileTree::new(FileNode::directory(
        "project",
        vec![
            FileNode::file("README.md", "# demo"),
            FileNode::directory("src", vec![FileNode::file("main.rs", content)]),
        ],
    ))
    .unwrap()
}

fn new_version(name: &str) -> NewVersion {
    NewVersion {
        name: name.to_string(),
        description: format!("{} description", name),
        file_structure: snapshot("fn main() {}"),
    }
}

#[tokio::test]
async fn test_requests_carry_bearer_token() {
    let backend = StubBackend::start().await;
    let store = HttpVersionStore::new(backend.config()).unwrap();

    store.list_versions(ALICE_TOKEN).await.unwrap();
    store.create_version(ALICE_TOKEN, new_version("v1")).await.unwrap();

    assert_eq!(
        backend.authorizations(),
        vec![format!("Bearer {}", ALICE_TOKEN); 2]
    );
}

#[tokio::test]
async fn test_create_get_delete() {
    let backend = StubBackend::start().await;
    let store = HttpVersionStore::new(backend.config()).unwrap();

    let created = store.create_version(ALICE_TOKEN, new_version("v1")).await.unwrap();
    assert_eq!(created.name, "v1");
    assert_eq!(created.created_by, "alice");

    let listing = store.list_versions(ALICE_TOKEN).await.unwrap();
    assert_eq!(listing.versions.len(), 1);
    assert_eq!(listing.current_version.map(|v| v.id), Some(created.id.clone()));

    let fetched = store.get_version(ALICE_TOKEN, &created.id).await.unwrap();
    assert_eq!(fetched.file_structure, Some(snapshot("fn main() {}")));

    store.delete_version(ALICE_TOKEN, &created.id).await.unwrap();
    assert_eq!(backend.version_count(), 0);
}

#[tokio::test]
async fn test_id_is_a_single_path_segment() {
    let backend = StubBackend::start().await;
    let store = HttpVersionStore::new(backend.config()).unwrap();

    let created = store.create_version(ALICE_TOKEN, new_version("v1")).await.unwrap();
    backend.state.lock().versions[0].id = "release/1.0?draft#top".to_string();

    let fetched = store
        .get_version(ALICE_TOKEN, "release/1.0?draft#top")
        .await
        .unwrap();
    assert_eq!(fetched.name, created.name);

    store
        .delete_version(ALICE_TOKEN, "release/1.0?draft#top")
        .await
        .unwrap();
    assert_eq!(backend.version_count(), 0);
}

#[tokio::test]
async fn test_server_message_is_surfaced() {
    let backend = StubBackend::start().await;
    let store = HttpVersionStore::new(backend.config()).unwrap();

    let err = store.get_version(ALICE_TOKEN, "v-404").await.unwrap_err();
    match &err {
        CollaborationError::Remote { status, message } => {
            assert_eq!(*status, 404);
            assert_eq!(message.as_deref(), Some("Version not found"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.display_message("Failed to switch version"), "Version not found");
}

#[tokio::test]
async fn test_empty_error_body_uses_fallback() {
    let backend = StubBackend::start().await;
    let store = HttpVersionStore::new(backend.config()).unwrap();

    backend.fail_next();
    let err = store.list_versions(ALICE_TOKEN).await.unwrap_err();
    assert!(matches!(err, CollaborationError::Remote { status: 500, message: None }));
    assert_eq!(err.display_message("Failed to fetch versions"), "Failed to fetch versions");
}

#[tokio::test]
async fn test_rejected_token() {
    let backend = StubBackend::start().await;
    let store = HttpVersionStore::new(backend.config()).unwrap();

    let err = store.list_versions("forged").await.unwrap_err();
    assert!(matches!(err, CollaborationError::Remote { status: 401, .. }));
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let config = ClientConfig::default()
        .with_api_url("http://127.0.0.1:9")
        .with_timeout(2);
    let store = HttpVersionStore::new(config).unwrap();

    let err = store.list_versions(ALICE_TOKEN).await.unwrap_err();
    assert!(matches!(err, CollaborationError::NetworkError(_)));
}
