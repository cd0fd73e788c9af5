use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::{FileId, FileNode, FileTree};

/// Owner of the live, editable project tree.
pub trait FileTreeProvider: Send + Sync {
    /// Copy of the current tree.
    fn snapshot(&self) -> FileTree;

    /// Replace the whole tree. Unsaved state in the previous tree is lost.
    fn replace(&self, tree: FileTree);

    fn file_by_id(&self, id: &FileId) -> Option<FileNode> {
        self.snapshot().find(id).cloned()
    }
}

/// Cloneable handle to a tree shared between state containers.
#[derive(Debug, Clone, Default)]
pub struct SharedFileTree {
    inner: Arc<RwLock<TreeSlot>>,
}

#[derive(Debug, Default)]
struct TreeSlot {
    tree: FileTree,
    revision: u64,
}

impl SharedFileTree {
    pub fn new(tree: FileTree) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TreeSlot { tree, revision: 0 })),
        }
    }

    /// Number of wholesale replacements since creation.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Apply an in-place edit to the live tree. The edit must keep the tree
    /// valid; it is not re-validated here.
    pub fn edit<R>(&self, f: impl FnOnce(&mut FileNode) -> R) -> R {
        let mut slot = self.inner.write();
        let mut root = FileNode::from(std::mem::take(&mut slot.tree));
        let out = f(&mut root);
        slot.tree = FileTree::from_unchecked(root);
        out
    }
}

impl FileTreeProvider for SharedFileTree {
    fn snapshot(&self) -> FileTree {
        self.inner.read().tree.clone()
    }

    fn replace(&self, tree: FileTree) {
        let mut slot = self.inner.write();
        slot.tree = tree;
        slot.revision += 1;
        debug!(revision = slot.revision, "file tree replaced");
    }

    fn file_by_id(&self, id: &FileId) -> Option<FileNode> {
        self.inner.read().tree.find(id).cloned()
    }
}
