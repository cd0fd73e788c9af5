use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};
use uuid::Uuid;

use crate::{Result, WorkspaceError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single entry of the project tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileNode {
    #[serde(rename = "file")]
    File {
        id: FileId,
        name: String,
        #[serde(default)]
        content: String,
    },

    #[serde(rename = "directory")]
    Directory {
        id: FileId,
        name: String,
        #[serde(default)]
        children: Vec<FileNode>,
    },
}

impl FileNode {
    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::File {
            id: FileId::new(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn directory(name: impl Into<String>, children: Vec<FileNode>) -> Self {
        Self::Directory {
            id: FileId::new(),
            name: name.into(),
            children,
        }
    }

    pub fn id(&self) -> &FileId {
        match self {
            Self::File { id, .. } | Self::Directory { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Directory { name, .. } => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    /// File content; `None` for directories.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::File { content, .. } => Some(content),
            Self::Directory { .. } => None,
        }
    }

    pub fn children(&self) -> &[FileNode] {
        match self {
            Self::File { .. } => &[],
            Self::Directory { children, .. } => children,
        }
    }
}

/// Snapshot of the whole project. Always rooted at a directory; every
/// deserialized tree has passed [`FileTree::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileNode", into = "FileNode")]
pub struct FileTree {
    root: FileNode,
}

impl FileTree {
    pub fn new(root: FileNode) -> Result<Self> {
        let tree = Self { root };
        tree.validate()?;
        Ok(tree)
    }

    pub(crate) fn from_unchecked(root: FileNode) -> Self {
        Self { root }
    }

    /// Tree holding a single empty root directory.
    pub fn empty(root_name: impl Into<String>) -> Self {
        Self {
            root: FileNode::directory(root_name, Vec::new()),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| WorkspaceError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| WorkspaceError::Serialization(e.to_string()))
    }

    pub fn root(&self) -> &FileNode {
        &self.root
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.is_file() {
            return Err(WorkspaceError::RootIsFile(self.root.name().to_string()));
        }

        let mut seen = HashSet::new();
        validate_node(&self.root, true, &mut seen)
    }

    pub fn find(&self, id: &FileId) -> Option<&FileNode> {
        find_node(&self.root, id)
    }

    /// Slash-separated path of a node relative to the root directory.
    pub fn path_of(&self, id: &FileId) -> Option<String> {
        if self.root.id() == id {
            return Some(String::new());
        }

        let mut segments = Vec::new();
        for child in self.root.children() {
            if collect_path(child, id, &mut segments) {
                segments.reverse();
                return Some(segments.join("/"));
            }
        }
        None
    }

    /// All files in depth-first order.
    pub fn files(&self) -> Vec<&FileNode> {
        let mut out = Vec::new();
        collect_files(&self.root, &mut out);
        out
    }

    pub fn file_count(&self) -> usize {
        self.files().len()
    }
}

impl Default for FileTree {
    fn default() -> Self {
        Self::empty("root")
    }
}

impl TryFrom<FileNode> for FileTree {
    type Error = WorkspaceError;

    fn try_from(root: FileNode) -> Result<Self> {
        Self::new(root)
    }
}

impl From<FileTree> for FileNode {
    fn from(tree: FileTree) -> Self {
        tree.root
    }
}

fn validate_node<'a>(
    node: &'a FileNode,
    is_root: bool,
    seen: &mut HashSet<&'a FileId>,
) -> Result<()> {
    if !seen.insert(node.id()) {
        return Err(WorkspaceError::DuplicateId(node.id().clone()));
    }

    // The root directory's name is a label, not a path segment.
    if !is_root {
        if node.name().is_empty() {
            return Err(WorkspaceError::EmptyName(node.id().clone()));
        }
        if node.name().contains('/') {
            return Err(WorkspaceError::InvalidName(node.name().to_string()));
        }
    }

    if let FileNode::Directory { name, children, .. } = node {
        let mut names = HashSet::new();
        for child in children {
            if !names.insert(child.name()) {
                return Err(WorkspaceError::DuplicateSibling {
                    parent: name.clone(),
                    name: child.name().to_string(),
                });
            }
            validate_node(child, false, seen)?;
        }
    }

    Ok(())
}

fn find_node<'a>(node: &'a FileNode, id: &FileId) -> Option<&'a FileNode> {
    if node.id() == id {
        return Some(node);
    }
    node.children().iter().find_map(|child| find_node(child, id))
}

fn collect_path(node: &FileNode, id: &FileId, segments: &mut Vec<String>) -> bool {
    if node.id() == id || node.children().iter().any(|c| collect_path(c, id, segments)) {
        segments.push(node.name().to_string());
        return true;
    }
    false
}

fn collect_files<'a>(node: &'a FileNode, out: &mut Vec<&'a FileNode>) {
    match node {
        FileNode::File { .. } => out.push(node),
        FileNode::Directory { children, .. } => {
            for child in children {
                collect_files(child, out);
            }
        }
    }
}
