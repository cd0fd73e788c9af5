/// Editable project workspace: the typed file tree and the provider that
/// owns the live copy of it.
use thiserror::Error;

mod tree;
pub use tree::*;

mod provider;
pub use provider::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("root of a file tree must be a directory, found file {0}")]
    RootIsFile(String),
    #[error("duplicate node id: {0}")]
    DuplicateId(FileId),
    #[error("node {0} has an empty name")]
    EmptyName(FileId),
    #[error("node name contains a path separator: {0}")]
    InvalidName(String),
    #[error("duplicate entry {name} in directory {parent}")]
    DuplicateSibling { parent: String, name: String },
    #[error("node not found: {0}")]
    NodeNotFound(FileId),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
