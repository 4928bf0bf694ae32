use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid path: {0} escapes the workspace")]
    InvalidPath(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File too large: {path} is {size} bytes (limit {limit})")]
    TooLarge {
        path: String,
        size: u64,
        limit: u64,
    },

    #[error("Directory already exists: {0}")]
    AlreadyExists(String),

    #[error("Cannot delete entire workspace")]
    DeleteRoot,

    #[error("Workspace does not exist: {0}")]
    MissingWorkspace(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(String),

    #[error("Document conversion error: {0}")]
    Docx(String),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
