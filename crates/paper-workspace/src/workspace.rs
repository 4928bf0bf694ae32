//! Per-work on-disk workspace.
//!
//! Layout, created once at work creation:
//!
//! ```text
//! <data>/workspaces/<work_id>/
//!   code/            scripts saved by the code agent
//!   outputs/plots/   figures
//!   outputs/data/    datasets
//!   logs/
//!   temp/
//!   attachment/      user uploads
//!   paper.md | paper.docx
//!   metadata.json
//!   chat_history.json
//! ```
//!
//! Every operation resolves its input path strictly inside the workspace
//! root; anything that escapes fails with [`WorkspaceError::InvalidPath`].

use std::path::{Component, Path, PathBuf};

use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{Result, WorkspaceError};
use crate::filetype::{self, FileType};

const TEXT_READ_LIMIT: u64 = 10 * 1024 * 1024;
const UPLOAD_LIMIT: u64 = 50 * 1024 * 1024;

const SUBDIRS: &[&str] = &[
    "code",
    "outputs/plots",
    "outputs/data",
    "logs",
    "temp",
    "attachment",
];

#[derive(Debug, Clone)]
pub struct Workspace {
    work_id: String,
    root: PathBuf,
}

/// Result of a typed read.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileContent {
    Text {
        content: String,
        filename: String,
        size: u64,
    },
    Image {
        /// Base64-encoded bytes.
        content: String,
        filename: String,
        size: u64,
    },
    Binary {
        filename: String,
        size: u64,
        mime_type: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub size: Option<u64>,
    pub modified: Option<f64>,
    pub path: String,
}

impl Workspace {
    /// Create the workspace directory tree for a new work, including
    /// `metadata.json`. Idempotent for existing directories.
    pub async fn create(base: &Path, work_id: &str) -> Result<Self> {
        let root = base.join(work_id);
        tokio::fs::create_dir_all(&root).await?;
        for sub in SUBDIRS {
            tokio::fs::create_dir_all(root.join(sub)).await?;
        }

        let metadata_path = root.join("metadata.json");
        if !metadata_path.exists() {
            let metadata = serde_json::json!({
                "work_id": work_id,
                "created_at": Utc::now().to_rfc3339(),
                "status": "created",
                "progress": 0,
            });
            tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?).await?;
        }

        log::info!("[{work_id}] workspace created at {}", root.display());
        Ok(Self {
            work_id: work_id.to_string(),
            root,
        })
    }

    /// Open an existing workspace without touching the directory tree.
    pub fn open(base: &Path, work_id: &str) -> Result<Self> {
        let root = base.join(work_id);
        if !root.is_dir() {
            return Err(WorkspaceError::MissingWorkspace(root));
        }
        Ok(Self {
            work_id: work_id.to_string(),
            root,
        })
    }

    pub fn work_id(&self) -> &str {
        &self.work_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` strictly inside the workspace root.
    ///
    /// `..` components are applied lexically and must never climb above the
    /// root; absolute paths are rejected outright. For paths that exist, the
    /// canonicalized form is checked too, so symlinks cannot escape.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() || !resolved.starts_with(&self.root) {
                        return Err(WorkspaceError::InvalidPath(relative.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::InvalidPath(relative.to_string()));
                }
            }
        }
        if !resolved.starts_with(&self.root) {
            return Err(WorkspaceError::InvalidPath(relative.to_string()));
        }

        if resolved.exists() {
            let canonical = resolved.canonicalize()?;
            let canonical_root = self.root.canonicalize()?;
            if !canonical.starts_with(&canonical_root) {
                return Err(WorkspaceError::InvalidPath(relative.to_string()));
            }
        }
        Ok(resolved)
    }

    pub async fn read(&self, relative: &str) -> Result<FileContent> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(WorkspaceError::NotFound(relative.to_string()));
        }
        let metadata = tokio::fs::metadata(&path).await?;
        let size = metadata.len();
        let filename = file_name(&path);

        match filetype::detect(relative) {
            FileType::Text => {
                if size > TEXT_READ_LIMIT {
                    return Err(WorkspaceError::TooLarge {
                        path: relative.to_string(),
                        size,
                        limit: TEXT_READ_LIMIT,
                    });
                }
                let content = tokio::fs::read_to_string(&path).await?;
                Ok(FileContent::Text {
                    content,
                    filename,
                    size,
                })
            }
            FileType::Image => {
                if size > TEXT_READ_LIMIT {
                    return Err(WorkspaceError::TooLarge {
                        path: relative.to_string(),
                        size,
                        limit: TEXT_READ_LIMIT,
                    });
                }
                let bytes = tokio::fs::read(&path).await?;
                Ok(FileContent::Image {
                    content: base64::engine::general_purpose::STANDARD.encode(bytes),
                    filename,
                    size,
                })
            }
            FileType::Binary => Ok(FileContent::Binary {
                mime_type: filetype::mime_type(relative).to_string(),
                filename,
                size,
                message: "Binary file - use download button to view".to_string(),
            }),
        }
    }

    pub async fn write(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Stream an upload to disk, capped at 50 MB.
    pub async fn upload<R>(&self, relative: &str, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > UPLOAD_LIMIT {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(WorkspaceError::TooLarge {
                    path: relative.to_string(),
                    size: written,
                    limit: UPLOAD_LIMIT,
                });
            }
            file.write_all(&buffer[..n]).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    pub async fn delete(&self, relative: &str) -> Result<()> {
        if matches!(relative.trim(), "" | "." | "/") {
            return Err(WorkspaceError::DeleteRoot);
        }
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(WorkspaceError::DeleteRoot);
        }
        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else if path.is_file() {
            tokio::fs::remove_file(&path).await?;
        } else {
            return Err(WorkspaceError::NotFound(relative.to_string()));
        }
        Ok(())
    }

    pub async fn mkdir(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path.exists() {
            return Err(WorkspaceError::AlreadyExists(relative.to_string()));
        }
        tokio::fs::create_dir_all(&path).await?;
        Ok(())
    }

    pub async fn info(&self, relative: &str) -> Result<FileInfo> {
        let path = self.resolve(relative)?;
        if !path.exists() {
            return Err(WorkspaceError::NotFound(relative.to_string()));
        }
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(FileInfo {
            name: file_name(&path),
            entry_type: if metadata.is_dir() {
                "directory".to_string()
            } else {
                "file".to_string()
            },
            size: metadata.is_file().then(|| metadata.len()),
            modified: modified_secs(&metadata),
            path: relative.to_string(),
        })
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn modified_secs(metadata: &std::fs::Metadata) -> Option<f64> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
}

impl From<serde_json::Error> for WorkspaceError {
    fn from(err: serde_json::Error) -> Self {
        WorkspaceError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}
