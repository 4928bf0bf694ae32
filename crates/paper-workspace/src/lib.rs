pub mod docx;
pub mod error;
pub mod export;
pub mod filetype;
pub mod listing;
pub mod paths;
pub mod workspace;

pub use error::{Result, WorkspaceError};
pub use filetype::FileType;
pub use listing::{CategorizedFiles, FileEntry};
pub use workspace::{FileContent, FileInfo, Workspace};
