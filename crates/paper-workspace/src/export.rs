//! Workspace export as a zip archive.

use std::io::Write;
use std::path::PathBuf;

use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::docx::markdown_to_docx;
use crate::error::{Result, WorkspaceError};
use crate::workspace::Workspace;

impl Workspace {
    /// Package the workspace into a temporary zip file and return its path.
    ///
    /// When `paper.md` exists, a derived `paper.docx` is added to the
    /// archive. Failure of that conversion is non-fatal: the remaining files
    /// are still exported.
    ///
    /// Blocking; callers on the async runtime should wrap this in
    /// `spawn_blocking`.
    pub fn export_zip(&self) -> Result<PathBuf> {
        let export_dir = std::env::temp_dir().join(format!("workspace_export_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&export_dir)?;
        let zip_path = export_dir.join(format!("workspace_{}.zip", self.work_id()));

        let file = std::fs::File::create(&zip_path)?;
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut file_count = 0usize;
        let mut has_docx = false;
        for entry in WalkDir::new(self.root()).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let arcname = entry
                .path()
                .strip_prefix(self.root())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            has_docx |= arcname == "paper.docx";

            writer
                .start_file(arcname.as_str(), options)
                .map_err(|e| WorkspaceError::Zip(e.to_string()))?;
            let bytes = std::fs::read(entry.path())?;
            writer.write_all(&bytes)?;
            file_count += 1;
        }

        if !has_docx {
            match self.derived_paper_docx() {
                Ok(Some(bytes)) => {
                    writer
                        .start_file("paper.docx", options)
                        .map_err(|e| WorkspaceError::Zip(e.to_string()))?;
                    writer.write_all(&bytes)?;
                    log::info!("[{}] paper.docx added to export", self.work_id());
                }
                Ok(None) => {}
                Err(e) => {
                    // Keep exporting everything else.
                    log::error!("[{}] docx generation failed: {e}", self.work_id());
                }
            }
        }

        if file_count == 0 {
            writer
                .start_file("README.txt", options)
                .map_err(|e| WorkspaceError::Zip(e.to_string()))?;
            writer.write_all(b"This workspace is empty.")?;
        }

        writer
            .finish()
            .map_err(|e| WorkspaceError::Zip(e.to_string()))?;
        Ok(zip_path)
    }

    fn derived_paper_docx(&self) -> Result<Option<Vec<u8>>> {
        let paper = self.root().join("paper.md");
        if !paper.is_file() {
            return Ok(None);
        }
        let markdown = std::fs::read_to_string(&paper)?;
        markdown_to_docx(&markdown).map(Some)
    }
}
