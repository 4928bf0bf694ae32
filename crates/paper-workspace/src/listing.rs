//! Categorized workspace listing.

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::Result;
use crate::workspace::{file_name, modified_secs, Workspace};

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub size: u64,
    pub modified: Option<f64>,
    /// Path relative to the workspace root.
    pub path: String,
    /// Path relative to the category directory.
    pub category_path: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizedFiles {
    pub code: Vec<FileEntry>,
    pub logs: Vec<FileEntry>,
    pub outputs: Vec<FileEntry>,
    pub papers: Vec<FileEntry>,
    pub attachments: Vec<FileEntry>,
}

impl Workspace {
    /// Five fixed buckets: `code`, `logs`, `outputs` (their directories,
    /// recursive), `papers` (the single top-level `paper.md`) and
    /// `attachments` (`attachment/`, recursive).
    pub fn list_by_category(&self) -> Result<CategorizedFiles> {
        let mut listing = CategorizedFiles {
            code: self.scan_category("code", "code")?,
            logs: self.scan_category("logs", "logs")?,
            outputs: self.scan_category("outputs", "outputs")?,
            attachments: self.scan_category("attachment", "attachments")?,
            ..Default::default()
        };

        let paper = self.root().join("paper.md");
        if paper.is_file() {
            let metadata = paper.metadata()?;
            listing.papers.push(FileEntry {
                name: file_name(&paper),
                entry_type: "file".to_string(),
                size: metadata.len(),
                modified: modified_secs(&metadata),
                path: "paper.md".to_string(),
                category_path: "paper.md".to_string(),
                category: "papers".to_string(),
            });
        }

        Ok(listing)
    }

    fn scan_category(&self, subdir: &str, category: &str) -> Result<Vec<FileEntry>> {
        let dir = self.root().join(subdir);
        let mut entries = Vec::new();
        if !dir.is_dir() {
            return Ok(entries);
        }

        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(std::io::Error::other)?;
            let category_path = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let path = entry
                .path()
                .strip_prefix(self.root())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();

            entries.push(FileEntry {
                name: file_name(entry.path()),
                entry_type: "file".to_string(),
                size: metadata.len(),
                modified: modified_secs(&metadata),
                path,
                category_path,
                category: category.to_string(),
            });
        }

        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn listing_fills_all_five_buckets() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), "w1").await.unwrap();

        ws.write("code/analysis.py", "print(1)").await.unwrap();
        ws.write("logs/run.log", "ok").await.unwrap();
        ws.write("outputs/plots/plot_1.png", "png").await.unwrap();
        ws.write("attachment/data/input.csv", "a,b").await.unwrap();
        ws.write("paper.md", "# Paper").await.unwrap();

        let listing = ws.list_by_category().unwrap();
        assert_eq!(listing.code.len(), 1);
        assert_eq!(listing.logs.len(), 1);
        assert_eq!(listing.outputs.len(), 1);
        assert_eq!(listing.papers.len(), 1);
        assert_eq!(listing.attachments.len(), 1);

        assert_eq!(listing.outputs[0].path, "outputs/plots/plot_1.png");
        assert_eq!(listing.outputs[0].category_path, "plots/plot_1.png");
        assert_eq!(listing.attachments[0].category, "attachments");
    }

    #[tokio::test]
    async fn missing_paper_means_empty_papers_bucket() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), "w2").await.unwrap();
        let listing = ws.list_by_category().unwrap();
        assert!(listing.papers.is_empty());
    }
}
