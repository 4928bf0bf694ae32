//! Read-only queries against the workspace `attachment/` directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use walkdir::WalkDir;

use paper_core::{JsonBlock, StreamSink};
use paper_workspace::Workspace;

const READ_LIMIT: u64 = 10 * 1024 * 1024;
const PDF_PAGE_LIMIT: usize = 10;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "py", "js", "ts", "java", "cpp", "c", "h", "hpp", "html", "css", "vue", "json",
    "xml", "yaml", "yml", "toml", "ini", "sql", "sh", "bat", "cmd", "log", "csv", "rtf",
];

pub struct AttachmentTools {
    workspace: Workspace,
    sink: Option<Arc<dyn StreamSink>>,
}

struct AttachmentEntry {
    name: String,
    relative_path: String,
    full_path: PathBuf,
    size: u64,
    extension: String,
}

impl AttachmentTools {
    pub fn new(workspace: Workspace, sink: Option<Arc<dyn StreamSink>>) -> Self {
        Self { workspace, sink }
    }

    pub async fn list_attachments(&self) -> String {
        let attachment_dir = self.workspace.root().join("attachment");
        if !attachment_dir.is_dir() {
            return "工作空间中没有附件目录或没有上传任何附件".to_string();
        }

        let attachments = scan(&attachment_dir);
        if attachments.is_empty() {
            return "附件目录为空".to_string();
        }

        let mut out = format!("发现 {} 个附件文件：\n\n", attachments.len());
        for (index, entry) in attachments.iter().enumerate() {
            out.push_str(&format!(
                "{}. **{}**\n   - 路径: {}\n   - 大小: {}\n   - 类型: {}\n\n",
                index + 1,
                entry.name,
                entry.relative_path,
                format_size(entry.size),
                type_description(&entry.extension),
            ));
        }

        if let Some(sink) = &self.sink {
            let listing: Vec<serde_json::Value> = attachments
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "name": entry.name,
                        "path": entry.relative_path,
                        "size": entry.size,
                        "type": type_description(&entry.extension),
                        "extension": format!(".{}", entry.extension),
                    })
                })
                .collect();
            sink.card(JsonBlock::new(
                "attachments_list",
                serde_json::json!({"count": listing.len(), "attachments": listing}),
            ))
            .await;
        }

        out.trim_end().to_string()
    }

    pub async fn read_attachment(&self, file_path: &str) -> String {
        let full_path = match self.resolve_attachment(file_path) {
            Ok(path) => path,
            Err(message) => return message,
        };

        let size = match full_path.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => return format!("读取附件失败: {e}"),
        };
        if size > READ_LIMIT {
            return format!(
                "文件过大 ({})，超过10MB限制",
                format_size(size)
            );
        }

        let extension = extension_of(&full_path);
        let content = extract_content(&full_path, &extension).await;

        let preview: String = content.chars().take(1000).collect();
        if let Some(sink) = &self.sink {
            sink.card(JsonBlock::new(
                "attachment_content",
                serde_json::json!({
                    "file_path": file_path,
                    "file_size": size,
                    "file_type": type_description(&extension),
                    "content": preview,
                    "truncated": content.chars().count() > 1000,
                }),
            ))
            .await;
        }

        format!(
            "**文件信息:**\n- 文件名: {}\n- 文件路径: {file_path}\n- 文件大小: {}\n- 文件类型: {}\n\n**文件内容:**\n{content}",
            full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format_size(size),
            type_description(&extension),
        )
    }

    pub async fn get_attachment_info(&self, file_path: &str) -> String {
        let full_path = match self.resolve_attachment(file_path) {
            Ok(path) => path,
            Err(message) => return message,
        };
        let metadata = match full_path.metadata() {
            Ok(metadata) => metadata,
            Err(e) => return format!("获取附件信息失败: {e}"),
        };
        let extension = extension_of(&full_path);

        let mut out = format!(
            "**附件文件详细信息:**\n\n- **文件名**: {}\n- **相对路径**: {file_path}\n- **文件大小**: {}\n- **文件类型**: {}\n- **扩展名**: .{extension}\n",
            full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format_size(metadata.len()),
            type_description(&extension),
        );
        if let Some(modified) = metadata.modified().ok().map(format_time) {
            out.push_str(&format!("- **修改时间**: {modified}\n"));
        }

        if is_text_extension(&extension) && metadata.len() < 1024 * 1024 {
            if let Ok(content) = tokio::fs::read_to_string(&full_path).await {
                let preview: String = content.chars().take(500).collect();
                let ellipsis = if content.chars().count() > 500 { "..." } else { "" };
                out.push_str(&format!("- **内容预览**:\n```\n{preview}{ellipsis}\n```\n"));
            }
        }

        out
    }

    pub async fn search_attachments(&self, keyword: &str, file_type: Option<&str>) -> String {
        let attachment_dir = self.workspace.root().join("attachment");
        if !attachment_dir.is_dir() {
            return "工作空间中没有附件目录".to_string();
        }

        let keyword_lower = keyword.to_lowercase();
        let mut results: Vec<(String, &'static str, String)> = Vec::new();

        for entry in scan(&attachment_dir) {
            if let Some(wanted) = file_type {
                if !entry
                    .extension
                    .eq_ignore_ascii_case(wanted.trim_start_matches('.'))
                {
                    continue;
                }
            }

            if entry.name.to_lowercase().contains(&keyword_lower) {
                results.push((entry.relative_path.clone(), "文件名", entry.name.clone()));
                continue;
            }

            if is_text_extension(&entry.extension) && entry.size <= READ_LIMIT {
                let content = extract_content(&entry.full_path, &entry.extension).await;
                if content.to_lowercase().contains(&keyword_lower) {
                    let mut matches = Vec::new();
                    for (number, line) in content.lines().enumerate() {
                        if line.to_lowercase().contains(&keyword_lower) {
                            matches.push(format!("第{}行: {}", number + 1, line.trim()));
                            if matches.len() >= 3 {
                                break;
                            }
                        }
                    }
                    results.push((entry.relative_path.clone(), "文件内容", matches.join("\n")));
                }
            }
        }

        if results.is_empty() {
            return format!("未找到包含关键词 '{keyword}' 的附件文件");
        }

        let mut out = format!("**搜索结果** (关键词: '{keyword}'):\n\n");
        for (index, (file, match_type, matched)) in results.iter().enumerate() {
            out.push_str(&format!("{}. **{file}** (匹配类型: {match_type})\n", index + 1));
            if *match_type == "文件内容" {
                out.push_str(&format!("   匹配内容:\n   {matched}\n"));
            }
            out.push('\n');
        }

        if let Some(sink) = &self.sink {
            sink.card(JsonBlock::new(
                "search_results",
                serde_json::json!({
                    "keyword": keyword,
                    "file_type": file_type,
                    "count": results.len(),
                }),
            ))
            .await;
        }

        out.trim_end().to_string()
    }

    fn resolve_attachment(&self, file_path: &str) -> Result<PathBuf, String> {
        let full_path = self
            .workspace
            .resolve(&format!("attachment/{file_path}"))
            .map_err(|e| format!("读取附件失败: {e}"))?;
        if !full_path.exists() {
            return Err(format!("附件文件不存在: {file_path}"));
        }
        if !full_path.is_file() {
            return Err(format!("指定的路径不是文件: {file_path}"));
        }
        Ok(full_path)
    }
}

fn scan(attachment_dir: &Path) -> Vec<AttachmentEntry> {
    let mut entries: Vec<AttachmentEntry> = WalkDir::new(attachment_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative_path = e
                .path()
                .strip_prefix(attachment_dir)
                .unwrap_or(e.path())
                .to_string_lossy()
                .into_owned();
            AttachmentEntry {
                name: e.file_name().to_string_lossy().into_owned(),
                relative_path,
                size: e.metadata().map(|m| m.len()).unwrap_or(0),
                extension: extension_of(e.path()),
                full_path: e.path().to_path_buf(),
            }
        })
        .collect();
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    entries
}

async fn extract_content(path: &Path, extension: &str) -> String {
    match extension {
        "csv" => match tokio::fs::read_to_string(path).await {
            Ok(raw) => csv_summary(&raw),
            Err(e) => format!("读取文件内容失败: {e}"),
        },
        "xlsx" | "xls" => {
            "Excel文件：请先使用CodeAgent将其转换为CSV后再读取表格内容".to_string()
        }
        "docx" => docx_text(path),
        "pdf" => {
            // CPU-bound parsing stays off the async executor.
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || pdf_text(&path))
                .await
                .unwrap_or_else(|e| format!("PDF文件读取失败: {e}"))
        }
        _ if is_text_extension(extension) => match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => format!("读取文件内容失败: {e}"),
        },
        _ => format!("不支持的文件类型: .{extension}"),
    }
}

/// Tabular preview: header, first rows, row/column counts.
fn csv_summary(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    if lines.is_empty() {
        return "CSV文件为空".to_string();
    }

    let header: Vec<&str> = lines[0].split(',').map(str::trim).collect();
    let preview: Vec<&str> = lines.iter().take(6).copied().collect();

    format!(
        "CSV文件内容预览:\n{}\n\n总行数: {}\n总列数: {}\n列名: {:?}",
        preview.join("\n"),
        lines.len().saturating_sub(1),
        header.len(),
        header
    )
}

fn docx_text(path: &Path) -> String {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return format!("读取文件内容失败: {e}"),
    };
    match docx_rs::read_docx(&bytes) {
        Ok(docx) => {
            let paragraphs = crate::word_tools::document_paragraphs(&docx);
            if paragraphs.is_empty() {
                "Word文档为空".to_string()
            } else {
                paragraphs.join("\n")
            }
        }
        Err(e) => format!("Word文档读取失败: {e:?}"),
    }
}

fn pdf_text(path: &Path) -> String {
    match pdf_extract::extract_text_by_pages(path) {
        Ok(pages) => {
            let mut out = Vec::new();
            for (number, page) in pages.iter().take(PDF_PAGE_LIMIT).enumerate() {
                if !page.trim().is_empty() {
                    out.push(format!("--- 第{}页 ---\n{}", number + 1, page.trim()));
                }
            }
            if out.is_empty() {
                "PDF文件没有可提取的文本".to_string()
            } else {
                out.join("\n")
            }
        }
        Err(e) => format!("PDF文件读取失败: {e}"),
    }
}

fn is_text_extension(extension: &str) -> bool {
    TEXT_EXTENSIONS.contains(&extension)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn format_size(size: u64) -> String {
    if size < 1024 {
        format!("{size} B")
    } else if size < 1024 * 1024 {
        format!("{:.1} KB", size as f64 / 1024.0)
    } else if size < 1024 * 1024 * 1024 {
        format!("{:.1} MB", size as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_time(time: std::time::SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn type_description(extension: &str) -> String {
    let known = match extension {
        "txt" => "纯文本文件",
        "md" => "Markdown文档",
        "rtf" => "富文本格式",
        "doc" => "Word文档 (旧版)",
        "docx" => "Word文档",
        "pdf" => "PDF文档",
        "csv" => "CSV表格文件",
        "xlsx" => "Excel表格文件",
        "xls" => "Excel表格文件 (旧版)",
        "py" => "Python源代码",
        "js" => "JavaScript源代码",
        "ts" => "TypeScript源代码",
        "java" => "Java源代码",
        "cpp" => "C++源代码",
        "c" => "C源代码",
        "html" => "HTML文件",
        "css" => "CSS样式表",
        "vue" => "Vue组件",
        "json" => "JSON数据文件",
        "xml" => "XML文件",
        "yaml" | "yml" => "YAML配置文件",
        "toml" => "TOML配置文件",
        "ini" => "INI配置文件",
        "sql" => "SQL脚本",
        "sh" => "Shell脚本",
        "bat" => "批处理文件",
        _ => return format!(".{extension} 文件"),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn tools() -> (TempDir, AttachmentTools) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        (dir, AttachmentTools::new(workspace, None))
    }

    #[tokio::test]
    async fn empty_attachment_directory_reports_clearly() {
        let (_dir, tools) = tools().await;
        let out = tools.list_attachments().await;
        assert_eq!(out, "附件目录为空");
    }

    #[tokio::test]
    async fn list_includes_nested_files_with_sizes() {
        let (dir, tools) = tools().await;
        std::fs::create_dir_all(dir.path().join("w1/attachment/data")).unwrap();
        std::fs::write(dir.path().join("w1/attachment/data/input.csv"), "a,b\n1,2\n").unwrap();

        let out = tools.list_attachments().await;
        assert!(out.contains("发现 1 个附件文件"), "got: {out}");
        assert!(out.contains("input.csv"));
        assert!(out.contains("CSV表格文件"));
    }

    #[tokio::test]
    async fn read_text_attachment_returns_content() {
        let (dir, tools) = tools().await;
        std::fs::write(dir.path().join("w1/attachment/notes.txt"), "实验记录").unwrap();

        let out = tools.read_attachment("notes.txt").await;
        assert!(out.contains("**文件内容:**"), "got: {out}");
        assert!(out.contains("实验记录"));
    }

    #[tokio::test]
    async fn read_csv_attachment_returns_tabular_summary() {
        let (dir, tools) = tools().await;
        std::fs::write(
            dir.path().join("w1/attachment/data.csv"),
            "x,y\n1,2\n3,4\n5,6\n",
        )
        .unwrap();

        let out = tools.read_attachment("data.csv").await;
        assert!(out.contains("总行数: 3"), "got: {out}");
        assert!(out.contains("总列数: 2"));
    }

    #[tokio::test]
    async fn read_missing_attachment_fails_softly() {
        let (_dir, tools) = tools().await;
        let out = tools.read_attachment("nope.txt").await;
        assert!(out.contains("附件文件不存在"), "got: {out}");
    }

    #[tokio::test]
    async fn read_rejects_escaping_path() {
        let (_dir, tools) = tools().await;
        let out = tools.read_attachment("../../../etc/passwd").await;
        assert!(out.contains("读取附件失败") || out.contains("附件文件不存在"), "got: {out}");
    }

    #[tokio::test]
    async fn search_matches_names_and_content() {
        let (dir, tools) = tools().await;
        std::fs::write(dir.path().join("w1/attachment/report.txt"), "关于圆周率的研究").unwrap();
        std::fs::write(dir.path().join("w1/attachment/pi_data.csv"), "a,b\n").unwrap();

        let out = tools.search_attachments("圆周率", None).await;
        assert!(out.contains("report.txt"), "got: {out}");
        assert!(out.contains("文件内容"));

        let out = tools.search_attachments("pi", Some("csv")).await;
        assert!(out.contains("pi_data.csv"), "got: {out}");

        let out = tools.search_attachments("不存在的词", None).await;
        assert!(out.contains("未找到"), "got: {out}");
    }

    #[test]
    fn size_formatting_scales_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
