//! Markdown writing and workspace inspection tools for the planner.
//!
//! All tool methods return a human-readable report string; failures are
//! stringified, never raised.

use std::path::Path;
use std::sync::Arc;

use paper_core::{JsonBlock, StreamSink};
use paper_workspace::Workspace;

use crate::section::update_section;

pub struct FileTools {
    workspace: Workspace,
    sink: Option<Arc<dyn StreamSink>>,
}

impl FileTools {
    pub fn new(workspace: Workspace, sink: Option<Arc<dyn StreamSink>>) -> Self {
        Self { workspace, sink }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Write or modify a markdown file in the workspace root.
    ///
    /// Modes: `overwrite` (default), `append` (blank-line separator),
    /// `modify`, `insert` (prepend), `smart_replace`, `section_update`
    /// (the update-section algorithm keyed on the first heading of
    /// `content`).
    pub async fn writemd(&self, filename: &str, content: &str, mode: &str) -> String {
        let filename = ensure_md(filename);
        let result = self.writemd_inner(&filename, content, mode).await;
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                log::error!("写入Markdown文件失败: {e}");
                format!("写入Markdown文件失败: {e}")
            }
        };
        self.emit("writemd_result", &report).await;
        report
    }

    async fn writemd_inner(
        &self,
        filename: &str,
        content: &str,
        mode: &str,
    ) -> Result<String, String> {
        let path = self
            .workspace
            .resolve(filename)
            .map_err(|e| e.to_string())?;
        let exists = path.is_file();
        log::info!("写入Markdown文件: {}，模式: {mode}", path.display());

        let report = match mode {
            "overwrite" | "" => {
                self.write(&path, content).await?;
                format!("成功重写覆盖Markdown文件: {filename}")
            }
            "append" => {
                let mut merged = if exists {
                    self.read(&path).await?
                } else {
                    String::new()
                };
                if !merged.is_empty() {
                    merged.push_str("\n\n");
                }
                merged.push_str(content);
                self.write(&path, &merged).await?;
                format!("成功附加内容到Markdown文件: {filename}")
            }
            "modify" | "smart_replace" => {
                self.write(&path, content).await?;
                if exists {
                    format!("成功修改Markdown文件: {filename}")
                } else {
                    format!("文件不存在，创建并写入Markdown文件: {filename}")
                }
            }
            "insert" => {
                if exists {
                    let original = self.read(&path).await?;
                    self.write(&path, &format!("{content}\n\n{original}")).await?;
                    format!("成功在文件开头插入内容到Markdown文件: {filename}")
                } else {
                    self.write(&path, content).await?;
                    format!("文件不存在，创建并写入Markdown文件: {filename}")
                }
            }
            "section_update" => {
                let (section, body) = split_leading_heading(content);
                let Some(section) = section else {
                    return Err("section_update 模式要求内容以章节标题开头".to_string());
                };
                let original = if exists {
                    self.read(&path).await?
                } else {
                    String::new()
                };
                let updated = update_section(&original, &section, &body);
                self.write(&path, &updated).await?;
                format!("成功更新章节内容到Markdown文件: {filename}")
            }
            other => {
                return Err(format!(
                    "无效的写入模式: {other}，支持的模式: append, overwrite, modify, insert, smart_replace, section_update"
                ));
            }
        };

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(format!(
            "{report}\n文件路径: {}\n文件大小: {size} 字节",
            path.display()
        ))
    }

    /// Section-level update of a paper file. `section` is required.
    pub async fn update_template(&self, template_name: &str, content: &str, section: &str) -> String {
        let report = self
            .update_template_inner(template_name, content, section)
            .await
            .unwrap_or_else(|e| {
                log::error!("更新论文文件失败: {e}");
                format!("更新论文文件失败: {e}")
            });
        self.emit("template_update_result", &report).await;
        report
    }

    async fn update_template_inner(
        &self,
        template_name: &str,
        content: &str,
        section: &str,
    ) -> Result<String, String> {
        let template_name = if template_name.is_empty() {
            "paper.md"
        } else {
            template_name
        };
        let path = self
            .workspace
            .resolve(template_name)
            .map_err(|e| e.to_string())?;
        if !path.is_file() {
            return Ok(format!("模板文件不存在: {template_name}"));
        }
        if section.trim().is_empty() {
            return Ok(
                "错误：必须指定章节名称。update_template工具只支持章节级别更新，不支持全文覆盖。"
                    .to_string(),
            );
        }

        let original = self.read(&path).await?;
        let updated = update_section(&original, section, content);
        self.write(&path, &updated).await?;

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(format!(
            "成功更新论文文件 {template_name} 的章节 '{section}'\n文件路径: {}\n文件大小: {size} 字节",
            path.display()
        ))
    }

    /// Recursive ascii tree of the workspace or one of its subdirectories.
    pub async fn tree(&self, directory: Option<&str>) -> String {
        let root = match directory {
            Some(dir) if !dir.is_empty() => match self.workspace.resolve(dir) {
                Ok(path) => path,
                Err(e) => return format!("生成目录树失败: {e}"),
            },
            _ => self.workspace.root().to_path_buf(),
        };
        if !root.is_dir() {
            return format!("目录不存在: {}", root.display());
        }

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut out = format!("{name}/");
        render_tree(&root, "", &mut out);

        self.emit("tree_result", &out).await;
        out
    }

    async fn read(&self, path: &Path) -> Result<String, String> {
        tokio::fs::read_to_string(path).await.map_err(|e| e.to_string())
    }

    async fn write(&self, path: &Path, content: &str) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        tokio::fs::write(path, content).await.map_err(|e| e.to_string())
    }

    async fn emit(&self, block_type: &str, message: &str) {
        if let Some(sink) = &self.sink {
            sink.card(JsonBlock::text(block_type, message)).await;
        }
    }
}

fn ensure_md(filename: &str) -> String {
    if filename.ends_with(".md") {
        filename.to_string()
    } else {
        format!("{filename}.md")
    }
}

/// Split content whose first non-empty line is a heading into
/// (heading text, remaining body).
fn split_leading_heading(content: &str) -> (Option<String>, String) {
    let mut lines = content.lines();
    for line in lines.by_ref() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(stripped) = trimmed.strip_prefix('#') {
            let title = stripped.trim_start_matches('#').trim().to_string();
            let body: String = lines.collect::<Vec<_>>().join("\n");
            return (Some(title), body.trim().to_string());
        }
        break;
    }
    (None, content.to_string())
}

fn render_tree(dir: &Path, prefix: &str, out: &mut String) {
    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).collect(),
        Err(_) => return,
    };
    entries.sort_by_key(|e| e.file_name());

    let count = entries.len();
    for (index, entry) in entries.into_iter().enumerate() {
        let is_last = index == count - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if path.is_dir() {
            out.push_str(&format!("\n{prefix}{connector}{name}/"));
            let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
            render_tree(&path, &child_prefix, out);
        } else {
            out.push_str(&format!("\n{prefix}{connector}{name}"));
        }
    }
}
