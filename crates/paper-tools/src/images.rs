//! Insertion of generated figures into the paper markdown.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use walkdir::WalkDir;

use paper_core::{JsonBlock, StreamSink};
use paper_workspace::Workspace;

use crate::file_tools::FileTools;
use crate::section::heading_level;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "svg", "webp"];
const CLOSING_SECTION_KEYWORDS: &[&str] = &[
    "结论",
    "conclusion",
    "参考文献",
    "references",
    "致谢",
    "acknowledgment",
];

pub struct ImageInserter {
    workspace: Workspace,
    sink: Option<Arc<dyn StreamSink>>,
}

struct ImageEntry {
    /// Path relative to `outputs/`.
    name: String,
    size: u64,
    modified: std::time::SystemTime,
}

impl ImageInserter {
    pub fn new(workspace: Workspace, sink: Option<Arc<dyn StreamSink>>) -> Self {
        Self { workspace, sink }
    }

    /// Insert the most recently modified image under `outputs/` into a
    /// markdown file. `position` is `smart`, `end` or `beginning`.
    pub async fn insert_latest_image(
        &self,
        target_file: &str,
        description: &str,
        position: &str,
    ) -> String {
        let Some(latest) = self.latest_image() else {
            return "outputs目录中没有找到任何图片文件".to_string();
        };

        let markdown = format!("![{description}](outputs/{})", latest.name);
        let file_tools = FileTools::new(self.workspace.clone(), None);

        let result = match position {
            "beginning" => file_tools.writemd(target_file, &markdown, "insert").await,
            "smart" => self.smart_insert(target_file, &markdown).await,
            _ => file_tools.writemd(target_file, &markdown, "append").await,
        };

        self.emit(&format!("成功插入图片: {} (位置: {position})", latest.name))
            .await;

        let position_text = match position {
            "smart" => "智能位置",
            "beginning" => "文件开头",
            _ => "文件末尾",
        };
        format!(
            "成功插入最新图片 '{}' 到文件 {target_file} 的{position_text}\n图片描述: {description}\n{result}",
            latest.name
        )
    }

    pub async fn insert_image_by_name(
        &self,
        image_name: &str,
        target_file: &str,
        description: &str,
    ) -> String {
        let image_path = match self.workspace.resolve(&format!("outputs/{image_name}")) {
            Ok(path) => path,
            Err(e) => return format!("插入指定图片失败: {e}"),
        };
        if !image_path.is_file() {
            return format!("图片文件不存在: {image_name}");
        }
        if !is_image_name(image_name) {
            return format!("文件不是图片格式: {image_name}");
        }

        let markdown = format!("![{description}](outputs/{image_name})");
        let file_tools = FileTools::new(self.workspace.clone(), None);
        let result = file_tools.writemd(target_file, &markdown, "append").await;

        self.emit(&format!("成功插入图片: {image_name}")).await;
        format!("成功插入图片 '{image_name}' 到文件 {target_file}\n图片描述: {description}\n{result}")
    }

    pub async fn list_output_images(&self) -> String {
        let images = self.scan_images();
        if images.is_empty() {
            return "outputs目录中没有图片文件".to_string();
        }

        let mut out = format!("outputs目录中共有 {} 个图片文件：\n\n", images.len());
        for (index, image) in images.iter().enumerate() {
            out.push_str(&format!(
                "{}. **{}**\n   - 大小: {}\n   - 修改时间: {}\n   - 相对路径: outputs/{}\n\n",
                index + 1,
                image.name,
                format_size(image.size),
                format_time(image.modified),
                image.name,
            ));
        }
        out.trim_end().to_string()
    }

    pub async fn get_latest_image_info(&self) -> String {
        let Some(latest) = self.latest_image() else {
            return "outputs目录中没有找到任何图片文件".to_string();
        };
        format!(
            "最新图片文件信息：\n\n**文件名**: {}\n**相对路径**: outputs/{}\n**文件大小**: {}\n**修改时间**: {}\n",
            latest.name,
            latest.name,
            format_size(latest.size),
            format_time(latest.modified),
        )
    }

    /// Insert before a recognized closing section (conclusion, references,
    /// acknowledgments) when one exists, otherwise after the last
    /// non-heading line.
    async fn smart_insert(&self, target_file: &str, markdown: &str) -> String {
        let file_tools = FileTools::new(self.workspace.clone(), None);

        let target_name = if target_file.ends_with(".md") {
            target_file.to_string()
        } else {
            format!("{target_file}.md")
        };
        let path = match self.workspace.resolve(&target_name) {
            Ok(path) => path,
            Err(e) => return format!("智能插入失败: {e}"),
        };
        if !path.is_file() {
            return file_tools.writemd(target_file, markdown, "append").await;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return file_tools.writemd(target_file, markdown, "append").await,
        };
        if content.trim().is_empty() {
            let _ = tokio::fs::write(&path, markdown).await;
            return format!("图片已插入到空文件 {target_name}");
        }

        let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
        let insert_at = smart_insert_index(&lines);

        lines.insert(insert_at, String::new());
        lines.insert(insert_at + 1, markdown.to_string());
        lines.insert(insert_at + 2, String::new());

        match tokio::fs::write(&path, lines.join("\n")).await {
            Ok(()) => format!("图片已插入到{target_name}的智能位置"),
            Err(e) => format!("智能插入失败: {e}"),
        }
    }

    fn scan_images(&self) -> Vec<ImageEntry> {
        let outputs = self.workspace.root().join("outputs");
        let mut images: Vec<ImageEntry> = WalkDir::new(&outputs)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_image_name(&e.file_name().to_string_lossy()))
            .filter_map(|e| {
                let metadata = e.metadata().ok()?;
                let name = e
                    .path()
                    .strip_prefix(&outputs)
                    .unwrap_or(e.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                Some(ImageEntry {
                    name,
                    size: metadata.len(),
                    modified: metadata.modified().ok()?,
                })
            })
            .collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        images
    }

    fn latest_image(&self) -> Option<ImageEntry> {
        self.scan_images()
            .into_iter()
            .max_by_key(|image| image.modified)
    }

    async fn emit(&self, message: &str) {
        if let Some(sink) = &self.sink {
            sink.card(JsonBlock::text("image_insert_result", message)).await;
        }
    }
}

fn smart_insert_index(lines: &[String]) -> usize {
    let mut candidate = lines.len();

    // Closing sections scanned bottom-up; a heading near the bottom that is
    // not a closing section still anchors the candidate just after itself.
    for (index, line) in lines.iter().enumerate().rev() {
        if heading_level(line).is_some() {
            let lowered = line.to_lowercase();
            if CLOSING_SECTION_KEYWORDS
                .iter()
                .any(|keyword| lowered.contains(keyword))
            {
                candidate = index;
                break;
            }
            if index + 5 > lines.len() {
                candidate = index + 1;
                break;
            }
        }
    }

    // A candidate at the tail (e.g. a trailing heading with no body) yields
    // to the position after the last non-empty, non-heading line.
    if candidate + 1 >= lines.len() {
        for (index, line) in lines.iter().enumerate().rev() {
            if !line.trim().is_empty() && heading_level(line).is_none() {
                return index + 1;
            }
        }
    }
    candidate
}

fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn format_size(size: u64) -> String {
    if size < 1024 {
        format!("{size} B")
    } else if size < 1024 * 1024 {
        format!("{:.1} KB", size as f64 / 1024.0)
    } else {
        format!("{:.1} MB", size as f64 / (1024.0 * 1024.0))
    }
}

fn format_time(time: std::time::SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn inserter() -> (TempDir, ImageInserter) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        (dir, ImageInserter::new(workspace, None))
    }

    fn touch(dir: &TempDir, relative: &str) {
        let path = dir.path().join("w1").join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "img").unwrap();
    }

    #[tokio::test]
    async fn no_images_reports_clearly() {
        let (_dir, inserter) = inserter().await;
        let out = inserter.insert_latest_image("paper.md", "图表", "end").await;
        assert_eq!(out, "outputs目录中没有找到任何图片文件");
    }

    #[tokio::test]
    async fn latest_image_is_appended_with_markdown_syntax() {
        let (dir, inserter) = inserter().await;
        touch(&dir, "outputs/plots/plot_1.png");
        std::fs::write(dir.path().join("w1/paper.md"), "# 标题\n\n内容").unwrap();

        let out = inserter
            .insert_latest_image("paper.md", "二次函数图像", "end")
            .await;
        assert!(out.contains("成功插入最新图片"), "got: {out}");

        let content = std::fs::read_to_string(dir.path().join("w1/paper.md")).unwrap();
        assert!(content.contains("![二次函数图像](outputs/plots/plot_1.png)"));
    }

    #[tokio::test]
    async fn smart_position_lands_before_conclusion() {
        let (dir, inserter) = inserter().await;
        touch(&dir, "outputs/plots/plot_1.png");
        std::fs::write(
            dir.path().join("w1/paper.md"),
            "# 引言\n\n引言内容\n\n# 结论\n\n结论内容\n",
        )
        .unwrap();

        inserter
            .insert_latest_image("paper.md", "图表", "smart")
            .await;

        let content = std::fs::read_to_string(dir.path().join("w1/paper.md")).unwrap();
        let image_at = content.find("![图表]").unwrap();
        let conclusion_at = content.find("# 结论").unwrap();
        assert!(image_at < conclusion_at, "image after conclusion: {content}");
    }

    #[tokio::test]
    async fn smart_position_backs_off_from_a_trailing_heading() {
        let (dir, inserter) = inserter().await;
        touch(&dir, "outputs/plots/plot_1.png");
        // The document ends with a bodyless heading; the image goes after
        // the last content line, not after that heading.
        std::fs::write(dir.path().join("w1/paper.md"), "# 引言\n内容\n# 结果").unwrap();

        inserter
            .insert_latest_image("paper.md", "图表", "smart")
            .await;

        let content = std::fs::read_to_string(dir.path().join("w1/paper.md")).unwrap();
        let image_at = content.find("![图表]").unwrap();
        let trailing_at = content.find("# 结果").unwrap();
        assert!(image_at < trailing_at, "image after trailing heading: {content}");
    }

    #[tokio::test]
    async fn insert_by_name_validates_existence_and_format() {
        let (dir, inserter) = inserter().await;
        touch(&dir, "outputs/plot_2.png");
        std::fs::write(dir.path().join("w1/outputs/notes.txt"), "x").unwrap();

        let out = inserter
            .insert_image_by_name("missing.png", "paper.md", "图")
            .await;
        assert!(out.contains("图片文件不存在"), "got: {out}");

        let out = inserter
            .insert_image_by_name("notes.txt", "paper.md", "图")
            .await;
        assert!(out.contains("不是图片格式"), "got: {out}");

        let out = inserter
            .insert_image_by_name("plot_2.png", "paper.md", "图")
            .await;
        assert!(out.contains("成功插入图片"), "got: {out}");
    }

    #[tokio::test]
    async fn list_and_latest_info_cover_nested_plots() {
        let (dir, inserter) = inserter().await;
        touch(&dir, "outputs/plots/plot_1.png");

        let listing = inserter.list_output_images().await;
        assert!(listing.contains("plots/plot_1.png"), "got: {listing}");

        let info = inserter.get_latest_image_info().await;
        assert!(info.contains("plots/plot_1.png"), "got: {info}");
    }
}
