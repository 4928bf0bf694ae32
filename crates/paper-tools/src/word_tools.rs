//! Word document editing over `<workspace>/paper.docx`.
//!
//! Each operation loads the document, applies one change and saves it back,
//! reporting the outcome as a string. Headings are rendered as bold runs
//! with stepped sizes so the document round-trips without a style catalog.

use std::path::PathBuf;
use std::sync::Arc;

use docx_rs::{
    read_docx, AlignmentType, BreakType, Docx, DocumentChild, Paragraph, ParagraphChild, Pic, Run,
    RunChild, Table, TableCell, TableRow,
};

use paper_core::{JsonBlock, StreamSink};
use paper_workspace::Workspace;

const EMU_PER_INCH: u32 = 914_400;

pub struct WordTools {
    workspace: Workspace,
    sink: Option<Arc<dyn StreamSink>>,
}

impl WordTools {
    pub fn new(workspace: Workspace, sink: Option<Arc<dyn StreamSink>>) -> Self {
        Self { workspace, sink }
    }

    fn document_path(&self) -> PathBuf {
        self.workspace.root().join("paper.docx")
    }

    pub async fn create_document(&self, title: Option<&str>, overwrite: bool) -> String {
        self.notify_call("create_document").await;
        let path = self.document_path();
        if path.exists() && !overwrite {
            return "文档 paper.docx 已存在，如需重建请设置 overwrite=true".to_string();
        }

        let mut docx = Docx::new();
        if let Some(title) = title {
            docx = docx.add_paragraph(
                Paragraph::new()
                    .add_run(Run::new().add_text(title).bold().size(36))
                    .align(AlignmentType::Center),
            );
        }

        match self.save(docx).await {
            Ok(()) => "文档 paper.docx 创建成功".to_string(),
            Err(e) => self.handle_error("create_document", &e),
        }
    }

    pub async fn add_heading(&self, text: &str, level: usize) -> String {
        self.notify_call("add_heading").await;
        let size = match level {
            1 => 36,
            2 => 32,
            3 => 28,
            4 => 26,
            _ => 24,
        };
        let mut paragraph = Paragraph::new().add_run(Run::new().add_text(text).bold().size(size));
        if level == 1 {
            paragraph = paragraph.align(AlignmentType::Center);
        }

        match self.mutate(|docx| docx.add_paragraph(paragraph)).await {
            Ok(()) => format!("已添加 {level} 级标题: {text}"),
            Err(e) => self.handle_error("add_heading", &e),
        }
    }

    pub async fn add_paragraph(&self, text: &str) -> String {
        self.notify_call("add_paragraph").await;
        let paragraph = Paragraph::new().add_run(Run::new().add_text(text));
        match self.mutate(|docx| docx.add_paragraph(paragraph)).await {
            Ok(()) => format!("已添加段落 ({} 字符)", text.chars().count()),
            Err(e) => self.handle_error("add_paragraph", &e),
        }
    }

    pub async fn add_table(&self, rows: usize, cols: usize, data: Option<&[Vec<String>]>) -> String {
        self.notify_call("add_table").await;
        if rows == 0 || cols == 0 {
            return "表格行列数必须大于0".to_string();
        }

        let table_rows: Vec<TableRow> = (0..rows)
            .map(|r| {
                let cells: Vec<TableCell> = (0..cols)
                    .map(|c| {
                        let text = data
                            .and_then(|d| d.get(r))
                            .and_then(|row| row.get(c))
                            .cloned()
                            .unwrap_or_default();
                        TableCell::new()
                            .add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)))
                    })
                    .collect();
                TableRow::new(cells)
            })
            .collect();

        match self.mutate(|docx| docx.add_table(Table::new(table_rows))).await {
            Ok(()) => format!("已添加 {rows}x{cols} 表格"),
            Err(e) => self.handle_error("add_table", &e),
        }
    }

    /// Insert an image; `image_path` is resolved against the workspace,
    /// `width` is in inches.
    pub async fn add_picture(&self, image_path: &str, width: Option<f64>) -> String {
        self.notify_call("add_picture").await;
        let resolved = match self.workspace.resolve(image_path) {
            Ok(path) => path,
            Err(e) => return self.handle_error("add_picture", &e.to_string()),
        };
        let bytes = match std::fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(e) => return self.handle_error("add_picture", &format!("image not found: {e}")),
        };

        let mut pic = Pic::new(&bytes);
        if let Some(width) = width {
            let w = (width * EMU_PER_INCH as f64) as u32;
            let h = (width * 0.75 * EMU_PER_INCH as f64) as u32;
            pic = pic.size(w, h);
        }
        let paragraph = Paragraph::new()
            .add_run(Run::new().add_image(pic))
            .align(AlignmentType::Center);

        match self.mutate(|docx| docx.add_paragraph(paragraph)).await {
            Ok(()) => format!("已插入图片: {image_path}"),
            Err(e) => self.handle_error("add_picture", &e),
        }
    }

    pub async fn add_page_break(&self) -> String {
        self.notify_call("add_page_break").await;
        let paragraph = Paragraph::new().add_run(Run::new().add_break(BreakType::Page));
        match self.mutate(|docx| docx.add_paragraph(paragraph)).await {
            Ok(()) => "已插入分页符".to_string(),
            Err(e) => self.handle_error("add_page_break", &e),
        }
    }

    /// Full paragraph text, used by the writer to ground its edits before
    /// changing anything.
    pub async fn get_document_text(&self) -> String {
        match self.load().await {
            Ok(docx) => {
                let paragraphs = document_paragraphs(&docx);
                if paragraphs.is_empty() {
                    "文档为空，还没有任何内容".to_string()
                } else {
                    paragraphs.join("\n")
                }
            }
            Err(e) => self.handle_error("get_document_text", &e),
        }
    }

    pub async fn find_text_in_document(&self, text_to_find: &str) -> String {
        match self.load().await {
            Ok(docx) => {
                let matches: Vec<String> = document_paragraphs(&docx)
                    .iter()
                    .enumerate()
                    .filter(|(_, paragraph)| paragraph.contains(text_to_find))
                    .map(|(index, paragraph)| {
                        let preview: String = paragraph.chars().take(60).collect();
                        format!("段落 {index}: {preview}")
                    })
                    .collect();
                if matches.is_empty() {
                    format!("未找到文本: {text_to_find}")
                } else {
                    format!("找到 {} 处匹配:\n{}", matches.len(), matches.join("\n"))
                }
            }
            Err(e) => self.handle_error("find_text_in_document", &e),
        }
    }

    /// Apply bold/italic to every run of one paragraph.
    pub async fn format_text(&self, paragraph_index: usize, bold: bool, italic: bool) -> String {
        self.notify_call("format_text").await;
        let result = self
            .mutate_document(|children| {
                let mut seen = 0usize;
                for child in children.iter_mut() {
                    if let DocumentChild::Paragraph(paragraph) = child {
                        if seen == paragraph_index {
                            for paragraph_child in paragraph.children.iter_mut() {
                                if let ParagraphChild::Run(run) = paragraph_child {
                                    let mut updated = (**run).clone();
                                    if bold {
                                        updated = updated.bold();
                                    }
                                    if italic {
                                        updated = updated.italic();
                                    }
                                    **run = updated;
                                }
                            }
                            return Ok(());
                        }
                        seen += 1;
                    }
                }
                Err(format!("段落索引超出范围: {paragraph_index}"))
            })
            .await;

        match result {
            Ok(()) => format!("已格式化段落 {paragraph_index}"),
            Err(e) => self.handle_error("format_text", &e),
        }
    }

    pub async fn search_and_replace(&self, find_text: &str, replace_text: &str) -> String {
        self.notify_call("search_and_replace").await;
        let mut replaced = 0usize;
        let result = self
            .mutate_document(|children| {
                for child in children.iter_mut() {
                    if let DocumentChild::Paragraph(paragraph) = child {
                        for paragraph_child in paragraph.children.iter_mut() {
                            if let ParagraphChild::Run(run) = paragraph_child {
                                for run_child in run.children.iter_mut() {
                                    if let RunChild::Text(text) = run_child {
                                        if text.text.contains(find_text) {
                                            replaced += text.text.matches(find_text).count();
                                            text.text =
                                                text.text.replace(find_text, replace_text);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) if replaced > 0 => format!("已替换 {replaced} 处 '{find_text}'"),
            Ok(()) => format!("未找到文本: {find_text}"),
            Err(e) => self.handle_error("search_and_replace", &e),
        }
    }

    pub async fn delete_paragraph(&self, paragraph_index: usize) -> String {
        self.notify_call("delete_paragraph").await;
        let result = self
            .mutate_document(|children| {
                let mut seen = 0usize;
                for (position, child) in children.iter().enumerate() {
                    if matches!(child, DocumentChild::Paragraph(_)) {
                        if seen == paragraph_index {
                            children.remove(position);
                            return Ok(());
                        }
                        seen += 1;
                    }
                }
                Err(format!("段落索引超出范围: {paragraph_index}"))
            })
            .await;

        match result {
            Ok(()) => format!("已删除段落 {paragraph_index}"),
            Err(e) => self.handle_error("delete_paragraph", &e),
        }
    }

    pub async fn get_all_comments(&self) -> String {
        match self.load().await {
            Ok(docx) => {
                let mut count = 0usize;
                for child in &docx.document.children {
                    if let DocumentChild::Paragraph(paragraph) = child {
                        for paragraph_child in &paragraph.children {
                            if matches!(paragraph_child, ParagraphChild::CommentStart(_)) {
                                count += 1;
                            }
                        }
                    }
                }
                if count == 0 {
                    "文档中没有批注".to_string()
                } else {
                    format!("文档包含 {count} 处批注")
                }
            }
            Err(e) => self.handle_error("get_all_comments", &e),
        }
    }

    async fn load(&self) -> Result<Docx, String> {
        let path = self.document_path();
        if !path.exists() {
            return Err("文档 paper.docx 不存在".to_string());
        }
        let bytes = std::fs::read(&path).map_err(|e| e.to_string())?;
        read_docx(&bytes).map_err(|e| format!("{e:?}"))
    }

    async fn load_or_new(&self) -> Result<Docx, String> {
        if self.document_path().exists() {
            self.load().await
        } else {
            Ok(Docx::new())
        }
    }

    async fn save(&self, docx: Docx) -> Result<(), String> {
        let path = self.document_path();
        let file = std::fs::File::create(&path).map_err(|e| e.to_string())?;
        docx.build().pack(file).map_err(|e| e.to_string())?;
        self.notify_saved().await;
        Ok(())
    }

    async fn mutate<F>(&self, apply: F) -> Result<(), String>
    where
        F: FnOnce(Docx) -> Docx,
    {
        let docx = self.load_or_new().await?;
        self.save(apply(docx)).await
    }

    async fn mutate_document<F>(&self, apply: F) -> Result<(), String>
    where
        F: FnOnce(&mut Vec<DocumentChild>) -> Result<(), String>,
    {
        let mut docx = self.load().await?;
        apply(&mut docx.document.children)?;
        self.save(docx).await
    }

    async fn notify_call(&self, operation: &str) {
        if let Some(sink) = &self.sink {
            sink.card(JsonBlock::text(
                "word_tool_call",
                format!("正在执行Word操作: {operation}"),
            ))
            .await;
        }
    }

    async fn notify_saved(&self) {
        if let Some(sink) = &self.sink {
            sink.card(JsonBlock::text("word_document_saved", "paper.docx 已保存"))
                .await;
        }
    }

    /// Error strings carry an operation-specific remediation hint.
    fn handle_error(&self, operation: &str, error: &str) -> String {
        let lowered = error.to_lowercase();
        let hint = if lowered.contains("not found")
            || lowered.contains("no such file")
            || error.contains("不存在")
        {
            "请先使用 create_document 创建文档，或用 CodeAgent 生成所需文件"
        } else if lowered.contains("permission") {
            "检查 paper.docx 是否被其他程序占用"
        } else if lowered.contains("image") || lowered.contains("escapes") {
            "确认图片路径位于工作空间内（例如 outputs/plots/plot_1.png）"
        } else {
            "检查参数后重试"
        };
        log::error!("Word操作失败 {operation}: {error}");
        format!("Word操作 {operation} 失败: {error}\n建议: {hint}")
    }
}

/// Plain text per paragraph, in document order.
pub(crate) fn document_paragraphs(docx: &Docx) -> Vec<String> {
    docx.document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(paragraph) => Some(paragraph_text(paragraph)),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect()
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut out = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                if let RunChild::Text(text) = run_child {
                    out.push_str(&text.text);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn tools() -> (TempDir, WordTools) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        (dir, WordTools::new(workspace, None))
    }

    #[tokio::test]
    async fn create_then_read_round_trips_content() {
        let (_dir, tools) = tools().await;
        tools.create_document(Some("圆周率研究"), false).await;
        tools.add_heading("Introduction", 1).await;
        tools.add_paragraph("圆周率是数学中最重要的常数之一。").await;

        let text = tools.get_document_text().await;
        assert!(text.contains("圆周率研究"), "got: {text}");
        assert!(text.contains("Introduction"));
        assert!(text.contains("最重要的常数"));
    }

    #[tokio::test]
    async fn create_refuses_overwrite_by_default() {
        let (_dir, tools) = tools().await;
        tools.create_document(None, false).await;
        let out = tools.create_document(None, false).await;
        assert!(out.contains("已存在"), "got: {out}");
    }

    #[tokio::test]
    async fn operations_without_document_return_hints() {
        let (_dir, tools) = tools().await;
        let out = tools.get_document_text().await;
        assert!(out.contains("不存在"), "got: {out}");
        assert!(out.contains("create_document"), "got: {out}");
    }

    #[tokio::test]
    async fn search_and_replace_counts_matches() {
        let (_dir, tools) = tools().await;
        tools.create_document(None, false).await;
        tools.add_paragraph("旧词 和 旧词").await;

        let out = tools.search_and_replace("旧词", "新词").await;
        assert!(out.contains("已替换 2 处"), "got: {out}");
        assert!(tools.get_document_text().await.contains("新词 和 新词"));

        let out = tools.search_and_replace("不存在的词", "x").await;
        assert!(out.contains("未找到文本"), "got: {out}");
    }

    #[tokio::test]
    async fn delete_paragraph_by_index() {
        let (_dir, tools) = tools().await;
        tools.create_document(None, false).await;
        tools.add_paragraph("第一段").await;
        tools.add_paragraph("第二段").await;

        let out = tools.delete_paragraph(0).await;
        assert!(out.contains("已删除段落 0"), "got: {out}");

        let text = tools.get_document_text().await;
        assert!(!text.contains("第一段"), "got: {text}");
        assert!(text.contains("第二段"));

        let out = tools.delete_paragraph(9).await;
        assert!(out.contains("超出范围"), "got: {out}");
    }

    #[tokio::test]
    async fn add_picture_rejects_paths_outside_workspace() {
        let (_dir, tools) = tools().await;
        tools.create_document(None, false).await;
        let out = tools.add_picture("../../etc/passwd", None).await;
        assert!(out.contains("失败"), "got: {out}");
    }

    #[tokio::test]
    async fn add_table_fills_provided_data() {
        let (_dir, tools) = tools().await;
        tools.create_document(None, false).await;
        let data = vec![
            vec!["x".to_string(), "y".to_string()],
            vec!["1".to_string(), "2".to_string()],
        ];
        let out = tools.add_table(2, 2, Some(&data)).await;
        assert!(out.contains("已添加 2x2 表格"), "got: {out}");
    }
}
