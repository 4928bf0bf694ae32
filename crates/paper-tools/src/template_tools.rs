//! Heading-structured editing of `paper.md`, offered to the planner only
//! when the work was created from a template.

use regex::Regex;

use paper_workspace::Workspace;

use crate::section::{rename_heading, section_content, update_section};

pub struct TemplateTools {
    workspace: Workspace,
}

impl TemplateTools {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Outline of the template: heading counts per level and the full
    /// indented structure.
    pub async fn analyze_template(&self) -> String {
        let Some(content) = self.read_paper().await else {
            return "错误：当前工作目录中没有找到paper.md文件".to_string();
        };

        let heading_re = Regex::new(r"^(#{1,6})\s+(.+)$").expect("static regex");
        let mut headings: Vec<(usize, String)> = Vec::new();
        for line in content.lines() {
            if let Some(captures) = heading_re.captures(line.trim()) {
                let level = captures[1].len();
                headings.push((level, captures[2].trim().to_string()));
            }
        }

        if headings.is_empty() {
            return "paper.md文件中没有找到标题结构".to_string();
        }

        let mut level_counts = std::collections::BTreeMap::new();
        for (level, _) in &headings {
            *level_counts.entry(*level).or_insert(0usize) += 1;
        }

        let mut out = vec![
            "📊 模板结构分析".to_string(),
            format!("📝 总共找到 {} 个标题", headings.len()),
            String::new(),
            "📈 标题层级分布:".to_string(),
        ];
        for (level, count) in &level_counts {
            out.push(format!("   {} 级标题: {} 个", "#".repeat(*level), count));
        }
        out.push(String::new());
        out.push("📋 详细标题结构:".to_string());
        for (level, title) in &headings {
            out.push(format!(
                "{}{} {}",
                "  ".repeat(level - 1),
                "#".repeat(*level),
                title
            ));
        }

        out.join("\n")
    }

    pub async fn get_section_content(&self, section_title: &str) -> String {
        let Some(content) = self.read_paper().await else {
            return "错误：当前工作目录中没有找到paper.md文件".to_string();
        };
        match section_content(&content, section_title) {
            Some(section) => section,
            None => format!("未找到章节: {section_title}"),
        }
    }

    /// Update a section's body. `mode` is `replace` (default), `append` or
    /// `prepend`, the latter two merging with the existing body.
    pub async fn update_section_content(
        &self,
        section_title: &str,
        new_content: &str,
        mode: &str,
    ) -> String {
        let Some(content) = self.read_paper().await else {
            return "错误：当前工作目录中没有找到paper.md文件".to_string();
        };

        let body = match mode {
            "append" | "merge" => match existing_body(&content, section_title) {
                Some(existing) if !existing.is_empty() => {
                    format!("{existing}\n\n{new_content}")
                }
                _ => new_content.to_string(),
            },
            "prepend" => match existing_body(&content, section_title) {
                Some(existing) if !existing.is_empty() => {
                    format!("{new_content}\n\n{existing}")
                }
                _ => new_content.to_string(),
            },
            _ => new_content.to_string(),
        };

        let updated = update_section(&content, section_title, &body);
        match self.save_paper(&updated).await {
            Ok(()) => format!("✅ 章节 '{section_title}' 更新成功"),
            Err(e) => format!("❌ 章节 '{section_title}' 更新失败: {e}"),
        }
    }

    pub async fn add_section(&self, section_title: &str, content: &str) -> String {
        let existing = self.read_paper().await.unwrap_or_default();

        let mut updated = if existing.trim().is_empty() {
            format!("# {section_title}\n")
        } else {
            format!("{existing}\n\n# {section_title}\n")
        };
        if !content.trim().is_empty() {
            updated.push_str(&format!("\n{}\n", content.trim()));
        }

        match self.save_paper(&updated).await {
            Ok(()) => format!("✅ 章节 '{section_title}' 添加成功"),
            Err(e) => format!("❌ 章节 '{section_title}' 添加失败: {e}"),
        }
    }

    pub async fn rename_section_title(&self, old_title: &str, new_title: &str) -> String {
        let Some(content) = self.read_paper().await else {
            return "错误：当前工作目录中没有找到paper.md文件".to_string();
        };

        match rename_heading(&content, old_title, new_title) {
            Some(updated) => match self.save_paper(&updated).await {
                Ok(()) => format!("✅ 章节标题已从 '{old_title}' 改为 '{new_title}'"),
                Err(e) => format!("❌ 修改章节标题失败: {e}"),
            },
            None => format!("未找到章节: {old_title}"),
        }
    }

    async fn read_paper(&self) -> Option<String> {
        let path = self.workspace.root().join("paper.md");
        tokio::fs::read_to_string(path).await.ok()
    }

    async fn save_paper(&self, content: &str) -> Result<(), String> {
        let path = self.workspace.root().join("paper.md");
        tokio::fs::write(path, content)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Body of a section without its heading line.
fn existing_body(content: &str, section_title: &str) -> Option<String> {
    let section = section_content(content, section_title)?;
    let mut lines = section.lines();
    lines.next();
    Some(lines.collect::<Vec<_>>().join("\n").trim().to_string())
}
