//! The planner-facing tool catalog.
//!
//! The set is constant, not data-driven: schemas are built from the fixed
//! list below and dispatch is a `match` on the tool name. Unknown names
//! come back as an error string for the LLM to read. `CodeAgent` and
//! `WriterAgent` appear in the schema list but are dispatched by the
//! planner itself.

use std::sync::Arc;

use serde_json::{json, Value};

use paper_core::{StreamSink, ToolSchema};
use paper_workspace::Workspace;

use crate::attachments::AttachmentTools;
use crate::file_tools::FileTools;
use crate::images::ImageInserter;
use crate::template_tools::TemplateTools;

pub const CODE_AGENT_TOOL: &str = "CodeAgent";
pub const WRITER_AGENT_TOOL: &str = "WriterAgent";

pub struct PlannerToolset {
    file_tools: FileTools,
    attachments: AttachmentTools,
    images: ImageInserter,
    template_tools: Option<TemplateTools>,
    writer_enabled: bool,
}

impl PlannerToolset {
    pub fn new(
        workspace: Workspace,
        sink: Option<Arc<dyn StreamSink>>,
        with_template_tools: bool,
        writer_enabled: bool,
    ) -> Self {
        Self {
            file_tools: FileTools::new(workspace.clone(), sink.clone()),
            attachments: AttachmentTools::new(workspace.clone(), sink.clone()),
            images: ImageInserter::new(workspace.clone(), sink),
            template_tools: with_template_tools.then(|| TemplateTools::new(workspace)),
            writer_enabled,
        }
    }

    /// True for the two tool names the planner dispatches to sub-agents.
    pub fn is_sub_agent(name: &str) -> bool {
        name == CODE_AGENT_TOOL || name == WRITER_AGENT_TOOL
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = vec![
            ToolSchema::function(
                CODE_AGENT_TOOL,
                "当需要数学计算、数据分析或执行编程任务时调用。提供清晰、具体的任务描述。不要提供代码。",
                json!({
                    "type": "object",
                    "properties": {
                        "task_prompt": {"type": "string", "description": "需要执行的具体任务描述。不要提供代码。"}
                    },
                    "required": ["task_prompt"]
                }),
            ),
            ToolSchema::function(
                "writemd",
                "将内容写入Markdown文件到workspace目录，支持多种写入模式",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string", "description": "文件名（不需要.md后缀）"},
                        "content": {"type": "string", "description": "Markdown格式的内容"},
                        "mode": {
                            "type": "string",
                            "description": "写入模式：overwrite(覆盖), append(追加), modify(修改), insert(插入), smart_replace(智能替换), section_update(章节更新)",
                            "default": "overwrite"
                        }
                    },
                    "required": ["filename", "content"]
                }),
            ),
            ToolSchema::function(
                "update_template",
                "专门用于更新论文文件的工具，只支持章节级别更新，必须指定章节名称",
                json!({
                    "type": "object",
                    "properties": {
                        "template_name": {"type": "string", "description": "论文文件名，默认为paper.md"},
                        "content": {"type": "string", "description": "要更新的内容"},
                        "section": {"type": "string", "description": "要更新的章节名称（必需）"}
                    },
                    "required": ["content", "section"]
                }),
            ),
            ToolSchema::function(
                "tree",
                "显示workspace目录的树形结构",
                json!({
                    "type": "object",
                    "properties": {
                        "directory": {"type": "string", "description": "要显示的目录路径，默认为workspace目录"}
                    },
                    "required": []
                }),
            ),
            ToolSchema::function(
                "list_attachments",
                "列出工作空间中所有上传的附件文件",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
            ToolSchema::function(
                "read_attachment",
                "读取指定附件文件的内容，支持txt、pdf、docx、csv、excel等格式",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string", "description": "附件文件路径（相对于attachment目录的路径）"}
                    },
                    "required": ["file_path"]
                }),
            ),
            ToolSchema::function(
                "get_attachment_info",
                "获取附件文件的详细信息，包括文件大小、类型、创建时间等元数据",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string", "description": "附件文件路径（相对于attachment目录的路径）"}
                    },
                    "required": ["file_path"]
                }),
            ),
            ToolSchema::function(
                "search_attachments",
                "在所有附件文件中搜索关键词，支持文件名和文件内容搜索",
                json!({
                    "type": "object",
                    "properties": {
                        "keyword": {"type": "string", "description": "要搜索的关键词"},
                        "file_type": {"type": "string", "description": "可选的文件类型过滤（如 'pdf', 'docx', 'txt' 等）"}
                    },
                    "required": ["keyword"]
                }),
            ),
            ToolSchema::function(
                "insert_latest_image",
                "将最新生成的图片插入到markdown文件中，支持智能位置选择",
                json!({
                    "type": "object",
                    "properties": {
                        "target_file": {"type": "string", "description": "目标markdown文件名，默认为paper.md", "default": "paper.md"},
                        "description": {"type": "string", "description": "图片描述文字", "default": "生成的图表"},
                        "position": {"type": "string", "description": "插入位置: smart(智能位置), end(文件末尾), beginning(文件开头)", "default": "smart"}
                    },
                    "required": []
                }),
            ),
            ToolSchema::function(
                "list_output_images",
                "列出outputs目录中的所有图片文件",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
            ToolSchema::function(
                "insert_image_by_name",
                "插入指定名称的图片到markdown文件中",
                json!({
                    "type": "object",
                    "properties": {
                        "image_name": {"type": "string", "description": "图片文件名（如：plots/plot_1.png）"},
                        "target_file": {"type": "string", "description": "目标markdown文件名，默认为paper.md", "default": "paper.md"},
                        "description": {"type": "string", "description": "图片描述文字", "default": "图表"}
                    },
                    "required": ["image_name"]
                }),
            ),
            ToolSchema::function(
                "get_latest_image_info",
                "获取最新图片文件的详细信息",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
        ];

        if self.writer_enabled {
            schemas.insert(
                1,
                ToolSchema::function(
                    WRITER_AGENT_TOOL,
                    "当需要撰写论文章节或长篇文字内容时调用。提供高层次的写作目标，WriterAgent会自主创作内容。",
                    json!({
                        "type": "object",
                        "properties": {
                            "instruction": {"type": "string", "description": "写作指令，例如：写一个Introduction章节"}
                        },
                        "required": ["instruction"]
                    }),
                ),
            );
        }

        if self.template_tools.is_some() {
            schemas.extend([
                ToolSchema::function(
                    "analyze_template",
                    "分析当前工作目录中模板文件的模板结构，识别所有标题层级和内容，为AI提供模板概览",
                    json!({"type": "object", "properties": {}, "required": []}),
                ),
                ToolSchema::function(
                    "get_section_content",
                    "获取paper.md文件中指定章节的内容",
                    json!({
                        "type": "object",
                        "properties": {
                            "section_title": {"type": "string", "description": "要查看的章节标题"}
                        },
                        "required": ["section_title"]
                    }),
                ),
                ToolSchema::function(
                    "update_section_content",
                    "更新paper.md文件中指定章节的内容，支持多种更新模式",
                    json!({
                        "type": "object",
                        "properties": {
                            "section_title": {"type": "string", "description": "要更新的章节标题"},
                            "new_content": {"type": "string", "description": "新内容"},
                            "mode": {
                                "type": "string",
                                "description": "更新模式：replace(替换), append(追加), prepend(插入), merge(合并)",
                                "default": "replace"
                            }
                        },
                        "required": ["section_title", "new_content"]
                    }),
                ),
                ToolSchema::function(
                    "add_section",
                    "在paper.md文件末尾添加新章节",
                    json!({
                        "type": "object",
                        "properties": {
                            "section_title": {"type": "string", "description": "新章节标题"},
                            "content": {"type": "string", "description": "新章节内容", "default": ""}
                        },
                        "required": ["section_title"]
                    }),
                ),
                ToolSchema::function(
                    "rename_section_title",
                    "修改paper.md文件中指定章节的标题，保持标题层级不变",
                    json!({
                        "type": "object",
                        "properties": {
                            "old_title": {"type": "string", "description": "原章节标题（支持模糊匹配）"},
                            "new_title": {"type": "string", "description": "新章节标题"}
                        },
                        "required": ["old_title", "new_title"]
                    }),
                ),
            ]);
        }

        schemas
    }

    /// Dispatch one direct tool call. Sub-agent names are the planner's
    /// business and report an error here.
    pub async fn execute(&self, name: &str, args: &Value) -> String {
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");
        let opt_arg = |key: &str, default: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        match name {
            "writemd" => {
                self.file_tools
                    .writemd(
                        str_arg("filename"),
                        str_arg("content"),
                        &opt_arg("mode", "overwrite"),
                    )
                    .await
            }
            "update_template" => {
                self.file_tools
                    .update_template(
                        &opt_arg("template_name", "paper.md"),
                        str_arg("content"),
                        str_arg("section"),
                    )
                    .await
            }
            "tree" => {
                let directory = args.get("directory").and_then(Value::as_str);
                self.file_tools.tree(directory).await
            }
            "list_attachments" => self.attachments.list_attachments().await,
            "read_attachment" => self.attachments.read_attachment(str_arg("file_path")).await,
            "get_attachment_info" => {
                self.attachments
                    .get_attachment_info(str_arg("file_path"))
                    .await
            }
            "search_attachments" => {
                let file_type = args.get("file_type").and_then(Value::as_str);
                self.attachments
                    .search_attachments(str_arg("keyword"), file_type)
                    .await
            }
            "insert_latest_image" => {
                self.images
                    .insert_latest_image(
                        &opt_arg("target_file", "paper.md"),
                        &opt_arg("description", "生成的图表"),
                        &opt_arg("position", "smart"),
                    )
                    .await
            }
            "list_output_images" => self.images.list_output_images().await,
            "insert_image_by_name" => {
                self.images
                    .insert_image_by_name(
                        str_arg("image_name"),
                        &opt_arg("target_file", "paper.md"),
                        &opt_arg("description", "图表"),
                    )
                    .await
            }
            "get_latest_image_info" => self.images.get_latest_image_info().await,
            "analyze_template" => match &self.template_tools {
                Some(tools) => tools.analyze_template().await,
                None => template_disabled(name),
            },
            "get_section_content" => match &self.template_tools {
                Some(tools) => tools.get_section_content(str_arg("section_title")).await,
                None => template_disabled(name),
            },
            "update_section_content" => match &self.template_tools {
                Some(tools) => {
                    tools
                        .update_section_content(
                            str_arg("section_title"),
                            str_arg("new_content"),
                            &opt_arg("mode", "replace"),
                        )
                        .await
                }
                None => template_disabled(name),
            },
            "add_section" => match &self.template_tools {
                Some(tools) => {
                    tools
                        .add_section(str_arg("section_title"), str_arg("content"))
                        .await
                }
                None => template_disabled(name),
            },
            "rename_section_title" => match &self.template_tools {
                Some(tools) => {
                    tools
                        .rename_section_title(str_arg("old_title"), str_arg("new_title"))
                        .await
                }
                None => template_disabled(name),
            },
            unknown => {
                log::warn!("未知工具: {unknown}");
                format!("未知工具: {unknown}")
            }
        }
    }
}

fn template_disabled(name: &str) -> String {
    format!("工具 {name} 仅在使用模板的工作中可用")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn toolset(with_template: bool, writer: bool) -> (TempDir, PlannerToolset) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        (
            dir,
            PlannerToolset::new(workspace, None, with_template, writer),
        )
    }

    #[tokio::test]
    async fn base_catalog_has_fixed_names() {
        let (_dir, toolset) = toolset(false, false).await;
        let names: Vec<String> = toolset
            .schemas()
            .into_iter()
            .map(|s| s.function.name)
            .collect();

        assert!(names.contains(&"CodeAgent".to_string()));
        assert!(names.contains(&"writemd".to_string()));
        assert!(names.contains(&"tree".to_string()));
        assert!(!names.contains(&"WriterAgent".to_string()));
        assert!(!names.contains(&"analyze_template".to_string()));
    }

    #[tokio::test]
    async fn template_and_writer_extend_the_catalog() {
        let (_dir, toolset) = toolset(true, true).await;
        let names: Vec<String> = toolset
            .schemas()
            .into_iter()
            .map(|s| s.function.name)
            .collect();

        assert!(names.contains(&"WriterAgent".to_string()));
        assert!(names.contains(&"analyze_template".to_string()));
        assert!(names.contains(&"rename_section_title".to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_reports_error_string() {
        let (_dir, toolset) = toolset(false, false).await;
        let out = toolset.execute("launch_rockets", &json!({})).await;
        assert_eq!(out, "未知工具: launch_rockets");
    }

    #[tokio::test]
    async fn writemd_dispatch_passes_arguments() {
        let (dir, toolset) = toolset(false, false).await;
        let out = toolset
            .execute(
                "writemd",
                &json!({"filename": "paper", "content": "# 标题", "mode": "overwrite"}),
            )
            .await;
        assert!(out.contains("成功重写覆盖"), "got: {out}");
        assert!(dir.path().join("w1/paper.md").is_file());
    }

    #[tokio::test]
    async fn path_escape_surfaces_as_error_string() {
        let (dir, toolset) = toolset(false, false).await;
        let out = toolset
            .execute(
                "writemd",
                &json!({"filename": "../../etc/passwd", "content": "x"}),
            )
            .await;
        assert!(out.contains("写入Markdown文件失败"), "got: {out}");
        assert!(!dir.path().join("etc/passwd.md").exists());
    }

    #[tokio::test]
    async fn template_tools_require_template_mode() {
        let (_dir, toolset) = toolset(false, false).await;
        let out = toolset.execute("analyze_template", &json!({})).await;
        assert!(out.contains("仅在使用模板的工作中可用"), "got: {out}");
    }
}
