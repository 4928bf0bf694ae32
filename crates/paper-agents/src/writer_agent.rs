//! Writer agent: executes one high-level writing instruction with the tool
//! set chosen by the work's output mode.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use paper_core::{JsonBlock, Message, StreamSink, ToolCall, ToolSchema};
use paper_llm::LlmHandler;
use paper_tools::{FileTools, WordTools};
use paper_workspace::Workspace;

use crate::args::parse_tool_args;
use crate::main_agent::OutputMode;
use crate::prompts;

const MAX_TURNS: usize = 100;

pub struct WriterAgent {
    handler: LlmHandler,
    output_mode: OutputMode,
    file_tools: FileTools,
    word_tools: WordTools,
    sink: Arc<dyn StreamSink>,
    cancel: CancellationToken,
}

impl WriterAgent {
    pub fn new(
        handler: LlmHandler,
        output_mode: OutputMode,
        workspace: Workspace,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            output_mode,
            file_tools: FileTools::new(workspace.clone(), Some(sink.clone())),
            word_tools: WordTools::new(workspace, Some(sink.clone())),
            sink,
            cancel,
        }
    }

    pub async fn run(&self, instruction: &str) -> String {
        if instruction.trim().is_empty() {
            return "Error: Instruction validation failed: Empty instruction\n\
                    Details: Instruction must specify what content to write\n\
                    Suggestion: Provide instruction in format: 'Add [type] with content: [text]'"
                .to_string();
        }
        if self.output_mode == OutputMode::Latex {
            log::warn!("WriterAgent收到latex模式任务，latex尚不支持");
            return "LaTeX mode is not yet supported. Please use 'word' or 'markdown' mode instead."
                .to_string();
        }

        log::info!("WriterAgent开始执行任务: {:.100}", instruction);
        let preview: String = instruction.chars().take(100).collect();
        self.sink
            .card(JsonBlock::text(
                "start",
                format!("WriterAgent starting: {preview}..."),
            ))
            .await;

        let prompt = prompts::writer_agent_prompt(self.output_mode.as_str());
        let mut conversation = vec![Message::system(prompt), Message::user(instruction)];
        let schemas = self.schemas();
        let mut last_tool_result = String::new();

        for _turn in 0..MAX_TURNS {
            if self.cancel.is_cancelled() {
                return "写作任务已取消".to_string();
            }

            let (assistant, tool_calls) = match self
                .handler
                .process_stream(&conversation, &schemas, self.sink.as_ref(), &self.cancel)
                .await
            {
                Ok(output) => output,
                Err(_) => return "写作任务已取消".to_string(),
            };
            let content = assistant.content.clone();
            conversation.push(assistant);

            if tool_calls.is_empty() {
                self.sink
                    .card(JsonBlock::text("result", content.clone()))
                    .await;
                return content;
            }

            for call in &tool_calls {
                if self.cancel.is_cancelled() {
                    return "写作任务已取消".to_string();
                }
                let result = self.dispatch(call).await;
                last_tool_result = result.clone();
                conversation.push(Message::tool_result(call.id.clone(), result));
            }
        }

        log::warn!("WriterAgent达到迭代上限 {MAX_TURNS}");
        self.sink
            .card(JsonBlock::text("result", last_tool_result.clone()))
            .await;
        last_tool_result
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        match self.output_mode {
            OutputMode::Markdown => markdown_schemas(),
            OutputMode::Word => word_schemas(),
            OutputMode::Latex => Vec::new(),
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        let name = call.function.name.as_str();
        let args = match parse_tool_args(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                let error = format!("工具参数解析失败: {e}");
                self.sink
                    .card(JsonBlock::text("tool_error", error.clone()))
                    .await;
                return error;
            }
        };
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");
        let opt_arg = |key: &str, default: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        match name {
            // Markdown mode
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
            // Word mode
            "create_document" => {
                let title = args.get("title").and_then(Value::as_str);
                let overwrite = args.get("overwrite").and_then(Value::as_bool).unwrap_or(false);
                self.word_tools.create_document(title, overwrite).await
            }
            "add_heading" => {
                let level = args.get("level").and_then(Value::as_u64).unwrap_or(1) as usize;
                self.word_tools.add_heading(str_arg("text"), level).await
            }
            "add_paragraph" => self.word_tools.add_paragraph(str_arg("text")).await,
            "add_table" => {
                let rows = args.get("rows").and_then(Value::as_u64).unwrap_or(0) as usize;
                let cols = args.get("cols").and_then(Value::as_u64).unwrap_or(0) as usize;
                let data: Option<Vec<Vec<String>>> = args
                    .get("data")
                    .and_then(|value| serde_json::from_value(value.clone()).ok());
                self.word_tools.add_table(rows, cols, data.as_deref()).await
            }
            "add_picture" => {
                let width = args.get("width").and_then(Value::as_f64);
                self.word_tools
                    .add_picture(str_arg("image_path"), width)
                    .await
            }
            "add_page_break" => self.word_tools.add_page_break().await,
            "get_document_text" => self.word_tools.get_document_text().await,
            "find_text_in_document" => {
                self.word_tools
                    .find_text_in_document(str_arg("text_to_find"))
                    .await
            }
            "format_text" => {
                let index = args
                    .get("paragraph_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                let bold = args.get("bold").and_then(Value::as_bool).unwrap_or(false);
                let italic = args.get("italic").and_then(Value::as_bool).unwrap_or(false);
                self.word_tools.format_text(index, bold, italic).await
            }
            "search_and_replace" => {
                self.word_tools
                    .search_and_replace(str_arg("find_text"), str_arg("replace_text"))
                    .await
            }
            "delete_paragraph" => {
                let index = args
                    .get("paragraph_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                self.word_tools.delete_paragraph(index).await
            }
            "get_all_comments" => self.word_tools.get_all_comments().await,
            unknown => format!("未知工具: {unknown}"),
        }
    }
}

fn markdown_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::function(
            "writemd",
            "将内容写入Markdown文件到workspace目录，支持多种写入模式",
            json!({
                "type": "object",
                "properties": {
                    "filename": {"type": "string", "description": "文件名（不需要.md后缀）"},
                    "content": {"type": "string", "description": "Markdown格式的内容"},
                    "mode": {"type": "string", "description": "写入模式", "default": "overwrite"}
                },
                "required": ["filename", "content"]
            }),
        ),
        ToolSchema::function(
            "update_template",
            "更新论文文件的指定章节",
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
    ]
}

fn word_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::function(
            "create_document",
            "创建新的Word文档 paper.docx",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "可选的文档标题"},
                    "overwrite": {"type": "boolean", "description": "是否覆盖已存在的文档", "default": false}
                },
                "required": []
            }),
        ),
        ToolSchema::function(
            "add_heading",
            "添加标题（1-5级）",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "标题文字"},
                    "level": {"type": "integer", "description": "标题级别 1-5", "default": 1}
                },
                "required": ["text"]
            }),
        ),
        ToolSchema::function(
            "add_paragraph",
            "添加段落",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "段落文字"}
                },
                "required": ["text"]
            }),
        ),
        ToolSchema::function(
            "add_table",
            "添加表格，可附带初始数据",
            json!({
                "type": "object",
                "properties": {
                    "rows": {"type": "integer", "description": "行数"},
                    "cols": {"type": "integer", "description": "列数"},
                    "data": {"type": "array", "items": {"type": "array", "items": {"type": "string"}}, "description": "按行排列的单元格内容"}
                },
                "required": ["rows", "cols"]
            }),
        ),
        ToolSchema::function(
            "add_picture",
            "插入图片（width参数单位是英寸，典型值3-6）",
            json!({
                "type": "object",
                "properties": {
                    "image_path": {"type": "string", "description": "图片路径，相对于工作空间，如 outputs/plots/plot_1.png"},
                    "width": {"type": "number", "description": "图片宽度（英寸）"}
                },
                "required": ["image_path"]
            }),
        ),
        ToolSchema::function(
            "add_page_break",
            "插入分页符",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        ToolSchema::function(
            "get_document_text",
            "提取文档全文内容",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        ToolSchema::function(
            "find_text_in_document",
            "在文档中查找文本",
            json!({
                "type": "object",
                "properties": {
                    "text_to_find": {"type": "string", "description": "要查找的文本"}
                },
                "required": ["text_to_find"]
            }),
        ),
        ToolSchema::function(
            "format_text",
            "格式化指定段落的文字",
            json!({
                "type": "object",
                "properties": {
                    "paragraph_index": {"type": "integer", "description": "段落索引，从0开始"},
                    "bold": {"type": "boolean", "default": false},
                    "italic": {"type": "boolean", "default": false}
                },
                "required": ["paragraph_index"]
            }),
        ),
        ToolSchema::function(
            "search_and_replace",
            "全文查找并替换",
            json!({
                "type": "object",
                "properties": {
                    "find_text": {"type": "string", "description": "要查找的文本"},
                    "replace_text": {"type": "string", "description": "替换为"}
                },
                "required": ["find_text", "replace_text"]
            }),
        ),
        ToolSchema::function(
            "delete_paragraph",
            "删除指定段落",
            json!({
                "type": "object",
                "properties": {
                    "paragraph_index": {"type": "integer", "description": "段落索引，从0开始"}
                },
                "required": ["paragraph_index"]
            }),
        ),
        ToolSchema::function(
            "get_all_comments",
            "获取文档批注信息",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    use paper_llm::{ChatOutput, LlmChunk, LlmError, LlmProvider, LlmStream};

    struct ScriptedProvider {
        turns: StdMutex<Vec<Vec<LlmChunk>>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<LlmStream, LlmError> {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Err(LlmError::Api("script exhausted".to_string()));
            }
            let turn = turns.remove(0);
            Ok(Box::pin(futures::stream::iter(
                turn.into_iter().map(Ok).collect::<Vec<_>>(),
            )))
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ChatOutput, LlmError> {
            unimplemented!("not used")
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        cards: StdMutex<Vec<JsonBlock>>,
    }

    #[async_trait]
    impl StreamSink for RecordingSink {
        async fn token(&self, _text: &str) {}
        async fn card(&self, block: JsonBlock) {
            self.cards.lock().unwrap().push(block);
        }
        async fn set_role(&self, _role: &str) {}
        async fn finalize(&self) {}
    }

    fn tool_call_chunk(id: &str, name: &str, args: &str) -> LlmChunk {
        LlmChunk::ToolCallDelta(paper_llm::ToolCallDelta {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(args.to_string()),
        })
    }

    async fn agent(
        dir: &TempDir,
        mode: OutputMode,
        turns: Vec<Vec<LlmChunk>>,
    ) -> (Arc<RecordingSink>, WriterAgent) {
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let agent = WriterAgent::new(
            LlmHandler::new(Arc::new(ScriptedProvider {
                turns: StdMutex::new(turns),
            })),
            mode,
            workspace,
            sink.clone(),
            CancellationToken::new(),
        );
        (sink, agent)
    }

    #[tokio::test]
    async fn latex_mode_refuses_without_llm_call() {
        let dir = TempDir::new().unwrap();
        let (_sink, agent) = agent(&dir, OutputMode::Latex, vec![]).await;
        let out = agent.run("写Introduction").await;
        assert!(out.contains("LaTeX mode is not yet supported"), "got: {out}");
    }

    #[tokio::test]
    async fn markdown_mode_writes_via_writemd() {
        let dir = TempDir::new().unwrap();
        let (sink, agent) = agent(
            &dir,
            OutputMode::Markdown,
            vec![
                vec![tool_call_chunk(
                    "call_1",
                    "writemd",
                    r##"{"filename": "paper", "content": "# Introduction\n\n内容", "mode": "overwrite"}"##,
                )],
                vec![LlmChunk::Token("已完成Introduction".to_string())],
            ],
        )
        .await;

        let out = agent.run("写Introduction章节").await;
        assert_eq!(out, "已完成Introduction");
        assert!(dir.path().join("w1/paper.md").is_file());

        let cards = sink.cards.lock().unwrap();
        assert_eq!(cards[0].block_type, "start");
        assert!(cards.iter().any(|c| c.block_type == "writemd_result"));
        assert_eq!(cards.last().unwrap().block_type, "result");
    }

    #[tokio::test]
    async fn word_mode_edits_the_docx() {
        let dir = TempDir::new().unwrap();
        let (sink, agent) = agent(
            &dir,
            OutputMode::Word,
            vec![
                vec![tool_call_chunk("call_1", "create_document", "{}")],
                vec![tool_call_chunk(
                    "call_2",
                    "add_paragraph",
                    r#"{"text": "圆周率研究段落"}"#,
                )],
                vec![LlmChunk::Token("完成".to_string())],
            ],
        )
        .await;

        let out = agent.run("写一个段落").await;
        assert_eq!(out, "完成");
        assert!(dir.path().join("w1/paper.docx").is_file());

        let cards = sink.cards.lock().unwrap();
        assert!(cards.iter().any(|c| c.block_type == "word_tool_call"));
        assert!(cards.iter().any(|c| c.block_type == "word_document_saved"));
    }

    #[tokio::test]
    async fn empty_instruction_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (_sink, agent) = agent(&dir, OutputMode::Markdown, vec![]).await;
        let out = agent.run("   ").await;
        assert!(out.contains("Empty instruction"), "got: {out}");
    }
}
