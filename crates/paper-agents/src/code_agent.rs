//! Code agent: iterates sandbox executions until the task succeeds.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use paper_core::{JsonBlock, Message, StreamSink, ToolCall, ToolSchema};
use paper_llm::LlmHandler;
use paper_sandbox::PythonSandbox;

use crate::args::parse_tool_args;
use crate::prompts;

const MAX_TURNS: usize = 50;

pub struct CodeAgent {
    handler: LlmHandler,
    sandbox: PythonSandbox,
    sink: Arc<dyn StreamSink>,
    cancel: CancellationToken,
}

impl CodeAgent {
    pub fn new(
        handler: LlmHandler,
        sandbox: PythonSandbox,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            sandbox,
            sink,
            cancel,
        }
    }

    /// Run the task to completion and return the final output. Failures are
    /// part of the returned text, never raised to the planner.
    pub async fn run(&self, task_prompt: &str) -> String {
        log::info!("CodeAgent开始执行任务: {:.100}", task_prompt);
        let preview: String = task_prompt.chars().take(100).collect();
        self.sink
            .card(JsonBlock::text(
                "start",
                format!("开始执行代码任务: {preview}..."),
            ))
            .await;

        let mut conversation = vec![
            Message::system(prompts::code_agent_prompt()),
            Message::user(task_prompt),
        ];
        let schemas = sandbox_schemas();
        let mut last_tool_result = String::new();

        for turn in 0..MAX_TURNS {
            if self.cancel.is_cancelled() {
                log::info!("CodeAgent任务被取消");
                return "代码任务已取消".to_string();
            }

            let (assistant, tool_calls) = match self
                .handler
                .process_stream(&conversation, &schemas, self.sink.as_ref(), &self.cancel)
                .await
            {
                Ok(output) => output,
                Err(_) => return "代码任务已取消".to_string(),
            };
            let content = assistant.content.clone();
            conversation.push(assistant);

            if tool_calls.is_empty() {
                log::info!("CodeAgent在第 {} 轮完成", turn + 1);
                self.sink
                    .card(JsonBlock::text("result", content.clone()))
                    .await;
                return content;
            }

            for call in &tool_calls {
                if self.cancel.is_cancelled() {
                    return "代码任务已取消".to_string();
                }
                let result = self.dispatch(call).await;
                last_tool_result = result.clone();
                conversation.push(Message::tool_result(call.id.clone(), result));
            }
        }

        // Cap reached: deliver the final tool result.
        log::warn!("CodeAgent达到迭代上限 {MAX_TURNS}");
        self.sink
            .card(JsonBlock::text("result", last_tool_result.clone()))
            .await;
        last_tool_result
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        let name = call.function.name.as_str();
        self.sink
            .card(JsonBlock::text(
                "tool_call",
                format!("CodeAgent正在执行工具调用: {name}"),
            ))
            .await;

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

        let result = match name {
            "save_and_execute" => {
                self.sandbox
                    .save_and_execute(str_arg("code"), str_arg("filename"))
                    .await
            }
            "execute_code" => self.sandbox.execute_code(str_arg("code")).await,
            "execute_file" => self.sandbox.execute_file(str_arg("file_path")).await,
            "edit_code_file" => {
                self.sandbox
                    .edit_code_file(str_arg("filename"), str_arg("new_code_content"))
                    .await
            }
            "list_code_files" => self.sandbox.list_code_files().await,
            unknown => format!("未知工具: {unknown}"),
        };

        let preview: String = result.chars().take(500).collect();
        self.sink
            .card(JsonBlock::text("tool_result", preview))
            .await;
        result
    }
}

fn sandbox_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::function(
            "save_and_execute",
            "保存Python代码到文件并立即执行，适合需要生成图表或日志的任务",
            json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "完整的Python代码"},
                    "filename": {"type": "string", "description": "文件名（不需要.py后缀）"}
                },
                "required": ["code", "filename"]
            }),
        ),
        ToolSchema::function(
            "execute_code",
            "直接执行Python代码字符串，不落盘",
            json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "要执行的Python代码"}
                },
                "required": ["code"]
            }),
        ),
        ToolSchema::function(
            "execute_file",
            "执行指定的Python代码文件，路径相对于工作空间",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "代码文件路径"}
                },
                "required": ["file_path"]
            }),
        ),
        ToolSchema::function(
            "edit_code_file",
            "修改已存在的Python代码文件，写入完整的新代码内容",
            json!({
                "type": "object",
                "properties": {
                    "filename": {"type": "string", "description": "文件名（不需要.py后缀）"},
                    "new_code_content": {"type": "string", "description": "完整的新代码内容"}
                },
                "required": ["filename", "new_code_content"]
            }),
        ),
        ToolSchema::function(
            "list_code_files",
            "列出当前工作空间下的所有Python代码文件",
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

    #[tokio::test]
    async fn tool_then_answer_flow_emits_cards() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("code")).unwrap();

        let provider = ScriptedProvider {
            turns: StdMutex::new(vec![
                vec![tool_call_chunk("call_1", "list_code_files", "{}")],
                vec![LlmChunk::Token("任务完成".to_string())],
            ]),
        };
        let sink = Arc::new(RecordingSink::default());
        let agent = CodeAgent::new(
            LlmHandler::new(Arc::new(provider)),
            PythonSandbox::new(dir.path()),
            sink.clone(),
            CancellationToken::new(),
        );

        let output = agent.run("列出代码文件").await;
        assert_eq!(output, "任务完成");

        let cards = sink.cards.lock().unwrap();
        let types: Vec<&str> = cards.iter().map(|c| c.block_type.as_str()).collect();
        assert_eq!(types, vec!["start", "tool_call", "tool_result", "result"]);
    }

    #[tokio::test]
    async fn unknown_tool_result_feeds_back_to_llm() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider {
            turns: StdMutex::new(vec![
                vec![tool_call_chunk("call_1", "rm_rf", "{}")],
                vec![LlmChunk::Token("好的".to_string())],
            ]),
        };
        let sink = Arc::new(RecordingSink::default());
        let agent = CodeAgent::new(
            LlmHandler::new(Arc::new(provider)),
            PythonSandbox::new(dir.path()),
            sink.clone(),
            CancellationToken::new(),
        );

        let output = agent.run("做点什么").await;
        assert_eq!(output, "好的");

        let cards = sink.cards.lock().unwrap();
        let result_card = cards
            .iter()
            .find(|c| c.block_type == "tool_result")
            .unwrap();
        assert!(result_card.data.as_str().unwrap().contains("未知工具"));
    }

    #[tokio::test]
    async fn cancellation_returns_promptly() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider {
            turns: StdMutex::new(vec![vec![LlmChunk::Token("never".to_string())]]),
        };
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let agent = CodeAgent::new(
            LlmHandler::new(Arc::new(provider)),
            PythonSandbox::new(dir.path()),
            sink,
            cancel,
        );

        let output = agent.run("任务").await;
        assert_eq!(output, "代码任务已取消");
    }
}
