//! The planner: turns a user question into tool calls and a final answer.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use paper_chat::ChatStore;
use paper_core::{
    AgentError, CompressionStrategy, ContextManager, Message, Role, StreamSink, ToolCall,
};
use paper_llm::LlmHandler;
use paper_sandbox::PythonSandbox;
use paper_tools::catalog::{CODE_AGENT_TOOL, WRITER_AGENT_TOOL};
use paper_tools::PlannerToolset;
use paper_workspace::Workspace;

use crate::args::parse_tool_args;
use crate::code_agent::CodeAgent;
use crate::prompts;
use crate::sinks::SubAgentSink;
use crate::writer_agent::WriterAgent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Markdown,
    Word,
    Latex,
}

impl OutputMode {
    pub fn parse(mode: &str) -> Self {
        match mode.to_ascii_lowercase().as_str() {
            "word" => OutputMode::Word,
            "latex" => OutputMode::Latex,
            _ => OutputMode::Markdown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Markdown => "markdown",
            OutputMode::Word => "word",
            OutputMode::Latex => "latex",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MainAgentConfig {
    pub work_id: String,
    pub template_id: Option<i64>,
    pub output_mode: OutputMode,
    /// Directory holding `<id>_template.md` seed files.
    pub templates_dir: PathBuf,
}

pub struct MainAgent {
    config: MainAgentConfig,
    brain: LlmHandler,
    code: LlmHandler,
    writer: Option<LlmHandler>,
    workspace: Workspace,
    chat_store: Arc<ChatStore>,
    sink: Arc<dyn StreamSink>,
    toolset: PlannerToolset,
    context_manager: ContextManager,
    cancel: CancellationToken,
    conversation: Vec<Message>,
}

impl MainAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MainAgentConfig,
        brain: LlmHandler,
        code: LlmHandler,
        writer: Option<LlmHandler>,
        workspace: Workspace,
        chat_store: Arc<ChatStore>,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> Self {
        let has_template = config.template_id.is_some();
        let writer_enabled = writer.is_some();

        if has_template {
            copy_template_if_missing(&config, &workspace);
        }

        let toolset = PlannerToolset::new(
            workspace.clone(),
            Some(sink.clone()),
            has_template,
            writer_enabled,
        );
        let system_prompt = prompts::main_agent_prompt(has_template, writer_enabled);

        log::info!(
            "[{}] MainAgent初始化完成，template_id: {:?}, output_mode: {}",
            config.work_id,
            config.template_id,
            config.output_mode.as_str()
        );

        Self {
            config,
            brain,
            code,
            writer,
            workspace,
            chat_store,
            sink,
            toolset,
            context_manager: ContextManager::default(),
            cancel,
            conversation: vec![Message::system(system_prompt)],
        }
    }

    /// Seed the conversation from the persisted chat log (user/assistant
    /// messages only), keeping the system prompt first.
    pub async fn load_history(&mut self) {
        let messages = match self
            .chat_store
            .get_messages(&self.config.work_id, None)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("[{}] 加载历史消息失败: {e}", self.config.work_id);
                return;
            }
        };

        let mut loaded = 0usize;
        for message in messages {
            let role = match message.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => continue,
            };
            self.conversation.push(Message {
                role,
                ..Message::user(message.content)
            });
            loaded += 1;
        }
        log::info!("[{}] 已加载 {loaded} 条历史消息", self.config.work_id);
        self.compress_if_needed();
    }

    /// One full planner turn. Exactly one assistant message is persisted on
    /// success (via the sink's finalize); a cancelled turn persists none.
    pub async fn run(&mut self, user_problem: &str) -> Result<String, AgentError> {
        log::info!(
            "[{}] MainAgent开始执行，问题长度: {} 字符",
            self.config.work_id,
            user_problem.chars().count()
        );

        self.compress_if_needed();

        // Replay guard: an identical most-recent user message means this
        // turn already ran.
        let last_user = self
            .conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User);
        if last_user.map(|m| m.content.as_str()) == Some(user_problem) {
            log::warn!("[{}] 检测到重复的用户消息，跳过处理", self.config.work_id);
            return Ok("检测到重复消息，已跳过处理".to_string());
        }

        // The question survives a mid-turn crash: persisted before the LLM
        // is ever invoked.
        self.chat_store
            .append(&self.config.work_id, "user", user_problem, None)
            .await
            .map_err(|e| AgentError::ChatLog(e.to_string()))?;
        self.conversation.push(Message::user(user_problem));

        let schemas = self.toolset.schemas();
        let mut iteration = 0usize;
        let final_content = loop {
            iteration += 1;
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            log::info!("[{}] MainAgent第 {iteration} 次迭代", self.config.work_id);

            let (assistant, tool_calls) = self
                .brain
                .process_stream(&self.conversation, &schemas, self.sink.as_ref(), &self.cancel)
                .await?;
            let content = assistant.content.clone();
            self.conversation.push(assistant);

            if tool_calls.is_empty() {
                log::info!("[{}] MainAgent没有工具调用，任务完成", self.config.work_id);
                break content;
            }

            log::info!(
                "[{}] MainAgent执行 {} 个工具调用",
                self.config.work_id,
                tool_calls.len()
            );
            for call in &tool_calls {
                if self.cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                let result = self.dispatch(call).await;
                self.conversation
                    .push(Message::tool_result(call.id.clone(), result));
            }
        };

        self.sink.finalize().await;
        log::info!(
            "[{}] MainAgent执行完成，总共 {iteration} 次迭代",
            self.config.work_id
        );
        Ok(final_content)
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        let name = call.function.name.as_str();
        let args = match parse_tool_args(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                log::error!("[{}] 工具参数解析失败: {e}", self.config.work_id);
                return format!("工具参数解析失败: {e}");
            }
        };

        match name {
            CODE_AGENT_TOOL => {
                let task_prompt = args
                    .get("task_prompt")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.run_code_agent(task_prompt).await
            }
            WRITER_AGENT_TOOL => {
                let instruction = args
                    .get("instruction")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.run_writer_agent(instruction).await
            }
            _ => self.toolset.execute(name, &args).await,
        }
    }

    async fn run_code_agent(&self, task_prompt: &str) -> String {
        let sub_sink: Arc<dyn StreamSink> = Arc::new(SubAgentSink::new(
            self.sink.clone(),
            "code_agent",
            "CodeAgent",
        ));
        let sandbox = PythonSandbox::new(self.workspace.root());
        let agent = CodeAgent::new(
            self.code.clone(),
            sandbox,
            sub_sink.clone(),
            self.cancel.child_token(),
        );

        let result = agent.run(task_prompt).await;
        sub_sink.finalize().await;
        log::info!(
            "[{}] CodeAgent执行完成，结果长度: {}",
            self.config.work_id,
            result.chars().count()
        );
        result
    }

    async fn run_writer_agent(&self, instruction: &str) -> String {
        let Some(writer) = &self.writer else {
            return "WriterAgent未配置：请先为该用户配置 writing 角色的模型".to_string();
        };

        let sub_sink: Arc<dyn StreamSink> = Arc::new(SubAgentSink::new(
            self.sink.clone(),
            "writer_agent",
            "WriterAgent",
        ));
        let agent = WriterAgent::new(
            writer.clone(),
            self.config.output_mode,
            self.workspace.clone(),
            sub_sink.clone(),
            self.cancel.child_token(),
        );

        let result = agent.run(instruction).await;
        sub_sink.finalize().await;
        result
    }

    fn compress_if_needed(&mut self) {
        let status = self.context_manager.status(&self.conversation);
        if !status.compression_needed {
            return;
        }

        let strategy = CompressionStrategy::for_usage(status.token_usage_ratio);
        log::info!(
            "[{}] 上下文过长，开始压缩。token使用率: {:.2}",
            self.config.work_id,
            status.token_usage_ratio
        );
        let (compressed, _records) = self.context_manager.compress(&self.conversation, strategy);
        self.conversation = compressed;
    }
}

fn copy_template_if_missing(config: &MainAgentConfig, workspace: &Workspace) {
    let Some(template_id) = config.template_id else {
        return;
    };
    let target = workspace.root().join("paper.md");
    if target.exists() {
        return;
    }

    let template_file = config
        .templates_dir
        .join(format!("{template_id}_template.md"));
    if !template_file.is_file() {
        log::warn!(
            "[{}] 模板文件不存在: {}",
            config.work_id,
            template_file.display()
        );
        return;
    }

    match std::fs::copy(&template_file, &target) {
        Ok(_) => log::info!(
            "[{}] 模板文件已复制到工作空间，重命名为paper.md",
            config.work_id
        ),
        Err(e) => log::error!("[{}] 复制模板文件失败: {e}", config.work_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    use paper_core::{StreamEvent, ToolSchema};
    use paper_llm::{ChatOutput, LlmChunk, LlmError, LlmProvider, LlmStream, ToolCallDelta};

    use crate::sinks::{EventPublisher, PersistentSink};

    struct ScriptedProvider {
        turns: StdMutex<Vec<Vec<LlmChunk>>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<LlmChunk>>) -> Arc<Self> {
            Arc::new(Self {
                turns: StdMutex::new(turns),
            })
        }
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
    struct RecordingPublisher {
        events: StdMutex<Vec<StreamEvent>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: StreamEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn token(text: &str) -> LlmChunk {
        LlmChunk::Token(text.to_string())
    }

    fn tool_call(id: &str, name: &str, args: &str) -> LlmChunk {
        LlmChunk::ToolCallDelta(ToolCallDelta {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(args.to_string()),
        })
    }

    struct Fixture {
        _dir: TempDir,
        publisher: Arc<RecordingPublisher>,
        chat_store: Arc<ChatStore>,
        agent: MainAgent,
    }

    async fn fixture(brain_turns: Vec<Vec<LlmChunk>>, code_turns: Vec<Vec<LlmChunk>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        let chat_store = Arc::new(ChatStore::new(dir.path()));
        let publisher = Arc::new(RecordingPublisher::default());
        let sink = Arc::new(PersistentSink::new(
            "w1",
            publisher.clone(),
            chat_store.clone(),
        ));

        let agent = MainAgent::new(
            MainAgentConfig {
                work_id: "w1".to_string(),
                template_id: None,
                output_mode: OutputMode::Markdown,
                templates_dir: dir.path().join("templates"),
            },
            LlmHandler::new(ScriptedProvider::new(brain_turns)),
            LlmHandler::new(ScriptedProvider::new(code_turns)),
            None,
            workspace,
            chat_store.clone(),
            sink,
            CancellationToken::new(),
        );

        Fixture {
            _dir: dir,
            publisher,
            chat_store,
            agent,
        }
    }

    #[tokio::test]
    async fn tool_free_answer_persists_one_text_message() {
        let mut fixture = fixture(vec![vec![token("Hello")]], vec![]).await;
        let answer = fixture.agent.run("Hi").await.unwrap();
        assert_eq!(answer, "Hello");

        let events = fixture.publisher.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![StreamEvent::Content {
                content: "Hello".to_string()
            }]
        );

        let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[1].message_type, "text");
    }

    #[tokio::test]
    async fn code_agent_turn_persists_json_card_message() {
        let mut fixture = fixture(
            vec![
                vec![tool_call(
                    "call_1",
                    "CodeAgent",
                    r#"{"task_prompt": "列出代码文件"}"#,
                )],
                vec![token("图表已生成")],
            ],
            vec![
                vec![tool_call("call_2", "list_code_files", "{}")],
                vec![token("代码任务完成")],
            ],
        )
        .await;

        let answer = fixture.agent.run("画一张图").await.unwrap();
        assert_eq!(answer, "图表已生成");

        let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].message_type, "json_card");

        let types: Vec<&str> = messages[1]
            .json_blocks
            .iter()
            .map(|b| b.block_type.as_str())
            .collect();
        assert!(types.contains(&"code_agent_start"), "types: {types:?}");
        assert!(types.contains(&"code_agent_tool_call"), "types: {types:?}");
        assert!(types.contains(&"code_agent_tool_result"), "types: {types:?}");
        assert!(types.contains(&"code_agent_result"), "types: {types:?}");
        assert!(types.contains(&"code_agent_complete"), "types: {types:?}");
    }

    #[tokio::test]
    async fn path_escape_is_recorded_in_the_final_card_message() {
        let mut fixture = fixture(
            vec![
                vec![tool_call(
                    "call_1",
                    "writemd",
                    r#"{"filename": "../../etc/passwd", "content": "x"}"#,
                )],
                vec![token("无法写入该路径")],
            ],
            vec![],
        )
        .await;

        let answer = fixture.agent.run("写文件").await.unwrap();
        assert_eq!(answer, "无法写入该路径");

        let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages[1].message_type, "json_card");
        let report = messages[1]
            .json_blocks
            .iter()
            .find(|b| b.block_type == "writemd_result")
            .and_then(|b| b.data.as_str())
            .unwrap();
        assert!(report.contains("写入Markdown文件失败"), "got: {report}");
    }

    #[tokio::test]
    async fn duplicate_user_message_is_treated_as_replay() {
        let mut fixture = fixture(vec![vec![token("首次回答")]], vec![]).await;
        fixture.agent.run("同一个问题").await.unwrap();

        let answer = fixture.agent.run("同一个问题").await.unwrap();
        assert_eq!(answer, "检测到重复消息，已跳过处理");

        // No extra messages were written for the replay.
        let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_turn_writes_no_assistant_message() {
        let mut fixture = fixture(vec![vec![token("never")]], vec![]).await;
        fixture.agent.cancel.cancel();

        let result = fixture.agent.run("问题").await;
        assert!(matches!(result, Err(AgentError::Cancelled)));

        let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
        // The user message is persisted before the LLM call; nothing else.
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back_and_loop_continues() {
        let mut fixture = fixture(
            vec![
                vec![tool_call("call_1", "teleport", "{}")],
                vec![token("换个方式")],
            ],
            vec![],
        )
        .await;

        let answer = fixture.agent.run("问题").await.unwrap();
        assert_eq!(answer, "换个方式");
    }

    #[tokio::test]
    async fn template_is_copied_into_workspace_on_init() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
        let templates_dir = dir.path().join("templates");
        std::fs::create_dir_all(&templates_dir).unwrap();
        std::fs::write(templates_dir.join("7_template.md"), "# 模板标题\n").unwrap();

        let chat_store = Arc::new(ChatStore::new(dir.path()));
        let sink = Arc::new(PersistentSink::new(
            "w1",
            Arc::new(RecordingPublisher::default()),
            chat_store.clone(),
        ));
        let _agent = MainAgent::new(
            MainAgentConfig {
                work_id: "w1".to_string(),
                template_id: Some(7),
                output_mode: OutputMode::Markdown,
                templates_dir,
            },
            LlmHandler::new(ScriptedProvider::new(vec![])),
            LlmHandler::new(ScriptedProvider::new(vec![])),
            None,
            workspace.clone(),
            chat_store,
            sink,
            CancellationToken::new(),
        );

        let copied = std::fs::read_to_string(workspace.root().join("paper.md")).unwrap();
        assert_eq!(copied, "# 模板标题\n");
    }
}
