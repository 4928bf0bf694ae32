//! End-to-end turn flows over the supervisor, sink and planner, asserting
//! the frame sequences a transport client observes.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use paper_agents::{MainAgent, MainAgentConfig, OutputMode, PersistentSink};
use paper_chat::ChatStore;
use paper_core::{Message, StreamEvent, ToolSchema};
use paper_llm::{ChatOutput, LlmChunk, LlmError, LlmHandler, LlmProvider, LlmStream, ToolCallDelta};
use paper_server::protocol::ServerFrame;
use paper_server::supervisor::{TaskSupervisor, WorkPublisher};
use paper_server::TaskStatus;
use paper_workspace::Workspace;

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
    supervisor: Arc<TaskSupervisor>,
    chat_store: Arc<ChatStore>,
    agent: MainAgent,
    cancel: CancellationToken,
}

async fn fixture(brain_turns: Vec<Vec<LlmChunk>>, code_turns: Vec<Vec<LlmChunk>>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::create(dir.path(), "w1").await.unwrap();
    let chat_store = Arc::new(ChatStore::new(dir.path()));
    let supervisor = Arc::new(TaskSupervisor::new());

    let publisher = Arc::new(WorkPublisher::new(supervisor.clone(), "w1"));
    let sink = Arc::new(PersistentSink::new("w1", publisher, chat_store.clone()));

    let cancel = CancellationToken::new();
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
        cancel.clone(),
    );

    Fixture {
        _dir: dir,
        supervisor,
        chat_store,
        agent,
        cancel,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn quick_tool_free_answer() {
    let mut fixture = fixture(vec![vec![token("Hello")]], vec![]).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.supervisor.attach_connection("w1", tx.clone());

    let (_task_id, _cancel) = fixture.supervisor.create_task("w1", 1, "Hi").unwrap();
    let _ = tx.send(ServerFrame::start());
    fixture.supervisor.start_task("w1").unwrap();

    fixture.agent.run("Hi").await.unwrap();
    fixture.supervisor.complete_task("w1").unwrap();
    let _ = tx.send(ServerFrame::complete());

    let frames = drain(&mut rx);
    assert!(matches!(frames[0], ServerFrame::Start { .. }));
    assert_eq!(
        frames[1],
        ServerFrame::Content {
            content: "Hello".to_string()
        }
    );
    assert!(matches!(frames.last().unwrap(), ServerFrame::Complete { .. }));

    let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "Hi");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hello");
    assert_eq!(messages[1].message_type, "text");
}

#[tokio::test]
async fn code_agent_cards_reach_the_transport_and_the_log() {
    let mut fixture = fixture(
        vec![
            vec![tool_call(
                "call_1",
                "CodeAgent",
                r#"{"task_prompt": "检查代码文件"}"#,
            )],
            vec![token("分析完成")],
        ],
        vec![
            vec![tool_call("call_2", "list_code_files", "{}")],
            vec![token("没有代码文件")],
        ],
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    fixture.supervisor.attach_connection("w1", tx);

    fixture.supervisor.create_task("w1", 1, "问题").unwrap();
    fixture.supervisor.start_task("w1").unwrap();
    fixture.agent.run("问题").await.unwrap();
    fixture.supervisor.complete_task("w1").unwrap();

    let frames = drain(&mut rx);
    let card_types: Vec<String> = frames
        .iter()
        .filter_map(|frame| match frame {
            ServerFrame::JsonBlock { block } => Some(block.block_type.clone()),
            _ => None,
        })
        .collect();
    assert!(card_types.contains(&"code_agent_start".to_string()), "{card_types:?}");
    assert!(card_types.contains(&"code_agent_tool_call".to_string()));
    assert!(card_types.contains(&"code_agent_tool_result".to_string()));
    assert!(card_types.contains(&"code_agent_complete".to_string()));

    let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].message_type, "json_card");
    assert!(!messages[1].json_blocks.is_empty());
}

#[tokio::test]
async fn disconnect_buffers_and_reconnect_replays_from_the_beginning() {
    let fixture = fixture(vec![], vec![]).await;
    let supervisor = fixture.supervisor.clone();

    let (task_id, _cancel) = supervisor.create_task("w1", 1, "问题").unwrap();
    supervisor.start_task("w1").unwrap();

    // First client sees the first two frames, then drops.
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    supervisor.attach_connection("w1", old_tx.clone());
    let _ = drain(&mut old_rx); // reconnect envelope for the running task

    supervisor.add_output(
        "w1",
        StreamEvent::Content {
            content: "a".to_string(),
        },
    );
    supervisor.add_output(
        "w1",
        StreamEvent::Content {
            content: "b".to_string(),
        },
    );
    assert_eq!(drain(&mut old_rx).len(), 2);
    supervisor.detach_connection("w1", &old_tx);

    // Server keeps producing while nobody is attached.
    supervisor.add_output(
        "w1",
        StreamEvent::Content {
            content: "c".to_string(),
        },
    );

    // Second client replays everything from the beginning of the task.
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    let replayed = supervisor.attach_connection("w1", new_tx);
    assert_eq!(replayed, Some(task_id.clone()));

    supervisor.add_output(
        "w1",
        StreamEvent::Content {
            content: "d".to_string(),
        },
    );

    let frames = drain(&mut new_rx);
    match &frames[0] {
        ServerFrame::Reconnect { task_id: replayed_id, .. } => assert_eq!(replayed_id, &task_id),
        other => panic!("expected reconnect frame, got {other:?}"),
    }
    let contents: Vec<&str> = frames
        .iter()
        .filter_map(|frame| match frame {
            ServerFrame::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(contents, vec!["a", "b", "c", "d"]);
    let complete_at = frames
        .iter()
        .position(|f| matches!(f, ServerFrame::ReconnectComplete { .. }))
        .unwrap();
    let d_at = frames
        .iter()
        .position(|f| matches!(f, ServerFrame::Content { content } if content == "d"))
        .unwrap();
    assert!(complete_at < d_at, "live frames must follow the replay");
}

#[tokio::test]
async fn second_problem_while_running_is_rejected() {
    let fixture = fixture(vec![], vec![]).await;
    let supervisor = fixture.supervisor.clone();

    supervisor.create_task("w1", 1, "第一个问题").unwrap();
    supervisor.start_task("w1").unwrap();

    let rejected = supervisor.create_task("w1", 1, "第二个问题");
    assert_eq!(
        rejected.unwrap_err().to_string(),
        "当前有任务正在执行，请等待完成"
    );
    assert_eq!(
        supervisor.status_view("w1").status,
        Some(TaskStatus::Running)
    );

    supervisor.complete_task("w1").unwrap();
    supervisor.create_task("w1", 1, "第二个问题").unwrap();
}

#[tokio::test]
async fn cancelled_turn_leaves_only_the_user_message() {
    let mut fixture = fixture(vec![vec![token("never")]], vec![]).await;
    fixture.cancel.cancel();

    let result = fixture.agent.run("问题").await;
    assert!(result.is_err());

    let messages = fixture.chat_store.get_messages("w1", None).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}
