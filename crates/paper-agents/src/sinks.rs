//! Stream sinks: transport delivery fused with accumulation.
//!
//! The persistent sink buffers everything it forwards and writes exactly one
//! chat-log message on finalize. The sub-agent sink wraps a parent sink,
//! tags every event with the sub-agent's name, and never touches the log:
//! only the top-level planner's message is persisted.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use paper_chat::ChatStore;
use paper_core::{JsonBlock, StreamEvent, StreamSink};

/// Synchronous, non-blocking delivery of stream events toward the live
/// client. Implemented by the task supervisor; a disconnected client means
/// events are buffered there and delivery degrades silently.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: StreamEvent);
}

/// Publisher that discards events (tests, headless runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: StreamEvent) {}
}

#[derive(Default)]
struct SinkState {
    content: String,
    cards: Vec<JsonBlock>,
    role: String,
}

pub struct PersistentSink {
    work_id: String,
    publisher: Arc<dyn EventPublisher>,
    chat_store: Arc<ChatStore>,
    metadata: Map<String, Value>,
    state: Mutex<SinkState>,
}

impl PersistentSink {
    pub fn new(
        work_id: impl Into<String>,
        publisher: Arc<dyn EventPublisher>,
        chat_store: Arc<ChatStore>,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("system_type".to_string(), Value::String("brain".to_string()));
        Self {
            work_id: work_id.into(),
            publisher,
            chat_store,
            metadata,
            state: Mutex::new(SinkState {
                role: "assistant".to_string(),
                ..Default::default()
            }),
        }
    }

    /// Peek at the buffered content (used by tests and error paths).
    pub async fn buffered_content(&self) -> String {
        self.state.lock().await.content.clone()
    }
}

#[async_trait]
impl StreamSink for PersistentSink {
    async fn token(&self, text: &str) {
        {
            let mut state = self.state.lock().await;
            state.content.push_str(text);
        }
        self.publisher.publish(StreamEvent::Content {
            content: text.to_string(),
        });
    }

    async fn card(&self, block: JsonBlock) {
        {
            let mut state = self.state.lock().await;
            state.cards.push(block.clone());
        }
        self.publisher.publish(StreamEvent::JsonBlock { block });
    }

    async fn set_role(&self, role: &str) {
        self.state.lock().await.role = role.to_string();
    }

    async fn finalize(&self) {
        let (content, cards, role) = {
            let mut state = self.state.lock().await;
            let content = std::mem::take(&mut state.content);
            let cards = std::mem::take(&mut state.cards);
            let role = state.role.clone();
            state.role = "assistant".to_string();
            (content, cards, role)
        };

        let content = content.trim();
        if content.is_empty() && cards.is_empty() {
            return;
        }

        let result = if cards.is_empty() {
            self.chat_store
                .append(&self.work_id, &role, content, Some(self.metadata.clone()))
                .await
        } else {
            self.chat_store
                .append_card(
                    &self.work_id,
                    &role,
                    content,
                    cards,
                    Some(self.metadata.clone()),
                )
                .await
        };

        if let Err(e) = result {
            log::error!("[{}] 消息持久化失败: {e}", self.work_id);
        }
    }
}

/// Forwarding sink handed to a sub-agent. Cards get the sub-agent tag as a
/// type prefix; tokens go to the parent with a `[<name>] ` prefix.
pub struct SubAgentSink {
    parent: Arc<dyn StreamSink>,
    /// Card-type prefix, e.g. `code_agent`.
    tag: String,
    /// Display name, e.g. `CodeAgent`.
    agent_name: String,
}

impl SubAgentSink {
    pub fn new(
        parent: Arc<dyn StreamSink>,
        tag: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            parent,
            tag: tag.into(),
            agent_name: agent_name.into(),
        }
    }

    fn tagged(&self, block_type: &str) -> String {
        if block_type.starts_with(&self.tag) {
            block_type.to_string()
        } else {
            format!("{}_{block_type}", self.tag)
        }
    }
}

#[async_trait]
impl StreamSink for SubAgentSink {
    async fn token(&self, text: &str) {
        self.parent
            .token(&format!("[{}] {text}", self.agent_name))
            .await;
    }

    async fn card(&self, block: JsonBlock) {
        self.parent
            .card(JsonBlock::new(self.tagged(&block.block_type), block.data))
            .await;
    }

    async fn set_role(&self, _role: &str) {
        // Sub-agent output always belongs to the parent's assistant turn.
    }

    async fn finalize(&self) {
        self.parent
            .card(JsonBlock::text(
                self.tagged("complete"),
                format!("[{}] 任务执行完成", self.agent_name),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingPublisher {
        events: StdMutex<Vec<StreamEvent>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: StreamEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn sink(dir: &TempDir) -> (Arc<RecordingPublisher>, Arc<ChatStore>, PersistentSink) {
        let publisher = Arc::new(RecordingPublisher::default());
        let chat_store = Arc::new(ChatStore::new(dir.path()));
        let sink = PersistentSink::new("w1", publisher.clone(), chat_store.clone());
        (publisher, chat_store, sink)
    }

    #[tokio::test]
    async fn tokens_are_published_in_emission_order() {
        let dir = TempDir::new().unwrap();
        let (publisher, _store, sink) = sink(&dir);

        sink.token("Hel").await;
        sink.token("lo").await;

        let events = publisher.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                StreamEvent::Content {
                    content: "Hel".to_string()
                },
                StreamEvent::Content {
                    content: "lo".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn finalize_without_cards_writes_text_message() {
        let dir = TempDir::new().unwrap();
        let (_publisher, store, sink) = sink(&dir);

        sink.token("Hello").await;
        sink.finalize().await;

        let messages = store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "assistant");
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[0].message_type, "text");
        assert_eq!(messages[0].metadata["system_type"], "brain");
    }

    #[tokio::test]
    async fn finalize_with_cards_writes_json_card_message() {
        let dir = TempDir::new().unwrap();
        let (_publisher, store, sink) = sink(&dir);

        sink.token("正在生成").await;
        sink.card(JsonBlock::text("code_agent_start", "start")).await;
        sink.card(JsonBlock::text("code_agent_result", "done")).await;
        sink.finalize().await;

        let messages = store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, "json_card");
        assert_eq!(messages[0].json_blocks.len(), 2);
    }

    #[tokio::test]
    async fn finalize_resets_buffers() {
        let dir = TempDir::new().unwrap();
        let (_publisher, store, sink) = sink(&dir);

        sink.token("first").await;
        sink.finalize().await;
        sink.finalize().await;

        let messages = store.get_messages("w1", None).await.unwrap();
        assert_eq!(messages.len(), 1, "empty finalize must not write");
    }

    #[tokio::test]
    async fn sub_agent_events_are_tagged_and_unpersisted() {
        let dir = TempDir::new().unwrap();
        let (publisher, store, parent) = sink(&dir);
        let parent: Arc<dyn StreamSink> = Arc::new(parent);
        let sub = SubAgentSink::new(parent.clone(), "code_agent", "CodeAgent");

        sub.card(JsonBlock::text("start", "begin")).await;
        sub.card(JsonBlock::text("code_agent_result", "done")).await;
        sub.token("chunk").await;
        sub.finalize().await;

        let events = publisher.events.lock().unwrap();
        assert!(matches!(
            &events[0],
            StreamEvent::JsonBlock { block } if block.block_type == "code_agent_start"
        ));
        // Already-tagged types are not double-prefixed.
        assert!(matches!(
            &events[1],
            StreamEvent::JsonBlock { block } if block.block_type == "code_agent_result"
        ));
        assert!(matches!(
            &events[2],
            StreamEvent::Content { content } if content == "[CodeAgent] chunk"
        ));
        assert!(matches!(
            &events[3],
            StreamEvent::JsonBlock { block } if block.block_type == "code_agent_complete"
        ));
        drop(events);

        // Nothing persisted until the parent finalizes.
        let messages = store.get_messages("w1", None).await.unwrap();
        assert!(messages.is_empty());
    }
}
