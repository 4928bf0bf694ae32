//! Drives one provider call and fans tokens out to the stream sink.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use paper_core::{AgentError, Message, StreamSink, ToolCall, ToolSchema};

use crate::accumulator::ToolCallAccumulator;
use crate::config::ModelConfig;
use crate::openai::OpenAiProvider;
use crate::provider::LlmProvider;
use crate::types::LlmChunk;

#[derive(Clone)]
pub struct LlmHandler {
    provider: Arc<dyn LlmProvider>,
}

impl LlmHandler {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(Arc::new(OpenAiProvider::from_config(config)))
    }

    /// Streaming call. Tokens are forwarded to `sink` in arrival order;
    /// tool-call deltas are accumulated and validated. Provider failures are
    /// materialized as the assistant content (the loop terminates on them),
    /// only cancellation is an `Err`.
    pub async fn process_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<(Message, Vec<ToolCall>), AgentError> {
        log::info!("开始调用LLM API，消息数量: {}", messages.len());

        let mut stream = match self.provider.chat_stream(messages, tools).await {
            Ok(stream) => stream,
            Err(e) => {
                let error_message = format!("LLM API调用失败: {e}");
                log::error!("{error_message}");
                sink.token(&error_message).await;
                return Ok((Message::assistant(error_message, None), Vec::new()));
            }
        };

        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut chunk_count = 0usize;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            chunk_count += 1;

            match chunk {
                Ok(LlmChunk::Token(token)) => {
                    sink.token(&token).await;
                    content.push_str(&token);
                }
                Ok(LlmChunk::ToolCallDelta(delta)) => {
                    accumulator.push(delta);
                }
                Ok(LlmChunk::Done) => {}
                Err(e) => {
                    let error_message = format!("LLM API调用失败: {e}");
                    log::error!("{error_message}");
                    sink.token(&error_message).await;
                    content.push_str(&error_message);
                    return Ok((Message::assistant(content, None), Vec::new()));
                }
            }
        }

        let tool_calls = accumulator.finish();
        log::info!(
            "LLM API调用完成，总块数: {chunk_count}，工具调用数: {}",
            tool_calls.len()
        );

        let recorded_calls = (!tool_calls.is_empty()).then(|| tool_calls.clone());
        Ok((Message::assistant(content, recorded_calls), tool_calls))
    }

    /// Non-streaming variant with the same failure materialization.
    pub async fn process_sync(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> (Message, Vec<ToolCall>) {
        match self.provider.chat(messages, tools).await {
            Ok(output) => {
                let recorded = (!output.tool_calls.is_empty()).then(|| output.tool_calls.clone());
                (
                    Message::assistant(output.content, recorded),
                    output.tool_calls,
                )
            }
            Err(e) => {
                let error_message = format!("LLM API调用失败: {e}");
                log::error!("{error_message}");
                (Message::assistant(error_message, None), Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paper_core::JsonBlock;
    use tokio::sync::Mutex;

    use crate::provider::{ChatOutput, LlmError, LlmStream, Result as LlmResult};
    use crate::types::ToolCallDelta;

    struct ScriptedProvider {
        chunks: Mutex<Vec<Vec<LlmResult<LlmChunk>>>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<LlmResult<LlmChunk>>>) -> Self {
            Self {
                chunks: Mutex::new(turns),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> LlmResult<LlmStream> {
            let mut turns = self.chunks.lock().await;
            if turns.is_empty() {
                return Err(LlmError::Api("no scripted turns left".to_string()));
            }
            let turn = turns.remove(0);
            Ok(Box::pin(futures::stream::iter(turn)))
        }

        async fn chat(&self, _messages: &[Message], _tools: &[ToolSchema]) -> LlmResult<ChatOutput> {
            Ok(ChatOutput {
                content: "sync".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        tokens: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamSink for RecordingSink {
        async fn token(&self, text: &str) {
            self.tokens.lock().unwrap().push(text.to_string());
        }
        async fn card(&self, _block: JsonBlock) {}
        async fn set_role(&self, _role: &str) {}
        async fn finalize(&self) {}
    }

    #[tokio::test]
    async fn tokens_are_forwarded_in_order() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(LlmChunk::Token("Hel".to_string())),
            Ok(LlmChunk::Token("lo".to_string())),
            Ok(LlmChunk::Done),
        ]]);
        let handler = LlmHandler::new(Arc::new(provider));
        let sink = RecordingSink::default();

        let (message, calls) = handler
            .process_stream(&[Message::user("Hi")], &[], &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(message.content, "Hello");
        assert!(calls.is_empty());
        assert_eq!(*sink.tokens.lock().unwrap(), vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn tool_call_deltas_accumulate_across_chunks() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(LlmChunk::ToolCallDelta(ToolCallDelta {
                id: Some("call_1".to_string()),
                name: Some("CodeAgent".to_string()),
                arguments: Some("{\"task_prompt\":".to_string()),
            })),
            Ok(LlmChunk::ToolCallDelta(ToolCallDelta {
                id: None,
                name: None,
                arguments: Some("\"plot\"}".to_string()),
            })),
            Ok(LlmChunk::Done),
        ]]);
        let handler = LlmHandler::new(Arc::new(provider));
        let sink = RecordingSink::default();

        let (message, calls) = handler
            .process_stream(&[Message::user("Hi")], &[], &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "CodeAgent");
        assert_eq!(calls[0].function.arguments, r#"{"task_prompt":"plot"}"#);
        assert!(message.tool_calls.is_some());
    }

    #[tokio::test]
    async fn provider_error_becomes_assistant_content() {
        let provider = ScriptedProvider::new(vec![]);
        let handler = LlmHandler::new(Arc::new(provider));
        let sink = RecordingSink::default();

        let (message, calls) = handler
            .process_stream(&[Message::user("Hi")], &[], &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert!(message.content.contains("LLM API调用失败"));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(LlmChunk::Token("a".to_string())),
            Ok(LlmChunk::Token("b".to_string())),
        ]]);
        let handler = LlmHandler::new(Arc::new(provider));
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = handler
            .process_stream(&[Message::user("Hi")], &[], &sink, &cancel)
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
