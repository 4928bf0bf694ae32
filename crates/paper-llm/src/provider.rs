use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use paper_core::{Message, ToolCall, ToolSchema};

use crate::types::LlmChunk;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmChunk>> + Send>>;

/// Output of a non-streaming chat call.
#[derive(Debug, Clone)]
pub struct ChatOutput {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Streaming chat completion with tools.
    async fn chat_stream(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<LlmStream>;

    /// Non-streaming chat completion, used where progress need not surface.
    async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ChatOutput>;
}
