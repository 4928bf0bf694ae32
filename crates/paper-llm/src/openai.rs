//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint speaking the `/chat/completions` protocol
//! (OpenAI, DeepSeek, vLLM, one-api gateways); the base URL comes from the
//! per-role model configuration.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use paper_core::{Message, Role, ToolCall, ToolSchema};

use crate::accumulator::ToolCallAccumulator;
use crate::config::ModelConfig;
use crate::provider::{ChatOutput, LlmError, LlmProvider, LlmStream, Result};
use crate::sse::llm_stream_from_sse;
use crate::types::{LlmChunk, ToolCallDelta};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o".to_string(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let mut provider = Self::new(config.api_key.clone()).with_model(config.model_id.clone());
        if let Some(base_url) = &config.base_url {
            if !base_url.is_empty() {
                provider = provider.with_base_url(base_url.clone());
            }
        }
        provider
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSchema], stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools).unwrap_or_default();
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {detail}")));
        }
        Ok(response)
    }
}

fn wire_message(message: &Message) -> serde_json::Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if let Some(tool_calls) = &message.tool_calls {
        value["tool_calls"] = serde_json::to_value(tool_calls).unwrap_or_default();
    }
    if message.role == Role::Tool {
        if let Some(tool_call_id) = &message.tool_call_id {
            value["tool_call_id"] = json!(tool_call_id);
        }
    }
    value
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn parse_stream_data(data: &str) -> Result<Vec<LlmChunk>> {
    if data.trim() == "[DONE]" {
        return Ok(vec![LlmChunk::Done]);
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;
    let mut out = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                out.push(LlmChunk::Token(content));
            }
        }
        if let Some(tool_calls) = choice.delta.tool_calls {
            for call in tool_calls {
                let function = call.function.unwrap_or_default();
                out.push(LlmChunk::ToolCallDelta(ToolCallDelta {
                    id: call.id,
                    name: function.name,
                    arguments: function.arguments,
                }));
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    choices: Vec<SyncChoice>,
}

#[derive(Debug, Deserialize)]
struct SyncChoice {
    message: SyncMessage,
}

#[derive(Debug, Deserialize)]
struct SyncMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat_stream(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<LlmStream> {
        let body = self.request_body(messages, tools, true);
        let response = self.post(&body).await?;
        Ok(llm_stream_from_sse(response, parse_stream_data))
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ChatOutput> {
        let body = self.request_body(messages, tools, false);
        let response = self.post(&body).await?;
        let parsed: SyncResponse = response.json().await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(choice) = parsed.choices.into_iter().next() {
            content = choice.message.content.unwrap_or_default();
            tool_calls = choice.message.tool_calls.unwrap_or_default();
        }

        // The non-streaming path still validates argument strings so broken
        // calls never reach dispatch.
        let mut accumulator = ToolCallAccumulator::new();
        for call in tool_calls {
            accumulator.push(ToolCallDelta {
                id: Some(call.id),
                name: Some(call.function.name),
                arguments: Some(call.function.arguments),
            });
        }

        Ok(ChatOutput {
            content,
            tool_calls: accumulator.finish(),
        })
    }
}
