use serde::{Deserialize, Serialize};

/// A structured event emitted alongside streamed text.
///
/// The `type` set is open; producers in this workspace emit
/// `code_agent_*`, `writer_agent_*`, `word_tool_call`, `writemd_result`,
/// `tree_result` and similar tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub data: serde_json::Value,
}

impl JsonBlock {
    pub fn new(block_type: impl Into<String>, data: impl Into<serde_json::Value>) -> Self {
        Self {
            block_type: block_type.into(),
            data: data.into(),
        }
    }

    /// Shorthand for the common case of a text payload.
    pub fn text(block_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(block_type, serde_json::Value::String(message.into()))
    }
}

/// One unit of streamed output, as buffered by the task supervisor and
/// delivered over the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content { content: String },
    JsonBlock { block: JsonBlock },
}
