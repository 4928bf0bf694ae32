use serde::Deserialize;

/// One unit of a streaming chat completion.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmChunk {
    Token(String),
    ToolCallDelta(ToolCallDelta),
    Done,
}

/// Incremental tool-call fragment as reported by the provider.
///
/// `id` and `name` arrive once at the start of each call; `arguments` is a
/// partial JSON string that must be concatenated across deltas.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}
