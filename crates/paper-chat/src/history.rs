//! Shape of `chat_history.json`, format version "2.0".
//!
//! Records written by earlier versions may carry integer message ids and
//! lack `json_blocks` / `message_type`; both are tolerated on read.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use paper_core::JsonBlock;

pub const CHAT_HISTORY_VERSION: &str = "2.0";

/// Message id: UUID string for new messages, integers tolerated in old files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageId {
    Str(String),
    Int(i64),
}

impl MessageId {
    pub fn generate() -> Self {
        MessageId::Str(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Str(s) => write!(f, "{s}"),
            MessageId::Int(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub json_blocks: Vec<JsonBlock>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

fn default_message_type() -> String {
    "text".to_string()
}

impl ChatMessage {
    pub fn text(role: &str, content: &str, metadata: Option<Map<String, Value>>) -> Self {
        Self {
            id: MessageId::generate(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now_stamp(),
            metadata: metadata.unwrap_or_default(),
            json_blocks: Vec::new(),
            message_type: "text".to_string(),
        }
    }

    pub fn json_card(
        role: &str,
        content: &str,
        blocks: Vec<JsonBlock>,
        metadata: Option<Map<String, Value>>,
    ) -> Self {
        let message_type = if blocks.is_empty() { "text" } else { "json_card" };
        Self {
            id: MessageId::generate(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now_stamp(),
            metadata: metadata.unwrap_or_default(),
            json_blocks: blocks,
            message_type: message_type.to_string(),
        }
    }
}

pub(crate) fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub work_id: String,
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub created_at: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    CHAT_HISTORY_VERSION.to_string()
}

impl ChatHistory {
    pub fn empty(work_id: &str) -> Self {
        let mut context = Map::new();
        context.insert("current_topic".to_string(), Value::String(String::new()));
        context.insert("generated_files".to_string(), Value::Array(Vec::new()));
        context.insert(
            "workflow_state".to_string(),
            Value::String("created".to_string()),
        );

        Self {
            work_id: work_id.to_string(),
            session_id: format!("{work_id}_session"),
            messages: Vec::new(),
            context,
            created_at: now_stamp(),
            version: CHAT_HISTORY_VERSION.to_string(),
        }
    }
}

/// View of a message prepared for the front-end renderer.
#[derive(Debug, Clone, Serialize)]
pub struct FrontendMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub datetime: String,
    pub avatar: String,
    #[serde(rename = "systemType")]
    pub system_type: Option<String>,
    pub json_blocks: Vec<JsonBlock>,
    pub message_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatStatistics {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    pub json_card_messages: usize,
}

pub(crate) fn avatar_for_role(role: &str) -> &'static str {
    match role {
        "user" => "https://tdesign.gtimg.com/site/avatar.jpg",
        "system" => "https://api.dicebear.com/7.x/bottts/svg?seed=system&backgroundColor=ed7b2f",
        _ => "https://api.dicebear.com/7.x/bottts/svg?seed=assistant&backgroundColor=0052d9",
    }
}

pub(crate) fn system_type_from_metadata(metadata: &Map<String, Value>) -> Option<String> {
    match metadata.get("system_type").and_then(Value::as_str) {
        Some(kind @ ("brain" | "code" | "writing")) => Some(kind.to_string()),
        _ => None,
    }
}
