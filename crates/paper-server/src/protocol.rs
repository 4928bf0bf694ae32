//! Wire frames for the per-work bidirectional channel.
//!
//! All frames are JSON objects with a `type` discriminator, except the
//! initial client auth frame (`{token}`) and the turn frame
//! (`{problem, model?}`), which are matched by field presence.

use serde::Serialize;

use paper_core::{JsonBlock, StreamEvent};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthSuccess {
        message: String,
    },
    Error {
        message: String,
    },
    Reconnect {
        message: String,
        task_id: String,
    },
    Content {
        content: String,
    },
    JsonBlock {
        block: JsonBlock,
    },
    ReconnectComplete {
        message: String,
    },
    Start {
        message: String,
    },
    Complete {
        message: String,
    },
    Pong,
}

impl ServerFrame {
    pub fn auth_success() -> Self {
        ServerFrame::AuthSuccess {
            message: "认证成功".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn reconnect(task_id: impl Into<String>) -> Self {
        ServerFrame::Reconnect {
            message: "检测到正在进行的AI任务，正在恢复...".to_string(),
            task_id: task_id.into(),
        }
    }

    pub fn reconnect_complete() -> Self {
        ServerFrame::ReconnectComplete {
            message: "历史输出恢复完成，继续接收新输出...".to_string(),
        }
    }

    pub fn start() -> Self {
        ServerFrame::Start {
            message: "开始AI分析...".to_string(),
        }
    }

    pub fn complete() -> Self {
        ServerFrame::Complete {
            message: "AI分析完成".to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }
}

impl From<StreamEvent> for ServerFrame {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Content { content } => ServerFrame::Content { content },
            StreamEvent::JsonBlock { block } => ServerFrame::JsonBlock { block },
        }
    }
}
