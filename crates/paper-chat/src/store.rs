//! File-backed chat log, one `chat_history.json` per work.
//!
//! Every mutation is a serialized read-modify-write: a per-work async mutex
//! orders concurrent writers, and the file is replaced via a temp-file
//! rename so readers never observe a half-written log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use paper_core::JsonBlock;

use crate::history::{
    avatar_for_role, system_type_from_metadata, ChatHistory, ChatMessage, ChatStatistics,
    FrontendMessage, MessageId,
};

#[derive(Error, Debug)]
pub enum ChatStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt chat history for {work_id}: {source}")]
    Corrupt {
        work_id: String,
        source: serde_json::Error,
    },

    #[error("Message not found: {0}")]
    MessageNotFound(String),
}

pub type Result<T> = std::result::Result<T, ChatStoreError>;

pub struct ChatStore {
    base: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn append(
        &self,
        work_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<MessageId> {
        let message = ChatMessage::text(role, content, metadata);
        let id = message.id.clone();
        self.mutate(work_id, |history| history.messages.push(message))
            .await?;
        log::info!("[{work_id}] message saved: {role}, id {id}");
        Ok(id)
    }

    pub async fn append_card(
        &self,
        work_id: &str,
        role: &str,
        content: &str,
        blocks: Vec<JsonBlock>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<MessageId> {
        let block_count = blocks.len();
        let message = ChatMessage::json_card(role, content, blocks, metadata);
        let id = message.id.clone();
        self.mutate(work_id, |history| history.messages.push(message))
            .await?;
        log::info!("[{work_id}] json card message saved: {role}, blocks {block_count}");
        Ok(id)
    }

    /// Append one card to a previously saved message.
    pub async fn add_card_to_message(
        &self,
        work_id: &str,
        message_id: &MessageId,
        block: JsonBlock,
    ) -> Result<()> {
        let target = message_id.clone();
        let mut found = false;
        self.mutate(work_id, |history| {
            if let Some(message) = history.messages.iter_mut().find(|m| m.id == target) {
                message.json_blocks.push(block);
                message.message_type = "json_card".to_string();
                found = true;
            }
        })
        .await?;

        if found {
            Ok(())
        } else {
            Err(ChatStoreError::MessageNotFound(message_id.to_string()))
        }
    }

    pub async fn update_context(&self, work_id: &str, updates: Map<String, Value>) -> Result<()> {
        self.mutate(work_id, |history| {
            for (key, value) in updates {
                history.context.insert(key, value);
            }
        })
        .await
    }

    pub async fn clear(&self, work_id: &str) -> Result<()> {
        let lock = self.lock_for(work_id).await;
        let _guard = lock.lock().await;
        self.save(work_id, &ChatHistory::empty(work_id)).await
    }

    /// Messages sorted by timestamp; with a limit, the most recent `limit`.
    pub async fn get_messages(&self, work_id: &str, limit: Option<usize>) -> Result<Vec<ChatMessage>> {
        let history = self.load(work_id).await?;
        let mut messages = history.messages;
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(limit) = limit {
            let skip = messages.len().saturating_sub(limit);
            messages.drain(..skip);
        }
        Ok(messages)
    }

    pub async fn get_for_frontend(
        &self,
        work_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<FrontendMessage>> {
        let messages = self.get_messages(work_id, limit).await?;
        Ok(messages
            .into_iter()
            .map(|m| FrontendMessage {
                id: m.id.to_string(),
                avatar: avatar_for_role(&m.role).to_string(),
                system_type: system_type_from_metadata(&m.metadata),
                role: m.role,
                content: m.content,
                datetime: m.timestamp,
                json_blocks: m.json_blocks,
                message_type: m.message_type,
            })
            .collect())
    }

    pub async fn get_context(&self, work_id: &str) -> Result<Map<String, Value>> {
        Ok(self.load(work_id).await?.context)
    }

    pub async fn statistics(&self, work_id: &str) -> Result<ChatStatistics> {
        let history = self.load(work_id).await?;
        let mut stats = ChatStatistics {
            total_messages: history.messages.len(),
            ..Default::default()
        };
        for message in &history.messages {
            match message.role.as_str() {
                "user" => stats.user_messages += 1,
                "assistant" => stats.assistant_messages += 1,
                "system" => stats.system_messages += 1,
                _ => {}
            }
            if message.message_type == "json_card" {
                stats.json_card_messages += 1;
            }
        }
        Ok(stats)
    }

    /// Load the full history, falling back to a fresh record when the file
    /// is missing or unreadable.
    pub async fn load(&self, work_id: &str) -> Result<ChatHistory> {
        let path = self.history_path(work_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(history) => Ok(history),
                Err(e) => {
                    log::error!("[{work_id}] failed to parse chat history: {e}");
                    Ok(ChatHistory::empty(work_id))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ChatHistory::empty(work_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn mutate<F>(&self, work_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ChatHistory),
    {
        let lock = self.lock_for(work_id).await;
        let _guard = lock.lock().await;

        let mut history = self.load(work_id).await?;
        apply(&mut history);
        self.save(work_id, &history).await
    }

    async fn save(&self, work_id: &str, history: &ChatHistory) -> Result<()> {
        let path = self.history_path(work_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(history).map_err(|e| ChatStoreError::Corrupt {
            work_id: work_id.to_string(),
            source: e,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn history_path(&self, work_id: &str) -> PathBuf {
        self.base.join(work_id).join("chat_history.json")
    }

    async fn lock_for(&self, work_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(work_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub fn history_file_path(base: &Path, work_id: &str) -> PathBuf {
    base.join(work_id).join("chat_history.json")
}
