//! Per-(user, role) model configuration.
//!
//! Each user carries up to three records, one per role. An operation that
//! needs a missing role fails before any LLM call.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::provider::{LlmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    /// Top-level planner.
    Brain,
    /// Code agent.
    Code,
    /// Writer agent.
    Writing,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::Brain => "brain",
            LlmRole::Code => "code",
            LlmRole::Writing => "writing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model_id: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

pub trait ModelConfigStore: Send + Sync {
    fn get(&self, user_id: i64, role: LlmRole) -> Option<ModelConfig>;

    /// Resolve a role configuration or fail with a clear error.
    fn require(&self, user_id: i64, role: LlmRole) -> Result<ModelConfig> {
        self.get(user_id, role)
            .filter(|config| config.is_active)
            .ok_or_else(|| {
                LlmError::Config(format!(
                    "用户 {user_id} 没有配置 {} 角色的模型",
                    role.as_str()
                ))
            })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: HashMap<(i64, LlmRole), ModelConfig>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: i64, role: LlmRole, config: ModelConfig) {
        self.configs.insert((user_id, role), config);
    }
}

impl ModelConfigStore for InMemoryConfigStore {
    fn get(&self, user_id: i64, role: LlmRole) -> Option<ModelConfig> {
        self.configs.get(&(user_id, role)).cloned()
    }
}

/// JSON-file-backed store with the shape
/// `{ "<user_id>": { "brain": {...}, "code": {...}, "writing": {...} } }`.
#[derive(Debug, Default)]
pub struct FileConfigStore {
    users: HashMap<String, HashMap<String, ModelConfig>>,
}

impl FileConfigStore {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LlmError::Config(format!("无法读取模型配置 {}: {e}", path.display())))?;
        let users = serde_json::from_str(&raw)?;
        Ok(Self { users })
    }
}

impl ModelConfigStore for FileConfigStore {
    fn get(&self, user_id: i64, role: LlmRole) -> Option<ModelConfig> {
        self.users
            .get(&user_id.to_string())
            .and_then(|roles| roles.get(role.as_str()))
            .cloned()
    }
}
