//! Interfaces to the external auth and work-metadata collaborators.
//!
//! The core only needs token verification and work ownership/mode lookups;
//! the file-backed implementations below are what the binary wires in.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Validates a transport handshake token, yielding the user id.
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<i64>;
}

/// Token table, loadable from JSON: `{"<token>": <user_id>}`.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, i64>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: i64) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let tokens = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self { tokens })
    }
}

impl AuthVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<i64> {
        self.tokens.get(token).copied()
    }
}

/// Work metadata maintained by external collaborators; the core reads it.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkMeta {
    #[serde(default)]
    pub title: Option<String>,
    pub created_by: i64,
    #[serde(default)]
    pub template_id: Option<i64>,
    #[serde(default = "default_output_mode")]
    pub output_mode: String,
}

fn default_output_mode() -> String {
    "markdown".to_string()
}

pub trait WorkRegistry: Send + Sync {
    fn get(&self, work_id: &str) -> Option<WorkMeta>;
}

/// JSON-file-backed registry: `{"<work_id>": {created_by, template_id?,
/// output_mode?}}`.
#[derive(Debug, Default)]
pub struct FileWorkRegistry {
    works: HashMap<String, WorkMeta>,
}

impl FileWorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work(mut self, work_id: impl Into<String>, meta: WorkMeta) -> Self {
        self.works.insert(work_id.into(), meta);
        self
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let works = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self { works })
    }
}

impl WorkRegistry for FileWorkRegistry {
    fn get(&self, work_id: &str) -> Option<WorkMeta> {
        self.works.get(work_id).cloned()
    }
}
