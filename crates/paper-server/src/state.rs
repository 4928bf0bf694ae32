//! Shared application state threaded through handlers. No hidden process
//! globals: everything a handler needs hangs off this value.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use paper_chat::ChatStore;
use paper_llm::ModelConfigStore;

use crate::auth::{AuthVerifier, WorkRegistry};
use crate::supervisor::TaskSupervisor;

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<TaskSupervisor>,
    pub chat_store: Arc<ChatStore>,
    pub configs: Arc<dyn ModelConfigStore>,
    pub auth: Arc<dyn AuthVerifier>,
    pub works: Arc<dyn WorkRegistry>,
    pub workspaces_root: PathBuf,
    pub templates_root: PathBuf,
    pub task_timeout: Duration,
}

impl AppState {
    pub fn new(
        configs: Arc<dyn ModelConfigStore>,
        auth: Arc<dyn AuthVerifier>,
        works: Arc<dyn WorkRegistry>,
        workspaces_root: PathBuf,
        templates_root: PathBuf,
    ) -> Self {
        Self {
            supervisor: Arc::new(TaskSupervisor::new()),
            chat_store: Arc::new(ChatStore::new(workspaces_root.clone())),
            configs,
            auth,
            works,
            workspaces_root,
            templates_root,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }
}
