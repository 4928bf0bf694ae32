use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Chat log error: {0}")]
    ChatLog(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, AgentError>;
