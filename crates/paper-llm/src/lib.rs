pub mod accumulator;
pub mod config;
pub mod handler;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod types;

pub use accumulator::ToolCallAccumulator;
pub use config::{FileConfigStore, InMemoryConfigStore, LlmRole, ModelConfig, ModelConfigStore};
pub use handler::LlmHandler;
pub use openai::OpenAiProvider;
pub use provider::{ChatOutput, LlmError, LlmProvider, LlmStream, Result};
pub use types::{LlmChunk, ToolCallDelta};
