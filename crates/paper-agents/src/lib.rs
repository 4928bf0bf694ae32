pub(crate) mod args;
pub mod code_agent;
pub mod main_agent;
pub mod prompts;
pub mod sinks;
pub mod writer_agent;

pub use code_agent::CodeAgent;
pub use main_agent::{MainAgent, MainAgentConfig, OutputMode};
pub use sinks::{EventPublisher, NullPublisher, PersistentSink, SubAgentSink};
pub use writer_agent::WriterAgent;
