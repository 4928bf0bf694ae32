pub mod card;
pub mod context;
pub mod error;
pub mod json_repair;
pub mod message;
pub mod sink;
pub mod tools;

pub use card::{JsonBlock, StreamEvent};
pub use context::{CompressionRecord, CompressionStrategy, ContextManager, ContextStatus};
pub use error::AgentError;
pub use json_repair::{is_valid_json, try_fix_incomplete_json};
pub use message::{Message, Role};
pub use sink::{NullSink, StreamSink};
pub use tools::{FunctionCall, FunctionSchema, ToolCall, ToolSchema};
