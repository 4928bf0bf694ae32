pub mod history;
pub mod store;

pub use history::{ChatHistory, ChatMessage, ChatStatistics, FrontendMessage, MessageId};
pub use store::{ChatStore, ChatStoreError, Result};
