pub mod auth;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod ws;

pub use auth::{AuthVerifier, StaticTokenVerifier, WorkMeta, WorkRegistry};
pub use state::AppState;
pub use supervisor::{SupervisorError, TaskStatus, TaskSupervisor};
