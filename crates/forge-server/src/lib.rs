pub mod error;
pub mod handlers;
pub mod outbox;
pub mod server;
pub mod supervisor;

pub use error::ApiError;
pub use outbox::Outbox;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
