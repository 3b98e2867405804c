use forge_core::errors::GatewayError;
use forge_core::tools::ToolError;
use forge_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no failed tool recorded for session {0}")]
    NothingToReplay(String),
}
