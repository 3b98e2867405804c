use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::GatewayError;
use crate::messages::Turn;
use crate::stream::StreamChunk;
use crate::tools::ToolDefinition;

/// Stream of chunks for one model turn. A chunk-level error means the
/// stream was interrupted after it was opened.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>;

/// Everything a provider needs to open a streaming completion.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub history: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    /// Create an empty request (useful for testing).
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Trait implemented by each generative-model backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn open_stream(&self, request: &ModelRequest) -> Result<ChunkStream, GatewayError>;
}
