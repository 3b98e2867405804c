use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use forge_core::errors::GatewayError;
use forge_core::messages::ToolCallRequest;
use forge_core::provider::{ChunkStream, ModelProvider, ModelRequest};
use forge_core::stream::StreamChunk;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of chunk results.
    Stream(Vec<Result<StreamChunk, GatewayError>>),
    /// Return an error from the open_stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Open successfully, then never yield anything.
    Hang,
    /// Yield each chunk result after waiting the given gap.
    Paced(Duration, Vec<Result<StreamChunk, GatewayError>>),
}

impl MockResponse {
    /// A complete text turn: one text chunk carrying the terminal marker.
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![Ok(StreamChunk::text(text).with_finish("stop"))])
    }

    /// A text turn split into fragments, terminated by a separate marker chunk.
    pub fn fragments(parts: &[&str]) -> Self {
        let mut chunks: Vec<_> = parts.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
        chunks.push(Ok(StreamChunk::finish("stop")));
        Self::Stream(chunks)
    }

    /// A text turn that ends without any terminal marker.
    pub fn truncated(text: &str) -> Self {
        Self::Stream(vec![Ok(StreamChunk::text(text))])
    }

    /// A turn that finishes without text or tool calls.
    pub fn empty() -> Self {
        Self::Stream(vec![Ok(StreamChunk::finish("stop"))])
    }

    /// A turn requesting a single tool call.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::Stream(vec![Ok(
            StreamChunk::tool_call(ToolCallRequest::new(name, arguments)).with_finish("tool_calls")
        )])
    }

    /// A stream that yields some text and then fails mid-flight.
    pub fn interrupted(text: &str, error: GatewayError) -> Self {
        Self::Stream(vec![Ok(StreamChunk::text(text)), Err(error)])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn open_stream(&self, request: &ModelRequest) -> Result<ChunkStream, GatewayError> {
        let idx = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };

        let response = self.responses.lock().pop_front().ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))
        })?;

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<ChunkStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(chunks) => return Ok(Box::pin(stream::iter(chunks))),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Hang => return Ok(Box::pin(stream::pending())),
            MockResponse::Paced(gap, chunks) => {
                return Ok(Box::pin(stream::iter(chunks).then(move |chunk| async move {
                    tokio::time::sleep(gap).await;
                    chunk
                })))
            }
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::messages::Turn;

    async fn collect(stream: ChunkStream) -> Vec<Result<StreamChunk, GatewayError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::text("hello world")]);
        let chunks = collect(mock.open_stream(&ModelRequest::empty()).await.unwrap()).await;

        assert_eq!(chunks.len(), 1);
        let chunk = chunks[0].as_ref().unwrap();
        assert_eq!(chunk.text.as_deref(), Some("hello world"));
        assert!(chunk.is_terminal());
    }

    #[tokio::test]
    async fn truncated_has_no_marker() {
        let mock = MockProvider::new(vec![MockResponse::truncated("half a sent")]);
        let chunks = collect(mock.open_stream(&ModelRequest::empty()).await.unwrap()).await;
        assert!(chunks.iter().all(|c| !c.as_ref().unwrap().is_terminal()));
    }

    #[tokio::test]
    async fn interrupted_yields_error_after_text() {
        let mock = MockProvider::new(vec![MockResponse::interrupted(
            "abc",
            GatewayError::StreamInterrupted("eof".into()),
        )]);
        let chunks = collect(mock.open_stream(&ModelRequest::empty()).await.unwrap()).await;
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(GatewayError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(
            GatewayError::AuthenticationFailed("bad".into()),
        )]);
        assert!(mock.open_stream(&ModelRequest::empty()).await.is_err());
    }

    #[tokio::test]
    async fn records_requests_in_order() {
        let mock = MockProvider::new(vec![MockResponse::text("first"), MockResponse::text("second")]);

        let mut request = ModelRequest::empty();
        request.history.push(Turn::user_text("one"));
        let _ = mock.open_stream(&request).await;
        request.history.push(Turn::user_text("two"));
        let _ = mock.open_stream(&request).await;

        assert_eq!(mock.call_count(), 2);
        let seen = mock.requests();
        assert_eq!(seen[0].history.len(), 1);
        assert_eq!(seen[1].history.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("only one")]);
        let _ = mock.open_stream(&ModelRequest::empty()).await;
        let result = mock.open_stream(&ModelRequest::empty()).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_chunks_arrive_apart() {
        let mock = MockProvider::new(vec![MockResponse::Paced(
            Duration::from_secs(2),
            vec![Ok(StreamChunk::text("a")), Ok(StreamChunk::finish("stop"))],
        )]);

        let start = tokio::time::Instant::now();
        let chunks = collect(mock.open_stream(&ModelRequest::empty()).await.unwrap()).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::text("after delay"),
        )]);

        let start = tokio::time::Instant::now();
        let stream = mock.open_stream(&ModelRequest::empty()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(collect(stream).await.len(), 1);
    }
}
