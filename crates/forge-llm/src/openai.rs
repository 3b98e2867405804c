use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use forge_core::errors::GatewayError;
use forge_core::messages::{Role, Turn, TurnPayload};
use forge_core::provider::{ChunkStream, ModelProvider, ModelRequest};
use forge_core::stream::StreamChunk;
use forge_core::tools::ToolDefinition;

use crate::sse::{self, ChunkDecoder};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub connect_timeout: Duration,
    /// Gap between received bytes after which the stream is declared interrupted.
    pub idle_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Streams completions from any server speaking the chat completions wire format.
pub struct OpenAiCompatProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, request), fields(model = %self.config.model, turns = request.history.len()))]
    async fn open_stream(&self, request: &ModelRequest) -> Result<ChunkStream, GatewayError> {
        let body = build_request_body(&self.config.model, request);

        let mut req = self
            .client
            .post(self.config.completions_url())
            .header("accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(map_transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            debug!(status, "model endpoint returned error status");
            return Err(match (status, retry_after) {
                (429, Some(secs)) => GatewayError::RateLimited {
                    retry_after: Some(Duration::from_secs(secs)),
                },
                _ => GatewayError::from_status(status, body),
            });
        }

        Ok(Box::pin(SseChunkStream::new(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(DEFAULT_CONNECT_TIMEOUT)
    } else {
        GatewayError::NetworkError(err.to_string())
    }
}

/// Build the JSON body for a streaming chat completion.
pub fn build_request_body(model: &str, request: &ModelRequest) -> Value {
    let mut messages = Vec::with_capacity(request.history.len() + 1);
    if !request.system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": request.system_prompt}));
    }
    messages.extend(request.history.iter().map(convert_turn));

    let mut body = json!({
        "model": model,
        "stream": true,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(convert_tool).collect());
    }
    body
}

fn convert_turn(turn: &Turn) -> Value {
    match (&turn.role, &turn.payload) {
        (Role::User, TurnPayload::Text { text }) => json!({"role": "user", "content": text}),
        (_, TurnPayload::Text { text }) => json!({"role": "assistant", "content": text}),
        (_, TurnPayload::ToolCall(call)) => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": call.id.as_str(),
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                },
            }],
        }),
        (_, TurnPayload::ToolResult(outcome)) => {
            let content = match (&outcome.output, &outcome.error) {
                (_, Some(err)) => format!("Error: {err}"),
                (Some(out), None) => out.clone(),
                (None, None) => String::new(),
            };
            json!({
                "role": "tool",
                "tool_call_id": outcome.tool_call_id.as_str(),
                "content": content,
            })
        }
    }
}

fn convert_tool(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters_schema,
        },
    })
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// Wraps the response byte stream and yields decoded chunks.
/// If no bytes arrive within `idle_duration`, yields an interruption error and ends.
struct SseChunkStream {
    inner: ByteStream,
    decoder: ChunkDecoder,
    buffer: String,
    pending: VecDeque<Result<StreamChunk, GatewayError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseChunkStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder: ChunkDecoder::new(),
            buffer: String::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    fn drain_events(&mut self, text: &str) {
        for data in sse::parse_sse_data(text) {
            match self.decoder.decode(&data) {
                Ok(chunks) => self.pending.extend(chunks.into_iter().map(Ok)),
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    return;
                }
            }
        }
    }
}

impl Stream for SseChunkStream {
    type Item = Result<StreamChunk, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);

                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = self.buffer.find("\n\n") {
                        let event: String = self.buffer.drain(..pos + 2).collect();
                        self.drain_events(&event);
                        if self.done {
                            break;
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    let remaining = std::mem::take(&mut self.buffer);
                    if !remaining.trim().is_empty() {
                        self.drain_events(&remaining);
                    }
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
