use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use forge_core::errors::GatewayError;
use forge_core::ids::ToolCallId;
use forge_core::messages::ToolCallRequest;
use forge_core::stream::StreamChunk;

/// Marker line an OpenAI-compatible server sends after the last chunk.
pub const DONE_MARKER: &str = "[DONE]";

/// Parse raw SSE text into the `data:` payloads it contains, one per event.
/// Multi-line data fields are joined with `\n`; comments and other fields are ignored.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match &mut current {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        } else if line.is_empty() {
            if let Some(data) = current.take() {
                events.push(data);
            }
        }
    }

    // Handle trailing event without blank line
    if let Some(data) = current {
        events.push(data);
    }

    events
}

/// State machine turning chat-completion chunk payloads into StreamChunks.
///
/// Text deltas are forwarded immediately. Tool-call fragments are buffered
/// by index and released, fully assembled, with the chunk that carries the
/// finish reason.
#[derive(Default)]
pub struct ChunkDecoder {
    pending_calls: BTreeMap<u32, PendingCall>,
    finished: bool,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments_json: String,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a finish reason has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one `data:` payload.
    pub fn decode(&mut self, data: &str) -> Result<Vec<StreamChunk>, GatewayError> {
        let data = data.trim();
        if data.is_empty() || data == DONE_MARKER {
            return Ok(Vec::new());
        }

        let parsed: CompletionChunk = serde_json::from_str(data)
            .map_err(|e| GatewayError::StreamInterrupted(format!("malformed chunk: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(classify_error(&err));
        }

        let mut out = Vec::new();
        for choice in parsed.choices {
            for fragment in choice.delta.tool_calls {
                let entry = self.pending_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    entry.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        entry.arguments_json.push_str(&args);
                    }
                }
            }

            let text = choice.delta.content.filter(|t| !t.is_empty());
            match choice.finish_reason {
                Some(reason) => {
                    self.finished = true;
                    out.push(StreamChunk {
                        text,
                        tool_calls: self.drain_calls(),
                        finish_reason: Some(reason),
                    });
                }
                None if text.is_some() => out.push(StreamChunk {
                    text,
                    ..Default::default()
                }),
                None => {}
            }
        }

        Ok(out)
    }

    fn drain_calls(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.pending_calls)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| {
                let arguments: Value = if call.arguments_json.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&call.arguments_json)
                        .unwrap_or(Value::String(call.arguments_json.clone()))
                };
                let id = if call.id.is_empty() {
                    ToolCallId::new()
                } else {
                    ToolCallId::from_raw(call.id)
                };
                ToolCallRequest {
                    id,
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

fn classify_error(err: &ErrorBody) -> GatewayError {
    match err.error_type.as_deref() {
        Some("authentication_error") | Some("invalid_api_key") => {
            GatewayError::AuthenticationFailed(err.message.clone())
        }
        Some("invalid_request_error") => GatewayError::InvalidRequest(err.message.clone()),
        Some("rate_limit_error") | Some("rate_limit_exceeded") => {
            GatewayError::RateLimited { retry_after: None }
        }
        Some("overloaded_error") => GatewayError::ProviderOverloaded,
        _ => GatewayError::StreamInterrupted(err.message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_data_lines() {
        let raw = "data: {\"a\":1}\n\n: comment\ndata: [DONE]\n\n";
        assert_eq!(parse_sse_data(raw), vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn parse_trailing_event_without_blank_line() {
        assert_eq!(parse_sse_data("data: tail"), vec!["tail".to_string()]);
    }

    #[test]
    fn parse_multiline_data() {
        assert_eq!(parse_sse_data("data: a\ndata: b\n\n"), vec!["a\nb".to_string()]);
    }

    #[test]
    fn text_deltas_forwarded_immediately() {
        let mut decoder = ChunkDecoder::new();
        let chunks = decoder
            .decode(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#)
            .unwrap();
        assert_eq!(chunks, vec![StreamChunk::text("Hel")]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn finish_reason_marks_terminal() {
        let mut decoder = ChunkDecoder::new();
        let chunks = decoder
            .decode(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_terminal());
        assert!(decoder.is_finished());
    }

    #[test]
    fn tool_call_fragments_assembled_on_finish() {
        let mut decoder = ChunkDecoder::new();
        let first = decoder
            .decode(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":"{\"pa"}}]}}]}"#)
            .unwrap();
        assert!(first.is_empty());

        let second = decoder
            .decode(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a.js\"}"}}]}}]}"#)
            .unwrap();
        assert!(second.is_empty());

        let last = decoder
            .decode(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        assert_eq!(last.len(), 1);
        let call = &last[0].tool_calls[0];
        assert_eq!(call.id.as_str(), "call_1");
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments, serde_json::json!({"path": "a.js"}));
    }

    #[test]
    fn done_marker_yields_nothing() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode("[DONE]").unwrap().is_empty());
        assert!(!decoder.is_finished());
    }

    #[test]
    fn error_payload_classified() {
        let mut decoder = ChunkDecoder::new();
        let err = decoder
            .decode(r#"{"error":{"message":"bad key","type":"authentication_error"}}"#)
            .unwrap_err();
        assert!(err.is_fatal());

        let err = decoder
            .decode(r#"{"error":{"message":"busy","type":"overloaded_error"}}"#)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_chunk_is_interruption() {
        let mut decoder = ChunkDecoder::new();
        let err = decoder.decode("{not json").unwrap_err();
        assert!(matches!(err, GatewayError::StreamInterrupted(_)));
    }
}
