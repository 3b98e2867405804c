use tracing::warn;

use forge_core::events::ConnectionEvent;
use forge_core::messages::ToolCallRequest;
use forge_core::stream::StreamChunk;

use crate::sink::EventSink;

pub const DEFAULT_MAX_TURN_CHARS: usize = 60_000;

/// Assembled result of one model turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnResult {
    pub text: String,
    /// No terminal marker was seen, or the size cap cut the text.
    pub truncated: bool,
    pub size_capped: bool,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl TurnResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Accumulates streamed text for one turn under a character budget.
///
/// Once the budget is spent further text is dropped, but tool calls and the
/// terminal marker are still observed.
pub struct TurnBuffer {
    max_chars: usize,
    emit_deltas: bool,
    text: String,
    chars: usize,
    saw_finish: bool,
    size_capped: bool,
    tool_calls: Vec<ToolCallRequest>,
}

impl TurnBuffer {
    pub fn new(max_chars: usize, emit_deltas: bool) -> Self {
        Self {
            max_chars,
            emit_deltas,
            text: String::new(),
            chars: 0,
            saw_finish: false,
            size_capped: false,
            tool_calls: Vec::new(),
        }
    }

    pub fn consume(&mut self, chunk: StreamChunk, sink: &dyn EventSink) {
        sink.note_progress();
        if chunk.finish_reason.is_some() {
            self.saw_finish = true;
        }
        self.tool_calls.extend(chunk.tool_calls);

        let Some(fragment) = chunk.text else { return };
        if fragment.is_empty() || self.size_capped {
            return;
        }

        let remaining = self.max_chars - self.chars;
        let fragment_chars = fragment.chars().count();
        let accepted = if fragment_chars > remaining {
            self.size_capped = true;
            warn!(max_chars = self.max_chars, "turn text reached size cap");
            sink.emit(ConnectionEvent::Warning {
                reason: "response size cap reached".into(),
                max_chars: self.max_chars,
            });
            fragment.chars().take(remaining).collect::<String>()
        } else {
            fragment
        };

        if accepted.is_empty() {
            return;
        }
        self.chars += accepted.chars().count();
        if self.emit_deltas {
            sink.emit(ConnectionEvent::Delta {
                text: accepted.clone(),
            });
        }
        self.text.push_str(&accepted);
    }

    pub fn finalize(self) -> TurnResult {
        TurnResult {
            truncated: self.size_capped || !self.saw_finish,
            size_capped: self.size_capped,
            text: self.text,
            tool_calls: self.tool_calls,
        }
    }
}
