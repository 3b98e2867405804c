use serde::{Deserialize, Serialize};

use crate::messages::ToolCallRequest;

/// One streamed piece of a model turn. Every field is optional: a chunk may
/// carry only text, only tool calls, only the terminal marker, or any mix.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Provider's terminal marker (e.g. `stop`, `tool_calls`, `length`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            tool_calls: vec![call],
            ..Default::default()
        }
    }

    pub fn with_finish(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
