use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Who produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    ToolResult,
}

/// One exchange unit in a session's history. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub payload: TurnPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPayload {
    Text { text: String },
    ToolCall(ToolCallRequest),
    ToolResult(ToolOutcome),
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Result of a tool invocation, fed back to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_call_id: ToolCallId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            arguments,
        }
    }
}

impl ToolOutcome {
    pub fn success(call: &ToolCallRequest, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(call: &ToolCallRequest, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// --- Convenience constructors ---

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            payload: TurnPayload::Text { text: text.into() },
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            payload: TurnPayload::Text { text: text.into() },
        }
    }

    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            role: Role::Model,
            payload: TurnPayload::ToolCall(call),
        }
    }

    pub fn tool_result(outcome: ToolOutcome) -> Self {
        Self {
            role: Role::ToolResult,
            payload: TurnPayload::ToolResult(outcome),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            TurnPayload::Text { text } => Some(text),
            _ => None,
        }
    }
}
