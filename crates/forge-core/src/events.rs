use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Events pushed to the client over a connection's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConnectionEvent {
    SessionId {
        session_id: SessionId,
    },

    Delta {
        text: String,
    },

    Heartbeat {
        phase: Phase,
        phase_elapsed_ms: u64,
        since_last_event_ms: u64,
        timestamp: i64,
    },

    Keepalive {
        timestamp: i64,
    },

    ToolCall {
        name: String,
        args: serde_json::Value,
    },

    ToolRetry {
        name: String,
        attempt: u32,
        max: u32,
        message: String,
    },

    ToolError {
        name: String,
        attempt: u32,
        max: u32,
        transient: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },

    ToolResponse {
        name: String,
        response: String,
    },

    Warning {
        reason: String,
        max_chars: usize,
    },

    FinalResponse {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        size_capped: bool,
    },

    WorkflowComplete {
        artifact: String,
        file_path: String,
    },

    WorkflowHalt {
        reason: String,
        max_steps: u32,
    },

    Error {
        message: String,
        terminal: bool,
    },
}

/// What the step loop is currently waiting on. Heartbeats are only sent
/// while a phase is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Streaming,
    Tool,
}

impl Phase {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Tool => "tool",
        }
    }
}

impl ConnectionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionId { .. } => "session_id",
            Self::Delta { .. } => "delta",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Keepalive { .. } => "keepalive",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolRetry { .. } => "tool_retry",
            Self::ToolError { .. } => "tool_error",
            Self::ToolResponse { .. } => "tool_response",
            Self::Warning { .. } => "warning",
            Self::FinalResponse { .. } => "final_response",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::WorkflowHalt { .. } => "workflow_halt",
            Self::Error { .. } => "error",
        }
    }

    /// Liveness pings don't count as progress for the idle watchdog.
    pub fn is_liveness(&self) -> bool {
        matches!(self, Self::Heartbeat { .. } | Self::Keepalive { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { terminal: true, .. })
    }

    pub fn terminal_error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            terminal: true,
        }
    }
}
