use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub project_root: PathBuf,
}

/// Tool definition sent to the model as part of the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Pull a required string argument out of a tool's JSON arguments.
pub fn require_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_display() {
        let err = ToolError::InvalidArguments("missing path".into());
        assert_eq!(err.to_string(), "invalid arguments: missing path");

        let err = ToolError::Timeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn io_error_display_includes_os_message() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = ToolError::io("failed to read src/Foo.js", source);
        assert_eq!(err.to_string(), "failed to read src/Foo.js: No such file or directory");
    }

    #[test]
    fn require_str_reports_missing_key() {
        let args = serde_json::json!({"name": "Widget"});
        assert_eq!(require_str(&args, "name").unwrap(), "Widget");
        let err = require_str(&args, "content").unwrap_err();
        assert_eq!(err.to_string(), "invalid arguments: content is required");
    }
}
