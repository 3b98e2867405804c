use std::sync::Arc;

use async_trait::async_trait;
use forge_core::tools::{require_str, Tool, ToolContext, ToolError};
use forge_store::StoreError;

use crate::publish::PublishWorkflow;

/// Promotes an artifact's staged files to the session's final area.
pub struct PublishTool {
    workflow: Arc<PublishWorkflow>,
}

impl PublishTool {
    pub fn new(workflow: Arc<PublishWorkflow>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl Tool for PublishTool {
    fn name(&self) -> &str {
        super::PUBLISH
    }

    fn description(&self) -> &str {
        "Publish the staged source and test for a named artifact"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Artifact name to publish"
                }
            }
        })
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let name = require_str(args, "name")?;
        let outcome = self
            .workflow
            .publish(&ctx.session_id, name)
            .await
            .map_err(|e| match e {
                StoreError::InvalidName(_) => ToolError::InvalidArguments(e.to_string()),
                other => ToolError::ExecutionFailed(other.to_string()),
            })?;

        if !outcome.success {
            return Err(ToolError::PreconditionFailed(format!(
                "no staged source for {name} and nothing published yet"
            )));
        }
        serde_json::to_string(&outcome)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode publish outcome: {e}")))
    }
}
