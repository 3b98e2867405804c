use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use forge_core::tools::{require_str, Tool, ToolContext, ToolError};
use forge_store::ArtifactLayout;

/// Reads a UTF-8 file from the project root or the session's artifact area.
pub struct ReadFileTool {
    layout: ArtifactLayout,
}

impl ReadFileTool {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    fn resolve(&self, raw: &str, ctx: &ToolContext) -> Result<PathBuf, ToolError> {
        let requested = Path::new(raw);
        if requested
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::AccessDenied(format!("{raw} escapes the allowed locations")));
        }

        let path = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            ctx.project_root.join(requested)
        };

        let in_project = path.starts_with(&ctx.project_root);
        let in_session = ctx.session_id.is_well_formed()
            && path.starts_with(self.layout.session_dir(&ctx.session_id));
        if in_project || in_session {
            Ok(path)
        } else {
            Err(ToolError::AccessDenied(format!(
                "{raw} is outside the allowed locations"
            )))
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        super::READ_FILE
    }

    fn description(&self) -> &str {
        "Read a text file from the project or from this session's staged and published artifacts"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project root, or an absolute path inside the session artifact area"
                }
            }
        })
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let raw = require_str(args, "path")?;
        let path = self.resolve(raw, ctx)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::io(format!("failed to read {raw}"), e))?;

        if content.is_empty() {
            return Ok("(empty file)".to_string());
        }
        Ok(content)
    }
}
