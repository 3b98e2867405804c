use async_trait::async_trait;
use forge_core::tools::{require_str, Tool, ToolContext, ToolError};
use forge_store::{Area, ArtifactKind, ArtifactLayout};

/// Writes the staged source or staged test for one artifact.
pub struct WriteArtifactTool {
    layout: ArtifactLayout,
    kind: ArtifactKind,
}

impl WriteArtifactTool {
    pub fn new(layout: ArtifactLayout, kind: ArtifactKind) -> Self {
        Self { layout, kind }
    }

    fn noun(&self) -> &'static str {
        match self.kind {
            ArtifactKind::Source => "source",
            ArtifactKind::Test => "test",
        }
    }
}

#[async_trait]
impl Tool for WriteArtifactTool {
    fn name(&self) -> &str {
        match self.kind {
            ArtifactKind::Source => super::WRITE_SOURCE,
            ArtifactKind::Test => super::WRITE_TEST,
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            ArtifactKind::Source => "Stage the source file for a named artifact, replacing any staged version",
            ArtifactKind::Test => "Stage the test file for a named artifact, replacing any staged version",
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["name", "content"],
            "properties": {
                "name": {
                    "type": "string",
                    "pattern": "^[A-Za-z0-9_-]{1,64}$",
                    "description": "Artifact name, e.g. the generated class name"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            }
        })
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let name = require_str(args, "name")?;
        let content = require_str(args, "content")?;

        let path = self
            .layout
            .artifact_path(&ctx.session_id, Area::Staging, self.kind, name)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io(format!("failed to create staging area for {name}"), e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::io(format!("failed to write staged {} for {name}", self.noun()), e))?;

        Ok(format!(
            "Staged {} for {name} ({} bytes, {} lines) at {}",
            self.noun(),
            content.len(),
            content.lines().count(),
            path.display()
        ))
    }
}
