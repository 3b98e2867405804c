use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use forge_core::ids::SessionId;

use crate::error::StoreError;
use crate::layout::{validate_session_id, ArtifactLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    ToolInvocation,
    Workflow,
}

/// One line of a session's audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: String,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl AuditRecord {
    fn base(kind: AuditKind) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind,
            tool: None,
            arguments: None,
            output: None,
            error: None,
            attempts: None,
            detail: None,
        }
    }

    pub fn tool_invocation(tool: impl Into<String>, arguments: Value, attempts: u32) -> Self {
        Self {
            tool: Some(tool.into()),
            arguments: Some(arguments),
            attempts: Some(attempts),
            ..Self::base(AuditKind::ToolInvocation)
        }
    }

    pub fn workflow(detail: Value) -> Self {
        Self {
            detail: Some(detail),
            ..Self::base(AuditKind::Workflow)
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Append-only JSONL log per session, independent of the in-memory history.
#[derive(Clone, Debug)]
pub struct AuditLog {
    layout: ArtifactLayout,
}

impl AuditLog {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    /// Append a record. Failures are logged and swallowed.
    pub async fn append(&self, session: &SessionId, record: &AuditRecord) {
        if let Err(e) = self.try_append(session, record).await {
            warn!(session_id = %session, error = %e, "failed to append audit record");
        }
    }

    pub async fn try_append(&self, session: &SessionId, record: &AuditRecord) -> Result<(), StoreError> {
        validate_session_id(session)?;
        let path = self.layout.audit_path(session);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(format!("failed to create {}", parent.display()), e))?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(format!("failed to open {}", path.display()), e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))?;
        file.flush()
            .await
            .map_err(|e| StoreError::io(format!("failed to flush {}", path.display()), e))?;
        Ok(())
    }

    /// Read back every record for a session. A missing log yields none.
    pub async fn read_all(&self, session: &SessionId) -> Result<Vec<AuditRecord>, StoreError> {
        validate_session_id(session)?;
        let path = self.layout.audit_path(session);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(format!("failed to read {}", path.display()), e)),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}
