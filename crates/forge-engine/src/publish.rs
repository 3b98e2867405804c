use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use forge_core::ids::SessionId;
use forge_store::{Area, ArtifactKind, ArtifactLayout, AuditLog, AuditRecord, StoreError};

/// Separator between source and test bytes when hashing a pair.
const DIGEST_SEPARATOR: &[u8] = b"\n\0--forge-test--\0\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// First promotion of this artifact.
    Published,
    /// A differing final version was replaced.
    Overwritten,
    /// Nothing staged at all; the existing final version stands.
    Kept,
    /// Staged and final pairs were byte-identical; nothing written.
    SkippedDuplicate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub artifact: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PublishMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Promotes staged artifacts into a session's final area.
pub struct PublishWorkflow {
    layout: ArtifactLayout,
    audit: AuditLog,
}

struct Pair {
    source: PathBuf,
    test: PathBuf,
}

impl PublishWorkflow {
    pub fn new(layout: ArtifactLayout, audit: AuditLog) -> Self {
        Self { layout, audit }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    fn pair(&self, session: &SessionId, area: Area, name: &str) -> Result<Pair, StoreError> {
        Ok(Pair {
            source: self.layout.artifact_path(session, area, ArtifactKind::Source, name)?,
            test: self.layout.artifact_path(session, area, ArtifactKind::Test, name)?,
        })
    }

    #[instrument(skip(self), fields(session_id = %session))]
    pub async fn publish(&self, session: &SessionId, name: &str) -> Result<PublishOutcome, StoreError> {
        let staged = self.pair(session, Area::Staging, name)?;
        let fin = self.pair(session, Area::Final, name)?;

        let staged_source = exists(&staged.source).await;
        let staged_test = exists(&staged.test).await;
        let final_source = exists(&fin.source).await;

        let mut outcome = PublishOutcome {
            artifact: name.to_string(),
            success: false,
            mode: None,
            final_path: None,
            warnings: Vec::new(),
        };

        if !staged_source {
            if !final_source {
                outcome.warnings.push(format!("nothing staged or published for {name}"));
            } else if !staged_test {
                outcome.success = true;
                outcome.mode = Some(PublishMode::Kept);
                outcome.final_path = Some(fin.source);
            } else {
                // Test-only revision against the published source.
                let unchanged =
                    exists(&fin.test).await && read(&staged.test).await? == read(&fin.test).await?;
                let mode = if unchanged {
                    PublishMode::SkippedDuplicate
                } else {
                    promote(&staged.test, &fin.test).await?;
                    PublishMode::Overwritten
                };
                info!(artifact = name, ?mode, "staged test published against final source");
                outcome.success = true;
                outcome.mode = Some(mode);
                outcome.final_path = Some(fin.source);
            }
            self.record(session, &outcome).await;
            return Ok(outcome);
        }

        if !staged_test {
            outcome
                .warnings
                .push(format!("no staged test for {name}; publishing source only"));
        }

        if final_source {
            let staged_digest = pair_digest(&staged.source, staged_test.then_some(&staged.test)).await?;
            let final_test = exists(&fin.test).await;
            let final_digest = pair_digest(&fin.source, final_test.then_some(&fin.test)).await?;
            if staged_digest == final_digest {
                info!(artifact = name, "staged artifact identical to final; skipping");
                outcome.success = true;
                outcome.mode = Some(PublishMode::SkippedDuplicate);
                outcome.final_path = Some(fin.source);
                self.record(session, &outcome).await;
                return Ok(outcome);
            }
        }

        promote(&staged.source, &fin.source).await?;
        if staged_test {
            promote(&staged.test, &fin.test).await?;
        }

        let mode = if final_source {
            PublishMode::Overwritten
        } else {
            PublishMode::Published
        };
        info!(artifact = name, ?mode, "artifact published");
        outcome.success = true;
        outcome.mode = Some(mode);
        outcome.final_path = Some(fin.source);
        self.record(session, &outcome).await;
        Ok(outcome)
    }

    async fn record(&self, session: &SessionId, outcome: &PublishOutcome) {
        let detail = serde_json::to_value(outcome).unwrap_or_default();
        self.audit.append(session, &AuditRecord::workflow(detail)).await;
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn read(path: &Path) -> Result<Vec<u8>, StoreError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io(format!("failed to read {}", path.display()), e))
}

async fn pair_digest(source: &Path, test: Option<&PathBuf>) -> Result<Vec<u8>, StoreError> {
    let mut hasher = Sha256::new();
    hasher.update(read(source).await?);
    hasher.update(DIGEST_SEPARATOR);
    if let Some(test) = test {
        hasher.update(read(test).await?);
    }
    Ok(hasher.finalize().to_vec())
}

/// Copy `from` over `to`, then remove `from`.
async fn promote(from: &Path, to: &Path) -> Result<(), StoreError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(format!("failed to create {}", parent.display()), e))?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| StoreError::io(format!("failed to copy {} to {}", from.display(), to.display()), e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| StoreError::io(format!("failed to remove {}", from.display()), e))?;
    Ok(())
}
