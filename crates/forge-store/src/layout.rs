use std::path::{Path, PathBuf};

use forge_core::ids::SessionId;

use crate::error::StoreError;

const MAX_NAME_LEN: usize = 64;

/// File extensions used for generated artifacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactNaming {
    pub source_ext: String,
    pub test_ext: String,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self {
            source_ext: "js".into(),
            test_ext: "test.js".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Area {
    Staging,
    Final,
}

impl Area {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Final => "final",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Source,
    Test,
}

impl ArtifactKind {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Source => "sources",
            Self::Test => "tests",
        }
    }
}

/// Per-session directory layout under a data root:
///
/// ```text
/// <root>/sessions/<id>/staging/{sources,tests}/
/// <root>/sessions/<id>/final/{sources,tests}/
/// <root>/sessions/<id>/audit.jsonl
/// ```
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
    data_root: PathBuf,
    naming: ArtifactNaming,
}

impl ArtifactLayout {
    pub fn new(data_root: impl Into<PathBuf>, naming: ArtifactNaming) -> Self {
        Self {
            data_root: data_root.into(),
            naming,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn naming(&self) -> &ArtifactNaming {
        &self.naming
    }

    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.data_root.join("sessions").join(session.as_str())
    }

    pub fn area_dir(&self, session: &SessionId, area: Area, kind: ArtifactKind) -> PathBuf {
        self.session_dir(session)
            .join(area.dir_name())
            .join(kind.dir_name())
    }

    pub fn audit_path(&self, session: &SessionId) -> PathBuf {
        self.session_dir(session).join("audit.jsonl")
    }

    /// Path of one artifact file. Fails on names outside `[A-Za-z0-9_-]{1,64}`
    /// and on malformed session ids.
    pub fn artifact_path(
        &self,
        session: &SessionId,
        area: Area,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<PathBuf, StoreError> {
        validate_session_id(session)?;
        validate_artifact_name(name)?;
        let ext = match kind {
            ArtifactKind::Source => &self.naming.source_ext,
            ArtifactKind::Test => &self.naming.test_ext,
        };
        Ok(self.area_dir(session, area, kind).join(format!("{name}.{ext}")))
    }

    /// Create every directory a session's artifacts may live in.
    pub async fn ensure_session_dirs(&self, session: &SessionId) -> Result<(), StoreError> {
        validate_session_id(session)?;
        for area in [Area::Staging, Area::Final] {
            for kind in [ArtifactKind::Source, ArtifactKind::Test] {
                let dir = self.area_dir(session, area, kind);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| StoreError::io(format!("failed to create {}", dir.display()), e))?;
            }
        }
        Ok(())
    }
}

/// Session ids become path segments; only well-formed ones may.
pub fn validate_session_id(session: &SessionId) -> Result<(), StoreError> {
    if session.is_well_formed() {
        Ok(())
    } else {
        Err(StoreError::InvalidSession(session.to_string()))
    }
}

pub fn validate_artifact_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ArtifactLayout {
        ArtifactLayout::new("/data", ArtifactNaming::default())
    }

    #[test]
    fn paths_follow_session_layout() {
        let sid = SessionId::from_raw("sess_1");
        let layout = layout();
        assert_eq!(layout.session_dir(&sid), PathBuf::from("/data/sessions/sess_1"));
        assert_eq!(
            layout
                .artifact_path(&sid, Area::Staging, ArtifactKind::Source, "Bouncer")
                .unwrap(),
            PathBuf::from("/data/sessions/sess_1/staging/sources/Bouncer.js")
        );
        assert_eq!(
            layout
                .artifact_path(&sid, Area::Final, ArtifactKind::Test, "Bouncer")
                .unwrap(),
            PathBuf::from("/data/sessions/sess_1/final/tests/Bouncer.test.js")
        );
        assert_eq!(layout.audit_path(&sid), PathBuf::from("/data/sessions/sess_1/audit.jsonl"));
    }

    #[test]
    fn name_validation() {
        assert!(validate_artifact_name("Spinner_2-b").is_ok());
        assert!(validate_artifact_name("").is_err());
        assert!(validate_artifact_name("../etc").is_err());
        assert!(validate_artifact_name("a b").is_err());
        assert!(validate_artifact_name(&"x".repeat(64)).is_ok());
        assert!(validate_artifact_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn custom_extensions() {
        let layout = ArtifactLayout::new(
            "/d",
            ArtifactNaming {
                source_ext: "py".into(),
                test_ext: "spec.py".into(),
            },
        );
        let sid = SessionId::from_raw("s");
        let path = layout
            .artifact_path(&sid, Area::Staging, ArtifactKind::Test, "calc")
            .unwrap();
        assert!(path.ends_with("staging/tests/calc.spec.py"));
    }

    #[tokio::test]
    async fn malformed_session_never_becomes_a_path() {
        let layout = layout();
        for raw in ["/", "../escape"] {
            let sid = SessionId::from_raw(raw);
            let err = layout
                .artifact_path(&sid, Area::Staging, ArtifactKind::Source, "Bouncer")
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidSession(_)));
            assert!(matches!(
                layout.ensure_session_dirs(&sid).await,
                Err(StoreError::InvalidSession(_))
            ));
        }
    }

    #[tokio::test]
    async fn ensure_session_dirs_creates_all_areas() {
        let root = std::env::temp_dir().join(format!("forge_layout_{}", uuid::Uuid::now_v7()));
        let layout = ArtifactLayout::new(&root, ArtifactNaming::default());
        let sid = SessionId::new();
        layout.ensure_session_dirs(&sid).await.unwrap();

        for area in [Area::Staging, Area::Final] {
            for kind in [ArtifactKind::Source, ArtifactKind::Test] {
                assert!(layout.area_dir(&sid, area, kind).is_dir());
            }
        }
        let _ = std::fs::remove_dir_all(&root);
    }
}
