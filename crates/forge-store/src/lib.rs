pub mod audit;
pub mod error;
pub mod layout;
pub mod sessions;

pub use audit::{AuditKind, AuditLog, AuditRecord};
pub use error::StoreError;
pub use layout::{validate_session_id, Area, ArtifactKind, ArtifactLayout, ArtifactNaming};
pub use sessions::{LastFailedTool, ResolvedSession, SessionStore};
