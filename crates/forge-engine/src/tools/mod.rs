pub mod publish;
pub mod read_file;
pub mod write_artifact;

use std::sync::Arc;

use forge_store::{ArtifactKind, ArtifactLayout};

use crate::publish::PublishWorkflow;
use crate::registry::ToolRegistry;

pub use run_tests::TestCommand;

pub const READ_FILE: &str = "read_file";
pub const WRITE_SOURCE: &str = "write_source";
pub const WRITE_TEST: &str = "write_test";
pub const RUN_TESTS: &str = "run_tests";
pub const PUBLISH: &str = "publish";

/// Create a ToolRegistry with the built-in tools.
pub fn create_default_registry(
    layout: ArtifactLayout,
    test_command: TestCommand,
    workflow: Arc<PublishWorkflow>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(read_file::ReadFileTool::new(layout.clone())));
    registry.register(Arc::new(write_artifact::WriteArtifactTool::new(
        layout.clone(),
        ArtifactKind::Source,
    )));
    registry.register(Arc::new(write_artifact::WriteArtifactTool::new(
        layout.clone(),
        ArtifactKind::Test,
    )));
    registry.register(Arc::new(run_tests::RunTestsTool::new(layout, test_command)));
    registry.register(Arc::new(publish::PublishTool::new(workflow)));

    registry
}
