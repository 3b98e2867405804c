pub mod continuation;
pub mod error;
pub mod executor;
pub mod prompt;
pub mod publish;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod tools;
pub mod transient;
pub mod turn_buffer;

pub use continuation::{Continuation, ContinuationController};
pub use error::EngineError;
pub use executor::{RetryPolicy, ToolExecutor, ToolFailure};
pub use publish::{PublishMode, PublishOutcome, PublishWorkflow};
pub use registry::ToolRegistry;
pub use runner::{ReplayOutcome, RunOutcome, RunnerConfig, StepLoop};
pub use sink::{EventSink, RecordingSink};
pub use turn_buffer::{TurnBuffer, TurnResult};
