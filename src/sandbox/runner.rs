use std::path::Path;

use async_trait::async_trait;

use crate::error::LaunchError;
use crate::job::ExecutionOutcome;

/// Trait for executing one artifact inside an isolated sandbox
///
/// An `Ok` outcome means the program ran, including runs cut short by the
/// time limit. `Err` is reserved for runs that never started.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Runs the artifact at `artifact` as a program written in `language`
    ///
    /// Unsupported languages are rejected before any process is spawned.
    async fn execute(
        &self,
        language: &str,
        artifact: &Path,
    ) -> Result<ExecutionOutcome, LaunchError>;
}
