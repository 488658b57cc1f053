mod docker_runner;
mod language;
mod runner;

pub use docker_runner::DockerRunner;
pub use language::Language;
pub use runner::SandboxRunner;

use crate::config::SandboxConfig;

/// Creates the container-backed sandbox runner
///
/// Jobs can still be accepted when the container CLI is missing from `PATH`,
/// but every execution will then fail to launch, so this is worth a warning
/// at startup.
pub fn create_sandbox_runner(config: SandboxConfig) -> Box<dyn SandboxRunner> {
    let program = config.docker_command.first().cloned().unwrap_or_default();
    let found = std::process::Command::new("which")
        .arg(&program)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);

    if found {
        log::info!("Creating DockerRunner using `{program}`");
    } else {
        log::warn!("Container CLI `{program}` not found on PATH, executions will fail to launch");
    }

    Box::new(DockerRunner::new(config))
}
