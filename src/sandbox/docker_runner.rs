use std::io::{self, PipeReader, Read};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at};

use crate::config::SandboxConfig;
use crate::error::LaunchError;
use crate::job::ExecutionOutcome;

use super::{Language, SandboxRunner};

/// Runs artifacts in throwaway containers through the docker CLI
///
/// Each execution bind-mounts the artifact's directory into a fresh
/// container, merges the CLI's stdout and stderr into one pipe and drains it
/// on a blocking task while the control task waits for exit. Runs exceeding
/// the time limit have their whole process group killed and the container
/// force-removed. After a normal exit the group is killed too, so background
/// leftovers cannot hold the pipe open, and the drain is joined with a bound.
pub struct DockerRunner {
    config: SandboxConfig,
}

#[async_trait]
impl SandboxRunner for DockerRunner {
    async fn execute(
        &self,
        language: &str,
        artifact: &Path,
    ) -> Result<ExecutionOutcome, LaunchError> {
        let language: Language = language.parse()?;
        let name = container_name(artifact);
        let args = self.run_args(language, artifact, &name)?;

        let (reader, writer) = io::pipe().map_err(LaunchError::Spawn)?;
        let mut command = self.docker_command()?;
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(writer.try_clone().map_err(LaunchError::Spawn)?)
            .stderr(writer)
            .process_group(0)
            .kill_on_drop(true);

        log::debug!("Starting container {name}: {args:?}");
        let started = Instant::now();
        let mut child = command.spawn().map_err(LaunchError::Spawn)?;
        // The command still owns write ends of the pipe; the drain only sees
        // EOF once every one of them is closed.
        drop(command);

        let drain = tokio::task::spawn_blocking(move || drain_output(reader));
        let time_limit = Duration::from_millis(self.config.time_limit_ms);

        // `id()` is gone once reaped; the group id stays valid while any member lives
        let group = child.id();
        let waited = timeout(time_limit, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                // Leftover background processes would keep the pipe open
                if let Some(pgid) = group {
                    kill_group(pgid);
                }
                let remaining = time_limit.saturating_sub(started.elapsed()).max(self.grace());
                let mut drain = drain;
                match timeout(remaining, &mut drain).await {
                    Ok(joined) => {
                        let output = joined.unwrap_or_else(|e| {
                            log::error!("Output drain for container {name} failed: {e}");
                            String::new()
                        });
                        let elapsed = started.elapsed();
                        log::debug!("Container {name} exited with {status} after {elapsed:?}");
                        Ok(ExecutionOutcome::completed(output, elapsed))
                    }
                    Err(_) => {
                        let elapsed = started.elapsed();
                        log::warn!(
                            "Output of container {name} still open {remaining:?} after exit, treating as time limit"
                        );
                        self.abandon_drain(drain, &name);
                        Ok(ExecutionOutcome::timed_out(elapsed))
                    }
                }
            }
            Ok(Err(e)) => {
                self.terminate(&mut child, &name).await;
                self.abandon_drain(drain, &name);
                Err(LaunchError::Wait(e))
            }
            Err(_) => {
                let elapsed = started.elapsed();
                log::warn!("Container {name} exceeded {time_limit:?}, killing it");
                self.terminate(&mut child, &name).await;
                self.abandon_drain(drain, &name);
                Ok(ExecutionOutcome::timed_out(elapsed))
            }
        }
    }
}

impl DockerRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Builds the `run` arguments for one execution
    pub fn run_args(
        &self,
        language: Language,
        artifact: &Path,
        name: &str,
    ) -> Result<Vec<String>, LaunchError> {
        let file_name = artifact
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| {
                LaunchError::Spawn(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("artifact path {} has no file name", artifact.display()),
                ))
            })?;
        let dir = match artifact.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let dir = std::path::absolute(dir).map_err(LaunchError::Spawn)?;

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        if self.config.network_disabled {
            args.push("--network=none".to_string());
        }
        if let Some(ref limit) = self.config.memory_limit {
            args.push(format!("--memory={limit}"));
        }
        if let Some(ref limit) = self.config.cpu_limit {
            args.push(format!("--cpus={limit}"));
        }
        args.push("-v".to_string());
        args.push(format!("{}:{}", dir.display(), self.config.mount_path));
        args.push(language.image(&self.config.images).to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(language.command(&self.config.mount_path, file_name));

        Ok(args)
    }

    fn docker_command(&self) -> Result<Command, LaunchError> {
        let (program, prefix) = self.config.docker_command.split_first().ok_or_else(|| {
            LaunchError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty docker command",
            ))
        })?;
        let mut command = Command::new(program);
        command.args(prefix);
        Ok(command)
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.kill_grace_ms)
    }

    /// Kills the CLI's process group and removes the container
    async fn terminate(&self, child: &mut Child, name: &str) {
        if let Some(pid) = child.id() {
            kill_group(pid);
        }
        // One grace period covers both the removal and the reap
        let deadline = tokio::time::Instant::now() + self.grace();

        // Killing the CLI leaves the container itself running
        match self.docker_command() {
            Ok(mut command) => {
                command.args(["rm", "-f", name]).kill_on_drop(true);
                match timeout_at(deadline, command.output()).await {
                    Ok(Ok(output)) if output.status.success() => {
                        log::debug!("Removed container {name}");
                    }
                    Ok(Ok(output)) => log::warn!(
                        "Removing container {name} failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                    Ok(Err(e)) => log::warn!("Removing container {name} failed: {e}"),
                    Err(_) => log::warn!("Removing container {name} timed out"),
                }
            }
            Err(e) => log::warn!("Cannot remove container {name}: {e}"),
        }

        match timeout_at(deadline, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Waiting for killed container {name} failed: {e}"),
            Err(_) => log::warn!("Container {name} still alive {:?} after kill", self.grace()),
        }
    }

    /// Lets the drain task finish on its own, within the kill grace period
    ///
    /// Its output is discarded. A drain still blocked after the grace period
    /// is abandoned: blocking reads cannot be cancelled, but the read returns
    /// as soon as the last holder of the pipe exits.
    fn abandon_drain(&self, drain: JoinHandle<String>, name: &str) {
        let grace = self.grace();
        let name = name.to_string();
        tokio::spawn(async move {
            match timeout(grace, drain).await {
                Ok(_) => log::debug!("Output drain for container {name} closed after kill"),
                Err(_) => log::warn!(
                    "Output drain for container {name} still open {grace:?} after kill, abandoning it"
                ),
            }
        });
    }
}

/// Sends SIGKILL to every process in the group led by `pgid`
///
/// A group with no members left is not an error.
fn kill_group(pgid: u32) {
    // SAFETY: `pgid` is the id of a group created with `process_group(0)` for
    // a child of this process; killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("Failed to kill process group {pgid}: {err}");
        }
    }
}

/// Reads the merged output stream until every writer has closed it
fn drain_output(mut reader: PipeReader) -> String {
    let mut buffer = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buffer) {
        log::warn!("Reading container output failed: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Names the container after the artifact's scratch directory
fn container_name(artifact: &Path) -> String {
    let scratch = artifact
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let scratch: String = scratch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    if scratch.is_empty() {
        format!("sandbox-{}", std::process::id())
    } else {
        format!("sandbox-{scratch}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_args() {
        let runner = DockerRunner::new(SandboxConfig {
            memory_limit: Some("256m".to_string()),
            ..SandboxConfig::default()
        });
        let artifact = Path::new("/tmp/submission-job-1-abc/Main.java");
        let name = container_name(artifact);
        assert_eq!(name, "sandbox-submission-job-1-abc");

        let args = runner.run_args(Language::Java, artifact, &name).unwrap();
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--name",
                "sandbox-submission-job-1-abc",
                "--network=none",
                "--memory=256m",
                "-v",
                "/tmp/submission-job-1-abc:/app",
                "tkoppine/java-runner",
                "sh",
                "-c",
                "javac /app/Main.java && java -cp /app Main",
            ]
        );
    }

    #[test]
    fn test_container_name_is_sanitized() {
        assert_eq!(
            container_name(Path::new("/tmp/we ird:dir/a.py")),
            "sandbox-we-ird-dir"
        );
    }
}
