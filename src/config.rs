use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "sandbox-worker", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Label of this worker instance in logs
    #[arg(long = "worker-id", short = 'w', default_value_t = 1)]
    pub worker_id: u32,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> anyhow::Result<Config> {
        Config::from_file(&self.config_path)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Root for per-job scratch directories
    pub scratch_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).with_context(|| format!("parsing {path}"))
    }

    /// Configured scratch root, or `<user cache dir>/scratch`
    pub fn scratch_root(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.scratch_dir {
            return Ok(dir.clone());
        }

        use directories::ProjectDirs;
        let proj_dirs = ProjectDirs::from("", "", "sandbox-worker")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;
        Ok(proj_dirs.cache_dir().join("scratch"))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct QueueConfig {
    /// Where job messages are received from
    pub request_queue: String,
    /// Where result messages are published to
    pub response_queue: String,
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub bucket: PathBuf,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Program (and leading arguments) used to drive the container runtime
    pub docker_command: Vec<String>,
    /// In-container path where the scratch directory is mounted
    pub mount_path: String,
    pub time_limit_ms: u64,
    /// How long to wait for a killed container to actually go away
    pub kill_grace_ms: u64,
    pub network_disabled: bool,
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    pub images: ImageConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_command: vec!["docker".to_string()],
            mount_path: "/app".to_string(),
            time_limit_ms: 90_000,
            kill_grace_ms: 15_000,
            network_disabled: true,
            memory_limit: None,
            cpu_limit: None,
            images: ImageConfig::default(),
        }
    }
}

/// Runner image per supported language
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ImageConfig {
    pub java: String,
    pub python: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            java: "tkoppine/java-runner".to_string(),
            python: "tkoppine/python-runner".to_string(),
        }
    }
}

fn default_wait_time() -> u64 {
    10
}

fn default_visibility_timeout() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/example.json");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.queue.wait_time_secs, 20);
        assert_eq!(config.queue.visibility_timeout_secs, 120);
        assert_eq!(config.storage.bucket, PathBuf::from("/srv/submissions"));
        assert_eq!(config.sandbox.time_limit_ms, 90_000);
        assert_eq!(config.sandbox.memory_limit.as_deref(), Some("512m"));
        assert_eq!(config.sandbox.images.java, "tkoppine/java-runner");
        assert_eq!(
            config.scratch_root().unwrap(),
            PathBuf::from("/var/tmp/sandbox-worker")
        );
    }

    #[test]
    fn test_sandbox_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"queue":{"request_queue":"in","response_queue":"out"},"storage":{"bucket":"b"}}"#,
        )
        .unwrap();
        assert_eq!(config.sandbox, SandboxConfig::default());
        assert_eq!(config.queue.wait_time_secs, 10);
        assert!(config.scratch_dir.is_none());
    }
}
