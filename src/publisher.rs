use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

/// Transport delivering result messages to a named response channel
#[async_trait]
pub trait ResponseChannel: Send + Sync {
    async fn send(&self, channel: &str, body: String) -> anyhow::Result<()>;
}

/// Records every message it is given
#[derive(Default)]
pub struct MemoryResponseChannel {
    sent: parking_lot::Mutex<Vec<(String, String)>>,
}

impl MemoryResponseChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(channel, body)` pairs in the order they were sent
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ResponseChannel for MemoryResponseChannel {
    async fn send(&self, channel: &str, body: String) -> anyhow::Result<()> {
        self.sent.lock().push((channel.to_string(), body));
        Ok(())
    }
}

/// Writes each message as its own file inside the channel directory
///
/// File names start with a UTC timestamp so a reader can process them in
/// publication order.
#[derive(Default)]
pub struct SpoolResponseChannel {
    sequence: AtomicU64,
}

impl SpoolResponseChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseChannel for SpoolResponseChannel {
    async fn send(&self, channel: &str, body: String) -> anyhow::Result<()> {
        let dir = PathBuf::from(channel);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating channel directory {channel}"))?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stem = format!(
            "{}-{}-{sequence:06}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            std::process::id()
        );

        // Readers only pick up `*.json`, so rename once fully written
        let partial = dir.join(format!("{stem}.tmp"));
        tokio::fs::write(&partial, body)
            .await
            .with_context(|| format!("writing {}", partial.display()))?;
        tokio::fs::rename(&partial, dir.join(format!("{stem}.json")))
            .await
            .with_context(|| format!("publishing {}", partial.display()))?;
        Ok(())
    }
}

/// The message published for every processed job
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage<'a> {
    pub job_id: &'a str,
    /// Either a rendered result envelope or a prefixed error string
    pub result: &'a str,
}

/// Fire-and-forget publisher of job results
///
/// Publication is at most once: encode and transport failures are logged and
/// dropped, and the caller is never told about them.
#[derive(Clone)]
pub struct ResultSink {
    channel: Arc<dyn ResponseChannel>,
}

impl ResultSink {
    pub fn new(channel: Arc<dyn ResponseChannel>) -> Self {
        Self { channel }
    }

    pub async fn publish(&self, response_channel: &str, job_id: &str, result: &str) {
        let message = ResultMessage { job_id, result };
        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Failed to serialize result message for job {job_id}: {e}");
                return;
            }
        };

        match self.channel.send(response_channel, body).await {
            Ok(()) => log::info!("Published result for job {job_id}"),
            Err(e) => log::error!("Failed to publish result for job {job_id}: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FailingChannel;

    #[async_trait]
    impl ResponseChannel for FailingChannel {
        async fn send(&self, _channel: &str, _body: String) -> anyhow::Result<()> {
            anyhow::bail!("channel unavailable")
        }
    }

    #[tokio::test]
    async fn test_publish_result() {
        let channel = Arc::new(MemoryResponseChannel::new());
        let sink = ResultSink::new(channel.clone());

        sink.publish("responses", "job-123", "test result").await;

        assert_eq!(
            channel.sent(),
            vec![(
                "responses".to_string(),
                r#"{"jobId":"job-123","result":"test result"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        let sink = ResultSink::new(Arc::new(FailingChannel));
        sink.publish("responses", "job-123", "test result").await;
    }

    #[tokio::test]
    async fn test_spool_channel_writes_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let channel_dir = dir.path().join("responses");
        let channel = SpoolResponseChannel::new();
        let channel_ref = channel_dir.to_string_lossy().into_owned();

        channel.send(&channel_ref, "one".to_string()).await.unwrap();
        channel.send(&channel_ref, "two".to_string()).await.unwrap();

        let mut files: Vec<PathBuf> = std::fs::read_dir(&channel_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "json"));
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(&files[1]).unwrap(), "two");
    }
}
