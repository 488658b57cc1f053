use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::error::WorkerError;
use crate::job::{JobMessage, ResultEnvelope, UNKNOWN_JOB_ID};
use crate::publisher::ResultSink;
use crate::queue::{JobSource, ReceivedMessage};
use crate::sandbox::SandboxRunner;
use crate::storage::ArtifactFetcher;

/// What happened to an inbound message after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Every step succeeded and the message was removed from the source
    Acknowledged,
    /// Left in the source for redelivery
    Retained,
}

/// Serial job processor: poll, fetch, execute, publish, acknowledge
#[derive(Clone)]
pub struct Worker {
    id: u32,
    source: Arc<dyn JobSource>,
    fetcher: Arc<ArtifactFetcher>,
    sandbox: Arc<dyn SandboxRunner>,
    sink: ResultSink,
    response_channel: String,
    wait_time: Duration,
}

impl Worker {
    pub fn new(
        id: u32,
        source: Arc<dyn JobSource>,
        fetcher: Arc<ArtifactFetcher>,
        sandbox: Arc<dyn SandboxRunner>,
        sink: ResultSink,
        response_channel: impl Into<String>,
        wait_time: Duration,
    ) -> Self {
        Self {
            id,
            source,
            fetcher,
            sandbox,
            sink,
            response_channel: response_channel.into(),
            wait_time,
        }
    }

    /// Processes jobs one at a time until `token` is cancelled
    ///
    /// Per-job failures never end the loop. Only a failing job source does,
    /// in which case its error is returned.
    pub async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        let id = self.id;
        log::info!("Worker {id} started, listening for messages...");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("Worker {id} received shutdown signal, stopping");
                    break;
                }

                received = self.source.receive(self.wait_time) => {
                    let Some(message) = received? else {
                        continue;
                    };

                    // Isolated in its own task so a panic only costs this job
                    let worker = self.clone();
                    let handle = tokio::spawn(async move { worker.process(message).await });
                    if let Err(e) = handle.await {
                        log::error!("Processing a job panicked on worker {id}, message left for redelivery: {e}");
                    }
                }
            }
        }

        log::info!("Worker {id} has shut down gracefully");
        Ok(())
    }

    /// Handles a single inbound message end to end
    ///
    /// The message is acknowledged only when decode, fetch, execution and
    /// publication all went through. The scratch directory is released on
    /// every path.
    pub async fn process(&self, message: ReceivedMessage) -> Disposition {
        let job = match JobMessage::decode(&message.body) {
            Ok(job) => job,
            Err(e) => {
                log::error!("Worker {}: {e}", self.id);
                self.publish(UNKNOWN_JOB_ID, &e).await;
                return Disposition::Retained;
            }
        };
        let job_id = job.job_id.as_str();
        log::info!(
            "Worker {} received job {job_id} ({}, {})",
            self.id,
            job.language,
            job.s3_key
        );

        let artifact = match self.fetcher.fetch(job_id, &job.s3_key).await {
            Ok(artifact) => artifact,
            Err(e) => {
                log::error!("Failed to fetch artifact for job {job_id}: {e}");
                self.publish(job_id, &e).await;
                return Disposition::Retained;
            }
        };

        let executed = self.sandbox.execute(&job.language, artifact.path()).await;
        artifact.release();

        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(e) => {
                let e = WorkerError::from(e);
                log::error!("Job {job_id}: {e}");
                self.publish(job_id, &e).await;
                return Disposition::Retained;
            }
        };
        log::info!(
            "Job {job_id} finished in {}ms{}",
            outcome.duration_ms,
            if outcome.timed_out { " (timed out)" } else { "" }
        );

        let payload = codec::decode(&outcome);
        let envelope = ResultEnvelope::new(&job, &outcome, payload);
        self.sink
            .publish(&self.response_channel, job_id, &envelope.render())
            .await;

        match self.source.acknowledge(&message.receipt).await {
            Ok(()) => {
                log::debug!("Acknowledged job {job_id}");
                Disposition::Acknowledged
            }
            Err(e) => {
                log::error!("Failed to acknowledge job {job_id}, it will be redelivered: {e:#}");
                Disposition::Retained
            }
        }
    }

    async fn publish(&self, job_id: &str, error: &WorkerError) {
        self.sink
            .publish(&self.response_channel, job_id, &error.to_string())
            .await;
    }
}
