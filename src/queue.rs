use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// A message handed out by a [`JobSource`], pending acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: String,
    /// Opaque handle passed back to [`JobSource::acknowledge`]
    pub receipt: String,
}

/// At-least-once job delivery with explicit acknowledgment
///
/// A received message that is never acknowledged becomes visible again
/// after the source's visibility timeout and is delivered a second time.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Waits up to `wait` for one message; `None` when nothing arrived
    async fn receive(&self, wait: Duration) -> anyhow::Result<Option<ReceivedMessage>>;

    /// Removes a received message for good
    async fn acknowledge(&self, receipt: &str) -> anyhow::Result<()>;
}

struct InFlight {
    body: String,
    visible_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<String>,
    in_flight: HashMap<String, InFlight>,
}

/// In-process job source
pub struct MemoryJobSource {
    state: Mutex<MemoryState>,
    notify: Notify,
    next_receipt: AtomicU64,
    visibility_timeout: Duration,
}

impl MemoryJobSource {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            next_receipt: AtomicU64::new(1),
            visibility_timeout,
        }
    }

    pub async fn push(&self, body: impl Into<String>) {
        self.state.lock().await.ready.push_back(body.into());
        self.notify.notify_one();
    }

    /// Messages waiting to be received
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages received but not yet acknowledged
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    async fn try_pop(&self) -> Option<ReceivedMessage> {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(message) = state.in_flight.remove(&receipt) {
                log::debug!("Message {receipt} was not acknowledged in time, redelivering");
                state.ready.push_back(message.body);
            }
        }

        let body = state.ready.pop_front()?;
        let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed).to_string();
        state.in_flight.insert(
            receipt.clone(),
            InFlight {
                body: body.clone(),
                visible_at: now + self.visibility_timeout,
            },
        );
        Some(ReceivedMessage { body, receipt })
    }
}

#[async_trait]
impl JobSource for MemoryJobSource {
    async fn receive(&self, wait: Duration) -> anyhow::Result<Option<ReceivedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.try_pop().await {
                return Ok(Some(message));
            }

            // Wake up for pushes, or for the next in-flight message to expire
            let next_visible = self
                .state
                .lock()
                .await
                .in_flight
                .values()
                .map(|m| m.visible_at)
                .min();
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {
                    if Instant::now() >= deadline {
                        return Ok(self.try_pop().await);
                    }
                }
            }
        }
    }

    async fn acknowledge(&self, receipt: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .await
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .with_context(|| format!("unknown or expired receipt {receipt}"))
    }
}

/// Job source reading `*.json` message files from a spool directory
///
/// Files are delivered oldest name first. Acknowledging deletes the file;
/// files left in place are delivered again once the visibility timeout
/// passes.
pub struct SpoolJobSource {
    dir: PathBuf,
    visibility_timeout: Duration,
    poll_interval: Duration,
    hidden: parking_lot::Mutex<HashMap<PathBuf, Instant>>,
}

impl SpoolJobSource {
    pub fn new(dir: impl Into<PathBuf>, visibility_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            visibility_timeout,
            poll_interval: Duration::from_millis(500),
            hidden: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn next_visible(&self) -> anyhow::Result<Option<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading spool {}", self.dir.display()))?;

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                candidates.push(path);
            }
        }
        candidates.sort();

        let now = Instant::now();
        let mut hidden = self.hidden.lock();
        hidden.retain(|path, visible_at| *visible_at > now && candidates.contains(path));
        let next = candidates.into_iter().find(|path| !hidden.contains_key(path));
        if let Some(path) = &next {
            hidden.insert(path.clone(), now + self.visibility_timeout);
        }
        Ok(next)
    }
}

#[async_trait]
impl JobSource for SpoolJobSource {
    async fn receive(&self, wait: Duration) -> anyhow::Result<Option<ReceivedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(path) = self.next_visible().await? {
                match tokio::fs::read_to_string(&path).await {
                    Ok(body) => {
                        return Ok(Some(ReceivedMessage {
                            body,
                            receipt: path.to_string_lossy().into_owned(),
                        }));
                    }
                    Err(e) => {
                        // Stays hidden until its visibility timeout passes
                        log::warn!("Skipping unreadable spool file {}: {e}", path.display());
                        continue;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, receipt: &str) -> anyhow::Result<()> {
        let path = PathBuf::from(receipt);
        self.hidden.lock().remove(&path);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("deleting spool file {receipt}"))
    }
}
