use crate::core::link::{Link, Recovery};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Sleep for `duration` unless `cancel` fires first. Returns `false` when cancelled.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Waits used by a pump when it has nothing to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpTimings {
    /// Wait between liveness checks while either side is down
    pub idle_wait: Duration,
    /// Wait after a read that returned no bytes
    pub empty_backoff: Duration,
}

impl Default for PumpTimings {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(100),
            empty_backoff: Duration::from_millis(10),
        }
    }
}

/// Why a pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    Cancelled,
    /// A link with a terminating loss policy failed
    LinkLost { link: String },
    /// A bounded reconnect policy ran out of attempts
    GaveUp { link: String },
}

/// Byte counters for one direction
#[derive(Debug, Default)]
pub struct PumpStats {
    bytes: AtomicU64,
    chunks: AtomicU64,
}

impl PumpStats {
    fn record(&self, len: usize) {
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }
}

/// Copies bytes from one link to another, one direction only.
///
/// Bytes are written in the order they were read and each read is written
/// as one unit. Nothing is retried: when the destination fails the chunk is
/// dropped and the destination's loss policy decides what happens next.
pub struct ForwardingPump {
    direction: String,
    source: Arc<Link>,
    destination: Arc<Link>,
    cancel: CancellationToken,
    timings: PumpTimings,
    stats: Arc<PumpStats>,
}

impl ForwardingPump {
    pub fn new(source: Arc<Link>, destination: Arc<Link>, cancel: CancellationToken) -> Self {
        let direction = format!("{}->{}", source.label(), destination.label());
        Self {
            direction,
            source,
            destination,
            cancel,
            timings: PumpTimings::default(),
            stats: Arc::new(PumpStats::default()),
        }
    }

    pub fn with_timings(mut self, timings: PumpTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn direction(&self) -> &str {
        &self.direction
    }

    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.stats)
    }

    pub async fn run(self) -> PumpExit {
        debug!("{} pump started", self.direction);
        let exit = self.forward().await;
        debug!(
            "{} pump stopped after {} bytes: {:?}",
            self.direction,
            self.stats.bytes(),
            exit
        );
        exit
    }

    async fn forward(&self) -> PumpExit {
        loop {
            if self.cancel.is_cancelled() {
                return PumpExit::Cancelled;
            }

            let (source, destination) = match (
                self.source.live_endpoint().await,
                self.destination.live_endpoint().await,
            ) {
                (Some(source), Some(destination)) => (source, destination),
                _ => {
                    if !pause(self.timings.idle_wait, &self.cancel).await {
                        return PumpExit::Cancelled;
                    }
                    continue;
                }
            };

            let data = match source.read().await {
                Ok(data) => data,
                Err(e) if e.is_transient() => continue,
                Err(e) => {
                    match self.source.on_loss(&source, &e, &self.cancel).await {
                        Recovery::Continue => continue,
                        outcome => return self.exit_for(&self.source, outcome),
                    }
                }
            };

            if data.is_empty() {
                if !pause(self.timings.empty_backoff, &self.cancel).await {
                    return PumpExit::Cancelled;
                }
                continue;
            }

            let written = tokio::select! {
                _ = self.cancel.cancelled() => return PumpExit::Cancelled,
                result = destination.write(&data) => result,
            };

            match written {
                Ok(()) => {
                    self.stats.record(data.len());
                    trace!(
                        direction = %self.direction,
                        bytes = data.len(),
                        preview = %hex::encode(&data[..data.len().min(16)]),
                        "forwarded"
                    );
                }
                Err(e) => {
                    match self.destination.on_loss(&destination, &e, &self.cancel).await {
                        Recovery::Continue => continue,
                        outcome => return self.exit_for(&self.destination, outcome),
                    }
                }
            }
        }
    }

    fn exit_for(&self, link: &Link, outcome: Recovery) -> PumpExit {
        let link = link.label().to_string();
        match outcome {
            Recovery::GiveUp => PumpExit::GaveUp { link },
            _ => PumpExit::LinkLost { link },
        }
    }
}
