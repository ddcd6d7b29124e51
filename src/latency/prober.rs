//! Periodic round-trip probing.
//!
//! The prober owns one background task driven by `tokio::time::interval`:
//! the first tick fires immediately, later ticks every `interval`. While the
//! probed connection is not connected a tick sends no ping and clears the
//! stored sample. Stopping (or dropping) the prober aborts the task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::utils::error::ProbeError;

pub type Milliseconds = u64;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Something that can be asked for one round-trip measurement.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    async fn ping(&self) -> Result<Milliseconds, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTier {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl LatencyTier {
    pub fn classify(sample: Option<Milliseconds>) -> Self {
        match sample {
            None => LatencyTier::Unknown,
            Some(ms) if ms < 50 => LatencyTier::Good,
            Some(ms) if ms < 100 => LatencyTier::Fair,
            Some(_) => LatencyTier::Poor,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LatencyTier::Good => "good",
            LatencyTier::Fair => "fair",
            LatencyTier::Poor => "poor",
            LatencyTier::Unknown => "unknown",
        }
    }
}

#[derive(Debug)]
pub struct LatencyProber {
    sample: watch::Receiver<Option<Milliseconds>>,
    task: Option<JoinHandle<()>>,
}

impl LatencyProber {
    /// Start probing. Must be called from within a tokio runtime.
    pub fn start(probe: Arc<dyn Probe>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !probe.is_connected() {
                    // no sample while disconnected, not the last good one
                    tx.send_if_modified(|s| s.take().is_some());
                    continue;
                }

                let sample = match probe.ping().await {
                    Ok(ms) => Some(ms),
                    Err(e) => {
                        debug!("latency probe failed: {e}");
                        None
                    }
                };
                tx.send_replace(sample);
            }
        });

        Self {
            sample: rx,
            task: Some(task),
        }
    }

    pub fn latest(&self) -> Option<Milliseconds> {
        *self.sample.borrow()
    }

    pub fn tier(&self) -> LatencyTier {
        LatencyTier::classify(self.latest())
    }

    /// Receiver notified on every stored sample. Closed once the prober stops.
    pub fn subscribe(&self) -> watch::Receiver<Option<Milliseconds>> {
        self.sample.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LatencyProber {
    fn drop(&mut self) {
        self.stop();
    }
}
