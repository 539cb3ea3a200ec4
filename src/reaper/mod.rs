//! Zombie reaper (C8): the sole source of recovery for jobs a worker
//! claimed and then disappeared on. Runs on a fixed tick, independent of
//! any single worker's lifetime, and never publishes progress — a failed
//! job surfaces to subscribers only through the next `task_status`/
//! `task_complete` a client requests, not via the live bus (§4.8).

use std::time::Duration;

use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::store::{TaskStore, TaskStoreError};

/// One sweep's tally, logged at the end of every tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub processing_timed_out: u64,
    pub pending_timed_out: u64,
}

impl SweepReport {
    #[must_use]
    pub fn total(self) -> u64 {
        self.processing_timed_out + self.pending_timed_out
    }
}

pub struct Reaper {
    task_store: TaskStore,
    interval: Duration,
}

impl Reaper {
    #[must_use]
    pub fn new(task_store: TaskStore, interval: Duration) -> Self {
        Self { task_store, interval }
    }

    /// Run the endless sweep loop. Never returns under normal operation;
    /// a store error just gets logged and retried on the next tick.
    pub async fn run(self) {
        let mut ticks = IntervalStream::new(tokio::time::interval(self.interval));
        // The first tick fires immediately; skip it so we don't sweep on boot
        // before any job has had a chance to even start.
        ticks.next().await;

        while ticks.next().await.is_some() {
            match self.sweep().await {
                Ok(report) if report.total() > 0 => {
                    info!(
                        processing_timed_out = report.processing_timed_out,
                        pending_timed_out = report.pending_timed_out,
                        "reaper swept stuck jobs"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reaper sweep failed; will retry next tick"),
            }
        }
    }

    /// Run one sweep: fail every `Processing` row stuck ≥ 15 minutes, then
    /// every `Pending` row stuck ≥ 20 minutes.
    pub async fn sweep(&self) -> Result<SweepReport, TaskStoreError> {
        let processing_timed_out = self.task_store.reap_stuck_processing().await?;
        let pending_timed_out = self.task_store.reap_stale_pending().await?;
        Ok(SweepReport { processing_timed_out, pending_timed_out })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_both_counters() {
        let report = SweepReport { processing_timed_out: 2, pending_timed_out: 3 };
        assert_eq!(report.total(), 5);
    }

    #[test]
    fn default_report_is_empty() {
        assert_eq!(SweepReport::default().total(), 0);
    }
}
