//! Fan-out of per-job progress events to WebSocket subscribers.
//!
//! Generalizes the embedded workflow event bus's `HashMap<id,
//! broadcast::Sender>` registry from workflow events to [`ProgressEvent`].
//! Events are fan-out-only, never queued: if no subscriber is present when
//! an event is published, it is lost (durable truth lives in C1).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel capacity per job. Generous enough to absorb a burst of progress
/// ticks without dropping the terminal event a subscriber is waiting for.
const CHANNEL_CAPACITY: usize = 256;

/// Progress event (§3.1 "Progress Event"). Ephemeral; never persisted by
/// the bus itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Subscribed {
        job_id: uuid::Uuid,
        ts: DateTime<Utc>,
    },
    TaskStatus {
        job_id: uuid::Uuid,
        status: String,
        progress: u8,
        step: Option<String>,
        ts: DateTime<Utc>,
    },
    ProgressUpdate {
        job_id: uuid::Uuid,
        progress: u8,
        step: Option<String>,
        elapsed_s: Option<f64>,
        eta_s: Option<f64>,
        details: Option<serde_json::Value>,
        ts: DateTime<Utc>,
    },
    Milestone {
        job_id: uuid::Uuid,
        step: String,
        details: Option<serde_json::Value>,
        ts: DateTime<Utc>,
    },
    TaskComplete {
        job_id: uuid::Uuid,
        elapsed_s: f64,
        result_summary: Option<serde_json::Value>,
        ts: DateTime<Utc>,
    },
    TaskError {
        job_id: uuid::Uuid,
        error: String,
        error_type: String,
        suggestion: &'static str,
        ts: DateTime<Utc>,
    },
    Pong {
        ts: DateTime<Utc>,
    },
}

impl ProgressEvent {
    #[must_use]
    pub fn job_id(&self) -> Option<uuid::Uuid> {
        match self {
            Self::Subscribed { job_id, .. }
            | Self::TaskStatus { job_id, .. }
            | Self::ProgressUpdate { job_id, .. }
            | Self::Milestone { job_id, .. }
            | Self::TaskComplete { job_id, .. }
            | Self::TaskError { job_id, .. } => Some(*job_id),
            Self::Pong { .. } => None,
        }
    }

    /// Whether receipt of this event should close the subscription
    /// (§4.3: "Cancellation of the subscription ... the bus sees
    /// `task_complete`/`task_error`").
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskComplete { .. } | Self::TaskError { .. })
    }

    /// Human-friendly ETA formatting, following the reference progress
    /// publisher's `elapsed / progress * remaining` estimate.
    #[must_use]
    pub fn estimate_eta_seconds(elapsed_s: f64, progress: u8) -> Option<f64> {
        if progress == 0 || progress >= 100 {
            return None;
        }
        let progress = f64::from(progress);
        Some(elapsed_s / progress * (100.0 - progress))
    }
}

/// Health event carried on the well-known health channel (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub component: String,
    pub status: String,
    pub severity: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub ts: DateTime<Utc>,
}

/// Generic fan-out registry, parameterized so the same mechanism backs
/// both the per-job progress channels and the single health channel.
///
/// # Thread Safety
///
/// Uses `parking_lot::RwLock` for the channel registry; channels themselves
/// are `tokio::sync::broadcast`, which is lock-free.
///
/// # Backpressure
///
/// A subscriber that falls more than `CHANNEL_CAPACITY` events behind
/// receives `broadcast::error::RecvError::Lagged` rather than stalling the
/// publisher.
#[derive(Debug, Clone)]
pub struct ChannelBus<T: Clone> {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<T>>>>,
}

impl<T: Clone> ChannelBus<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { channels: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Subscribe to events on `key`, creating the channel if needed.
    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<T> {
        let mut channels = self.channels.write();
        let sender = channels.entry(key.to_string()).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event, returning the number of subscribers it reached.
    /// If no channel exists yet, one is created so future subscribers can
    /// connect, but the event itself is dropped (fan-out, not queued).
    pub fn publish(&self, key: &str, event: T) -> usize {
        let channels = self.channels.read();
        if let Some(sender) = channels.get(key) {
            let receivers = sender.receiver_count();
            let _ = sender.send(event);
            receivers
        } else {
            drop(channels);
            let mut channels = self.channels.write();
            let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
            let _ = tx.send(event);
            channels.insert(key.to_string(), tx);
            0
        }
    }

    /// Drop the channel for `key`. Subscribers observe `RecvError::Closed`.
    pub fn cleanup(&self, key: &str) {
        self.channels.write().remove(key);
    }

    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.channels.read().len()
    }

    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.channels.read().get(key).map_or(0, broadcast::Sender::receiver_count)
    }
}

impl<T: Clone> Default for ChannelBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event(job_id: uuid::Uuid, progress: u8) -> ProgressEvent {
        ProgressEvent::ProgressUpdate {
            job_id,
            progress,
            step: Some("parsing".into()),
            elapsed_s: Some(1.0),
            eta_s: None,
            details: None,
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn new_bus_has_no_channels() {
        let bus: ChannelBus<ProgressEvent> = ChannelBus::new();
        assert_eq!(bus.active_channels(), 0);
    }

    #[tokio::test]
    async fn subscribe_creates_channel() {
        let bus: ChannelBus<ProgressEvent> = ChannelBus::new();
        let _rx = bus.subscribe("job-1");
        assert_eq!(bus.active_channels(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus: ChannelBus<ProgressEvent> = ChannelBus::new();
        let job_id = uuid::Uuid::new_v4();
        let mut rx1 = bus.subscribe("job-1");
        let mut rx2 = bus.subscribe("job-1");

        let count = bus.publish("job-1", progress_event(job_id, 50));
        assert_eq!(count, 2);

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus: ChannelBus<ProgressEvent> = ChannelBus::new();
        let count = bus.publish("job-1", progress_event(uuid::Uuid::new_v4(), 10));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn late_subscriber_only_sees_future_events() {
        let bus: ChannelBus<ProgressEvent> = ChannelBus::new();
        let job_id = uuid::Uuid::new_v4();
        bus.publish("job-1", progress_event(job_id, 10));

        let mut rx = bus.subscribe("job-1");
        bus.publish("job-1", progress_event(job_id, 20));

        match rx.recv().await.unwrap() {
            ProgressEvent::ProgressUpdate { progress, .. } => assert_eq!(progress, 20),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cleanup_closes_channel() {
        let bus: ChannelBus<ProgressEvent> = ChannelBus::new();
        let mut rx = bus.subscribe("job-1");
        bus.cleanup("job-1");
        assert_eq!(bus.active_channels(), 0);
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn terminal_events_are_flagged() {
        let job_id = uuid::Uuid::new_v4();
        let complete = ProgressEvent::TaskComplete { job_id, elapsed_s: 1.0, result_summary: None, ts: Utc::now() };
        let error = ProgressEvent::TaskError {
            job_id,
            error: "boom".into(),
            error_type: "provider_error".into(),
            suggestion: "retry",
            ts: Utc::now(),
        };
        assert!(complete.is_terminal());
        assert!(error.is_terminal());
        assert!(!progress_event(job_id, 50).is_terminal());
    }

    #[test]
    fn eta_estimate_matches_elapsed_over_progress_times_remaining() {
        let eta = ProgressEvent::estimate_eta_seconds(40.0, 50).unwrap();
        assert!((eta - 40.0).abs() < 1e-9);
        assert!(ProgressEvent::estimate_eta_seconds(10.0, 0).is_none());
        assert!(ProgressEvent::estimate_eta_seconds(10.0, 100).is_none());
    }
}
