//! Worker boot sequence and the per-kind read/dispatch loop (§4.4).

use futures::StreamExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::domain::job::JobKind;
use crate::AppState;

use super::handler::handle_message;

const CONSUMER_GROUP: &str = "workers";
const READ_BLOCK_MS: usize = 5_000;
const READ_BATCH: usize = 10;

const KINDS: [&str; 3] = ["template:parse", "template:edit", "template:review"];

/// Bind a worker identity the same way the reference stream consumer does:
/// `worker-{8 hex chars}`. Used both as the Streams consumer name and as
/// the `worker_id` attached to every telemetry event and every claim.
#[must_use]
pub fn consumer_id() -> String {
    format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

pub struct WorkerRuntime {
    state: AppState,
    consumer_id: String,
}

impl WorkerRuntime {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state, consumer_id: consumer_id() }
    }

    /// Open connections, ensure every consumer group exists, then enter the
    /// endless read/dispatch loop. Returns only on an unrecoverable setup
    /// error; the loop itself never returns.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(consumer_id = %self.consumer_id, "binding worker consumer identity");

        for kind in KINDS {
            self.state.work_log.ensure_group(kind, CONSUMER_GROUP).await?;
        }

        info!(consumer_id = %self.consumer_id, concurrency = self.state.config.worker.concurrency, "worker runtime started");

        let mut handles = Vec::new();
        for kind in KINDS {
            let state = self.state.clone();
            let consumer_id = self.consumer_id.clone();
            handles.push(tokio::spawn(async move {
                read_loop(state, kind, consumer_id).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Blocking-read up to `N` messages for one stream; dispatch each to a
/// bounded `JoinSet` so back-pressure comes from not issuing a new read
/// while the set is at capacity, never from blocking the stream itself.
async fn read_loop(state: AppState, stream: &'static str, consumer_id: String) {
    let concurrency = state.config.worker.concurrency.max(1);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    let mut messages = Box::pin(state.work_log.read_stream(
        stream.to_string(),
        CONSUMER_GROUP.to_string(),
        consumer_id.clone(),
        READ_BATCH,
        READ_BLOCK_MS,
    ));

    loop {
        while in_flight.len() >= concurrency {
            in_flight.join_next().await;
        }

        let message = match messages.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(stream, error = %e, "work log read failed; backing off");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
            None => break,
        };

        let state = state.clone();
        let consumer_id = consumer_id.clone();
        in_flight.spawn(async move {
            if let Err(e) = handle_message(&state, stream, &message, &consumer_id).await {
                error!(stream, msg_id = %message.msg_id, error = %e, "message handler failed");
            }
        });
    }
}

/// Map a stream name back to the `JobKind` discriminant it carries, for
/// handlers that need to know which agent pipeline to run.
#[must_use]
pub fn kind_label(stream: &str) -> &'static str {
    match stream {
        "template:parse" => "parse",
        "template:edit" => "edit",
        "template:review" => "review",
        _ => "unknown",
    }
}

#[must_use]
pub fn stream_for_kind(kind: &JobKind) -> &'static str {
    kind.stream_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_id_has_the_expected_shape() {
        let id = consumer_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);
    }

    #[test]
    fn kind_label_maps_every_stream() {
        assert_eq!(kind_label("template:parse"), "parse");
        assert_eq!(kind_label("template:edit"), "edit");
        assert_eq!(kind_label("template:review"), "review");
    }
}
