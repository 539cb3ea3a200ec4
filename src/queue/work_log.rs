//! Work log & dispatch (C2): one Redis stream per job kind, with consumer
//! groups providing at-least-once delivery and idempotent acknowledgement.
//!
//! Grounded on the stream-per-kind layout of the reference consumer
//! (`parser-workers` / `editor-workers` / `reviewer-workers` on
//! `template:parse` / `template:edit` / `template:review`), implemented
//! here with the `redis` crate's Streams commands instead of a
//! language-native client library.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;

/// Approximate cap on stream length enforced by `XTRIM ... MAXLEN ~` (§4.2).
const TRIM_MAXLEN: usize = 10_000;

#[derive(Debug, Error)]
pub enum WorkLogError {
    #[error("queue unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
    #[error("malformed message {0} on stream {1}")]
    MalformedMessage(String, String),
}

impl WorkLogError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::QueueUnavailable,
            Self::MalformedMessage(..) => ErrorKind::MalformedJson,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkLogError>;

/// An immutable log entry (§3.1 "Job Message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub msg_id: String,
    pub task_id: Uuid,
    pub payload: HashMap<String, String>,
}

/// A named append-only stream plus the consumer-group machinery over it.
#[derive(Debug, Clone)]
pub struct WorkLog {
    conn: ConnectionManager,
}

impl WorkLog {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// `append(stream, payload_map) -> msg_id`.
    pub async fn append(&self, stream: &str, payload: &HashMap<String, String>) -> Result<String> {
        let mut conn = self.conn.clone();
        let mut items: Vec<(&str, &str)> = Vec::with_capacity(payload.len());
        for (k, v) in payload {
            items.push((k.as_str(), v.as_str()));
        }
        let msg_id: String = conn.xadd(stream, "*", &items).await?;
        // Best-effort approximate trim; never fails the append.
        let _: std::result::Result<i64, redis::RedisError> = conn.xtrim(stream, redis::streams::StreamTrimOptions::maxlen(
            redis::streams::StreamTrimStrategy::Approx,
            TRIM_MAXLEN,
        )).await;
        Ok(msg_id)
    }

    /// `ensure_group(stream, group, start)` — idempotent; ignores `BUSYGROUP`.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: std::result::Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `read(stream, group, consumer, n, block_ms) -> [msg]`.
    pub async fn read(&self, stream: &str, group: &str, consumer: &str, count: usize, block_ms: usize) -> Result<Vec<JobMessage>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default().group(group, consumer).count(count).block(block_ms);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &opts).await?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut payload = HashMap::new();
                for (field, value) in entry.map {
                    if let redis::Value::BulkString(bytes) = value {
                        if let Ok(s) = String::from_utf8(bytes) {
                            payload.insert(field, s);
                        }
                    }
                }
                let task_id = payload
                    .get("task_id")
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| WorkLogError::MalformedMessage(entry.id.clone(), stream.to_string()))?;
                out.push(JobMessage { msg_id: entry.id, task_id, payload });
            }
        }
        Ok(out)
    }

    /// As [`Self::read`], but yields each message through an async stream
    /// instead of collecting a batch up front, so a caller driving several
    /// streams with `futures::StreamExt` can start dispatching the first
    /// message of a batch without waiting on the rest of it.
    pub fn read_stream(
        &self,
        stream: String,
        group: String,
        consumer: String,
        count: usize,
        block_ms: usize,
    ) -> impl futures::Stream<Item = Result<JobMessage>> + '_ {
        async_stream::try_stream! {
            loop {
                let batch = self.read(&stream, &group, &consumer, count, block_ms).await?;
                for message in batch {
                    yield message;
                }
            }
        }
    }

    /// `ack(stream, group, msg_id)`.
    pub async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[msg_id]).await?;
        Ok(())
    }

    /// `pending(stream, group) -> count`.
    pub async fn pending(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let summary: redis::streams::StreamPendingReply = conn.xpending(stream, group).await?;
        Ok(match summary {
            redis::streams::StreamPendingReply::Empty => 0,
            redis::streams::StreamPendingReply::Data(data) => data.count as u64,
        })
    }

    /// Idempotent submit (§6.1, round-trip law C): `SETNX` the caller's
    /// `Idempotency-Key` to the new `task_id` before a job is created, so a
    /// concurrent repeat submit observes the winning task rather than
    /// racing a second row into existence. Returns `None` when this call
    /// won the key (the caller should proceed to create the job); returns
    /// `Some(existing_task_id)` when a prior submit already holds it.
    pub async fn idempotency_put_if_absent(&self, key: &str, task_id: Uuid, ttl_secs: u64) -> Result<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let redis_key = idempotency_key(key);

        let acquired: bool = conn.set_nx(&redis_key, task_id.to_string()).await?;
        if acquired {
            let _: () = conn.expire(&redis_key, ttl_secs as i64).await?;
            return Ok(None);
        }
        self.idempotency_get(key).await
    }

    /// `idempotency_get(key)` — the `task_id` a prior submit under this key
    /// produced, if the window hasn't expired.
    pub async fn idempotency_get(&self, key: &str) -> Result<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(idempotency_key(key)).await?;
        Ok(raw.and_then(|s| Uuid::parse_str(&s).ok()))
    }
}

fn idempotency_key(key: &str) -> String {
    format!("idempotency:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_message_maps_to_malformed_json_kind() {
        let err = WorkLogError::MalformedMessage("1-0".into(), "template:parse".into());
        assert_eq!(err.kind(), ErrorKind::MalformedJson);
    }
}
