//! Structured telemetry (C9): every component emits the same envelope
//! shape so the trace of an operation can be reconstructed across the
//! worker, the gateway and the pipeline from `trace_id` alone.
//!
//! Grounded on the reference telemetry logger's event envelope
//! (`event_id`/`timestamp`/`event_type`/`service`/trace context/`data`/
//! `metadata`), emitted here as a `tracing` event on the `telemetry`
//! target instead of a direct stdout/Redis write — the `json` formatter
//! layer in [`crate::logging`] is what turns these into the one-line JSON
//! records the reference logger produced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::bus::{HealthEvent, HEALTH_CHANNEL};
use crate::AppState;

const SERVICE_NAME: &str = "taskfabric";

/// One structured event in the telemetry stream.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub event_id: Uuid,
    pub ts: DateTime<Utc>,
    pub service: &'static str,
    pub event_type: String,
    pub trace_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// Build the envelope without emitting it, so event construction itself
/// can be unit-tested without a live `AppState`.
#[must_use]
pub fn build_event(
    event_type: &str,
    trace_id: Option<Uuid>,
    task_id: Option<Uuid>,
    user_id: Option<String>,
    data: serde_json::Value,
) -> TelemetryEvent {
    TelemetryEvent {
        event_id: Uuid::new_v4(),
        ts: Utc::now(),
        service: SERVICE_NAME,
        event_type: event_type.to_string(),
        trace_id,
        task_id,
        user_id,
        data,
        metadata: serde_json::json!({}),
    }
}

/// Emit one telemetry event (`operation.started`, `llm.request`, etc.) on
/// the `telemetry` tracing target as a single structured JSON line.
pub fn emit(event_type: &str, trace_id: Option<Uuid>, task_id: Option<Uuid>, user_id: Option<String>, data: serde_json::Value) {
    let event = build_event(event_type, trace_id, task_id, user_id, data);
    tracing::info!(target: "telemetry", event = %serde_json::to_string(&event).unwrap_or_default());
}

/// Emit a health event onto the well-known health channel (§4.3) for any
/// subscriber of `GET /ws/system/health`, as well as the `telemetry`
/// tracing target so it's also captured in logs.
pub fn emit_health(state: &AppState, component: &str, status: &str, severity: &str, message: impl Into<String>, metadata: serde_json::Value) {
    let message = message.into();
    let event = HealthEvent {
        component: component.to_string(),
        status: status.to_string(),
        severity: severity.to_string(),
        message: message.clone(),
        metadata,
        ts: Utc::now(),
    };
    tracing::info!(target: "telemetry", component, status, severity, message = %message, "health event");
    state.health_bus.publish(HEALTH_CHANNEL, event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_event_stamps_service_name_and_a_fresh_id() {
        let event = build_event("operation.started", None, None, None, serde_json::json!({}));
        assert_eq!(event.service, SERVICE_NAME);
        assert_eq!(event.event_type, "operation.started");
    }

    #[test]
    fn build_event_carries_trace_and_task_context_through() {
        let trace_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let event = build_event(
            "llm.request",
            Some(trace_id),
            Some(task_id),
            Some("user-1".to_string()),
            serde_json::json!({"prompt_type": "section_identification"}),
        );
        assert_eq!(event.trace_id, Some(trace_id));
        assert_eq!(event.task_id, Some(task_id));
        assert_eq!(event.user_id.as_deref(), Some("user-1"));
        assert_eq!(event.data["prompt_type"], "section_identification");
    }

    #[test]
    fn two_events_never_share_an_event_id() {
        let a = build_event("a", None, None, None, serde_json::json!({}));
        let b = build_event("a", None, None, None, serde_json::json!({}));
        assert_ne!(a.event_id, b.event_id);
    }
}
