//! Progress WebSocket (§6.2) and the operator-facing health stream (§4.3,
//! SPEC_FULL §6.6).
//!
//! Grounded on the reference `handle_websocket` task-event loop: upgrade,
//! then `tokio::select!` between the client socket and the fan-out
//! broadcast channel so a closed client and a closed channel both end the
//! task cleanly (§9 "Coroutine control flow" — one structured-concurrency
//! scope owns both halves).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use crate::bus::{HealthEvent, ProgressEvent, HEALTH_CHANNEL};
use crate::domain::job::JobState;
use crate::store::TaskStoreError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/jobs/{task_id}", get(job_socket)).route("/ws/system/health", get(health_socket))
}

fn progress_channel(task_id: Uuid) -> String {
    format!("progress:task:{task_id}")
}

async fn job_socket(State(state): State<AppState>, Path(task_id): Path<Uuid>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_job_socket(socket, state, task_id))
}

async fn handle_job_socket(mut socket: WebSocket, state: AppState, task_id: Uuid) {
    let job = match state.task_store.get(task_id).await {
        Ok(job) => job,
        Err(TaskStoreError::NotFound(_)) => {
            let _ = socket.close().await;
            return;
        }
        Err(_) => {
            let _ = socket.close().await;
            return;
        }
    };

    if send_event(&mut socket, &ProgressEvent::Subscribed { job_id: task_id, ts: Utc::now() }).await.is_err() {
        return;
    }

    let status_event = ProgressEvent::TaskStatus {
        job_id: task_id,
        status: job.state.to_string(),
        progress: job.progress,
        step: job.step.clone(),
        ts: Utc::now(),
    };
    if send_event(&mut socket, &status_event).await.is_err() {
        return;
    }

    // Subscribe before checking terminal state: if the job completes
    // between the `get` above and here, we still observe that event
    // rather than hanging forever on a job that's already done.
    let mut receiver = state.progress_bus.subscribe(&progress_channel(task_id));

    if job.state.is_terminal() {
        let synthetic = terminal_event_for(&job);
        let _ = send_event(&mut socket, &synthetic).await;
        let _ = socket.close().await;
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                            if value.get("type").and_then(|t| t.as_str()) == Some("ping")
                                && send_event(&mut socket, &ProgressEvent::Pong { ts: Utc::now() }).await.is_err()
                            {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }

    let _ = socket.close().await;
}

fn terminal_event_for(job: &crate::domain::job::Job) -> ProgressEvent {
    match job.state {
        JobState::Completed => ProgressEvent::TaskComplete {
            job_id: job.task_id,
            elapsed_s: job.elapsed_seconds().unwrap_or(0.0),
            result_summary: job.result_summary(),
            ts: Utc::now(),
        },
        _ => {
            let error_kind = job.error_kind.unwrap_or(crate::error::ErrorKind::StoreUnavailable);
            ProgressEvent::TaskError {
                job_id: job.task_id,
                error: job.error.clone().unwrap_or_else(|| "task did not complete".to_string()),
                error_type: error_kind.to_string(),
                suggestion: error_kind.suggestion(),
                ts: Utc::now(),
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ProgressEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}

async fn health_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_health_socket(socket, state))
}

async fn handle_health_socket(mut socket: WebSocket, state: AppState) {
    let mut receiver = state.health_bus.subscribe(HEALTH_CHANNEL);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        if send_health_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }

    let _ = socket.close().await;
}

async fn send_health_event(socket: &mut WebSocket, event: &HealthEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::Job;

    fn sample_job(state: JobState) -> Job {
        Job {
            task_id: Uuid::new_v4(),
            kind: "template_parse".to_string(),
            related_id: Uuid::new_v4(),
            state,
            progress: 100,
            step: None,
            result: Some(serde_json::json!({"metadata": {"total_fixed_sections": 2, "total_fillable_sections": 3}})),
            error: Some("boom".to_string()),
            error_kind: Some(crate::error::ErrorKind::ProviderError),
            cost_usd: 0.0,
            tokens_in: 0,
            tokens_out: 0,
            duration_s: Some(1.0),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            creator_id: "user-1".to_string(),
            provider_id: None,
            provider_name: None,
            model: None,
            trace_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn completed_job_yields_task_complete() {
        let job = sample_job(JobState::Completed);
        let event = terminal_event_for(&job);
        assert!(event.is_terminal());
        assert!(matches!(event, ProgressEvent::TaskComplete { .. }));
    }

    #[test]
    fn failed_job_yields_task_error_with_its_error_kind() {
        let job = sample_job(JobState::Failed);
        match terminal_event_for(&job) {
            ProgressEvent::TaskError { error_type, .. } => assert_eq!(error_type, "provider_error"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
