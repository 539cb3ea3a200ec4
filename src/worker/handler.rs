//! Per-message handler protocol (§4.4), keyed by `task_id` and idempotent:
//! redelivery of an already-terminal or already-claimed job is a no-op.

use chrono::Utc;
use uuid::Uuid;

use crate::bus::ProgressEvent;
use crate::domain::job::JobState;
use crate::error::ErrorKind;
use crate::pipeline;
use crate::queue::JobMessage;
use crate::store::TaskStoreError;
use crate::telemetry;
use crate::AppState;

const CONSUMER_GROUP: &str = "workers";

/// Handle one delivered message. Returns `Ok(())` whenever the message was
/// acked (including "nothing to do" no-ops); returns `Err` only for the
/// unrecoverable infrastructure case where the message must NOT be acked
/// so the visibility timeout redelivers it.
pub async fn handle_message(state: &AppState, stream: &str, message: &JobMessage, worker_id: &str) -> anyhow::Result<()> {
    let task_id = message.task_id;

    // Step 1: idempotent no-op on an already-terminal job.
    let job = match state.task_store.get(task_id).await {
        Ok(job) => job,
        Err(TaskStoreError::NotFound(_)) => {
            state.work_log.ack(stream, CONSUMER_GROUP, &message.msg_id).await?;
            return Ok(());
        }
        Err(e @ TaskStoreError::Unavailable(_)) => {
            // Do not ack: let the visibility timeout redeliver once C1 recovers.
            return Err(e.into());
        }
        Err(e @ TaskStoreError::StateConflict(_)) => return Err(e.into()),
    };

    if job.state.is_terminal() {
        state.work_log.ack(stream, CONSUMER_GROUP, &message.msg_id).await?;
        return Ok(());
    }

    // Step 2: claim.
    let job = match state.task_store.claim(task_id).await {
        Ok(job) => job,
        Err(TaskStoreError::StateConflict(_)) => {
            state.work_log.ack(stream, CONSUMER_GROUP, &message.msg_id).await?;
            return Ok(());
        }
        Err(e @ TaskStoreError::Unavailable(_)) => return Err(e.into()),
        Err(e) => return Err(e.into()),
    };

    telemetry::emit("operation.started", Some(job.trace_id), Some(task_id), None, serde_json::json!({"worker_id": worker_id}));

    // Step 3: initial progress tick.
    let _ = state.task_store.update(task_id, Some(0), Some("initializing".to_string())).await;
    publish_progress(state, task_id, 0, "initializing", None);

    // Step 4: run the pipeline.
    let provider_name = job.provider_name.clone().unwrap_or_else(|| "anthropic".to_string());
    let model = job.model.clone().unwrap_or_else(|| "claude-sonnet-4-5".to_string());

    let result = run_pipeline_for(state, stream, task_id, job.trace_id, &message.payload, &provider_name, &model).await;

    match result {
        Ok((structure, usage, warnings)) => {
            if !warnings.is_empty() {
                tracing::warn!(task_id = %task_id, warnings = ?warnings, "template validated with semantic warnings");
            }
            let result_json = serde_json::to_value(&structure).unwrap_or_else(|_| serde_json::json!({}));
            state
                .task_store
                .complete(task_id, result_json.clone(), usage.cost_usd, usage.tokens_in, usage.tokens_out)
                .await?;

            let completed = state.task_store.get(task_id).await?;
            state.progress_bus.publish(
                &progress_channel(task_id),
                ProgressEvent::TaskComplete {
                    job_id: task_id,
                    elapsed_s: completed.elapsed_seconds().unwrap_or(0.0),
                    result_summary: completed.result_summary(),
                    ts: Utc::now(),
                },
            );
            telemetry::emit("operation.completed", Some(job.trace_id), Some(task_id), None, serde_json::json!({"cost_usd": usage.cost_usd}));
            state.work_log.ack(stream, CONSUMER_GROUP, &message.msg_id).await?;
        }
        // The task moved to `Cancelled` out from under this worker (§4.4):
        // ack without calling `fail()` so C1's `Cancelled` state is not
        // overwritten, and without publishing `task_error`.
        Err((ErrorKind::Cancelled, _)) => {
            tracing::info!(task_id = %task_id, "pipeline aborted: task was cancelled");
            state.work_log.ack(stream, CONSUMER_GROUP, &message.msg_id).await?;
        }
        Err(kind) => {
            let (error_kind, message_text) = kind;
            state.task_store.fail(task_id, message_text.clone(), error_kind).await?;
            state.progress_bus.publish(
                &progress_channel(task_id),
                ProgressEvent::TaskError {
                    job_id: task_id,
                    error: message_text,
                    error_type: error_kind.to_string(),
                    suggestion: error_kind.suggestion(),
                    ts: Utc::now(),
                },
            );
            telemetry::emit("operation.failed", Some(job.trace_id), Some(task_id), None, serde_json::json!({"error_kind": error_kind.to_string()}));
            state.work_log.ack(stream, CONSUMER_GROUP, &message.msg_id).await?;
        }
    }

    Ok(())
}

fn progress_channel(task_id: Uuid) -> String {
    format!("progress:task:{task_id}")
}

fn publish_progress(state: &AppState, task_id: Uuid, progress: u8, step: &str, elapsed_s: Option<f64>) {
    state.progress_bus.publish(
        &progress_channel(task_id),
        ProgressEvent::ProgressUpdate {
            job_id: task_id,
            progress,
            step: Some(step.to_string()),
            elapsed_s,
            eta_s: elapsed_s.and_then(|e| ProgressEvent::estimate_eta_seconds(e, progress)),
            details: None,
            ts: Utc::now(),
        },
    );
}

/// Threads pipeline checkpoints (§4.4 step 4) out to C1 and C3: each call
/// both updates the task row's `progress`/`step` and publishes a
/// `progress_update` event on the job's progress channel.
struct TaskProgressReporter<'a> {
    state: &'a AppState,
    task_id: Uuid,
}

#[async_trait::async_trait]
impl pipeline::ProgressReporter for TaskProgressReporter<'_> {
    async fn report(&self, progress: u8, step: &str) {
        let _ = self.state.task_store.update(self.task_id, Some(progress), Some(step.to_string())).await;
        publish_progress(self.state, self.task_id, progress, step, None);
    }
}

/// Run the agent pipeline for whichever kind this stream carries, using
/// the message payload for the kind-specific inputs. Returns the
/// classified failure as `(ErrorKind, message)` on error so the caller can
/// fail the job and publish `task_error` without further matching.
async fn run_pipeline_for(
    state: &AppState,
    stream: &str,
    task_id: Uuid,
    trace_id: Uuid,
    payload: &std::collections::HashMap<String, String>,
    provider_name: &str,
    model: &str,
) -> Result<(crate::domain::template::TemplateStructure, pipeline::UsageTotals, Vec<String>), (ErrorKind, String)> {
    let self_healing = state.config.worker.enable_template_self_healing;
    let reporter = TaskProgressReporter { state, task_id };
    let run_ctx = pipeline::PipelineRun { task_store: &state.task_store, task_id, trace_id, reporter: &reporter };

    match stream {
        "template:parse" => {
            let file_path = payload.get("file_path").cloned().unwrap_or_default();
            let original_filename = payload.get("original_filename").cloned().unwrap_or_default();
            let iso_standard = payload.get("iso_standard").cloned();
            let custom_rules = payload.get("custom_rules").cloned();
            let path = std::path::Path::new(&file_path);

            pipeline::run_parse(
                &run_ctx,
                &state.gateway,
                provider_name,
                model,
                path,
                &original_filename,
                iso_standard.as_deref(),
                custom_rules.as_deref(),
                self_healing,
            )
            .await
            .map(|outcome| (outcome.structure, outcome.usage, outcome.warnings))
            .map_err(|e| (e.kind(), e.to_string()))
        }
        "template:edit" | "template:review" => {
            let template_id = payload
                .get("template_id")
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| (ErrorKind::ParseExtractFailed, "missing template_id in job message".to_string()))?;

            let template = state
                .version_store
                .get_template(template_id)
                .await
                .map_err(|e| (e.kind(), e.to_string()))?;

            let document_text = serde_json::to_string_pretty(&template.structure).unwrap_or_default();
            let instructions = payload.get("edit_instructions").cloned().unwrap_or_default();
            let prompt = format!("{instructions}\n\nCurrent structure:\n{document_text}");

            pipeline::run(&run_ctx, &state.gateway, provider_name, model, &prompt, template.iso_standard.as_deref(), None, self_healing)
                .await
                .map(|outcome| (outcome.structure, outcome.usage, outcome.warnings))
                .map_err(|e| (e.kind(), e.to_string()))
        }
        other => Err((ErrorKind::ParseExtractFailed, format!("unknown stream {other}"))),
    }
}
