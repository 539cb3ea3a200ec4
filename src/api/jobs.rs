//! Submit/inspect API (§6.1): `POST /jobs/{kind}`, `GET /jobs/{task_id}`,
//! `GET /jobs`, `POST /jobs/{task_id}/cancel`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobState};
use crate::store::{ListFilter, NewJob, TaskStoreError};
use crate::AppState;

use super::{error_response, ErrorBody};

/// Header the caller supplies to make a submit idempotent (§6.1, §8 law C).
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// Bounded window within which a repeat submit returns the prior `task_id`.
const IDEMPOTENCY_TTL_SECS: u64 = 86_400;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{kind}", post(submit_job))
        .route("/jobs/{task_id}", get(get_job))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{task_id}/cancel", post(cancel_job))
}

/// Job-kind-specific fields, distinct per path segment. The common
/// envelope (`related_id`, `creator_id`, `trace_id`, `provider`) rides
/// alongside in the same JSON body.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubmitPayload {
    Parse {
        template_file_id: Uuid,
        file_path: String,
        original_filename: String,
        #[serde(default)]
        iso_standard: Option<String>,
        #[serde(default)]
        custom_rules: Option<String>,
    },
    Edit { template_id: Uuid, edit_instructions: String },
    Review { template_id: Uuid },
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    related_id: Uuid,
    creator_id: String,
    trace_id: Option<Uuid>,
    provider: Option<String>,
    #[serde(flatten)]
    payload: SubmitPayload,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: Uuid,
    status: &'static str,
    message: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn submit_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, Json<ErrorBody>)> {
    let stream = match (kind.as_str(), &request.payload) {
        ("parse", SubmitPayload::Parse { .. }) => "template:parse",
        ("edit", SubmitPayload::Edit { .. }) => "template:edit",
        ("review", SubmitPayload::Review { .. }) => "template:review",
        _ => {
            return Err(error_response(
                crate::error::ErrorKind::ParseExtractFailed,
                format!("job kind '{kind}' does not match its payload shape"),
            ))
        }
    };

    let idempotency_key = headers.get(IDEMPOTENCY_KEY_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    let task_id = Uuid::new_v4();
    if let Some(key) = &idempotency_key {
        match state.work_log.idempotency_put_if_absent(key, task_id, IDEMPOTENCY_TTL_SECS).await {
            Ok(None) => {}
            Ok(Some(existing_task_id)) => {
                let job = state
                    .task_store
                    .get(existing_task_id)
                    .await
                    .map_err(|e| error_response(e.kind(), e.to_string()))?;
                return Ok((StatusCode::ACCEPTED, Json(submit_response(&job))));
            }
            Err(e) => return Err(error_response(e.kind(), e.to_string())),
        }
    }

    let new_job = NewJob {
        kind: kind.clone(),
        related_id: request.related_id,
        creator_id: request.creator_id,
        provider_id: None,
        provider_name: request.provider.clone(),
        model: None,
        trace_id: request.trace_id.unwrap_or(task_id),
    };

    state
        .task_store
        .create_with_id(task_id, new_job)
        .await
        .map_err(|e| error_response(e.kind(), e.to_string()))?;

    let mut message: HashMap<String, String> = HashMap::new();
    message.insert("task_id".to_string(), task_id.to_string());
    match request.payload {
        SubmitPayload::Parse { template_file_id, file_path, original_filename, iso_standard, custom_rules } => {
            message.insert("template_file_id".to_string(), template_file_id.to_string());
            message.insert("file_path".to_string(), file_path);
            message.insert("original_filename".to_string(), original_filename);
            if let Some(iso_standard) = iso_standard {
                message.insert("iso_standard".to_string(), iso_standard);
            }
            if let Some(custom_rules) = custom_rules {
                message.insert("custom_rules".to_string(), custom_rules);
            }
        }
        SubmitPayload::Edit { template_id, edit_instructions } => {
            message.insert("template_id".to_string(), template_id.to_string());
            message.insert("edit_instructions".to_string(), edit_instructions);
        }
        SubmitPayload::Review { template_id } => {
            message.insert("template_id".to_string(), template_id.to_string());
        }
    }

    state
        .work_log
        .append(stream, &message)
        .await
        .map_err(|e| error_response(e.kind(), e.to_string()))?;

    let job = state.task_store.get(task_id).await.map_err(|e| error_response(e.kind(), e.to_string()))?;
    Ok((StatusCode::ACCEPTED, Json(submit_response(&job))))
}

fn submit_response(job: &Job) -> SubmitResponse {
    SubmitResponse {
        task_id: job.task_id,
        status: "pending",
        message: "task submitted".to_string(),
        created_at: job.created_at,
    }
}

async fn get_job(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Result<Json<Job>, (StatusCode, Json<ErrorBody>)> {
    state.task_store.get(task_id).await.map(Json).map_err(|e| error_response(e.kind(), e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<JobState>,
    kind: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<Vec<Job>>, (StatusCode, Json<ErrorBody>)> {
    let filter = ListFilter { status: query.status, kind: query.kind };
    state
        .task_store
        .list(filter, query.limit, query.offset)
        .await
        .map(Json)
        .map_err(|e| error_response(e.kind(), e.to_string()))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    task_id: Uuid,
    status: JobState,
}

async fn cancel_job(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Result<Json<CancelResponse>, (StatusCode, Json<ErrorBody>)> {
    match state.task_store.cancel(task_id).await {
        Ok(job) => Ok(Json(CancelResponse { task_id: job.task_id, status: job.state })),
        Err(TaskStoreError::StateConflict(task_id)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error_type: crate::error::ErrorKind::TaskAlreadyTerminal.to_string(),
                message: "already terminal".to_string(),
                suggestion: crate::error::ErrorKind::TaskAlreadyTerminal.suggestion(),
                task_id: Some(task_id),
            }),
        )),
        Err(e) => Err(error_response(e.kind(), e.to_string())),
    }
}
