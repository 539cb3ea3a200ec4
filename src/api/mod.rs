//! HTTP and WebSocket surface (§6).

pub mod health;
pub mod jobs;
pub mod ws;

use axum::http::StatusCode;
use axum::Json;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new().merge(health::router()).merge(jobs::router()).merge(ws::router())
}

/// Wire shape for every non-2xx response (§7 "User-visible messages").
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_type: String,
    pub message: String,
    pub suggestion: &'static str,
    pub task_id: Option<Uuid>,
}

/// Map a classified [`ErrorKind`] to its HTTP status and wire body.
#[must_use]
pub fn error_response(kind: ErrorKind, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    let status = match kind {
        ErrorKind::TaskNotFound | ErrorKind::FileNotFound => StatusCode::NOT_FOUND,
        ErrorKind::StateConflict | ErrorKind::TaskAlreadyTerminal | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::QuotaExhausted => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::FileUnreadable
        | ErrorKind::UnsupportedFileType
        | ErrorKind::PayloadTooLarge
        | ErrorKind::ParseExtractFailed
        | ErrorKind::MalformedJson
        | ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
        ErrorKind::RateLimited | ErrorKind::ProviderTimeout | ErrorKind::NetworkDown | ErrorKind::StoreUnavailable | ErrorKind::QueueUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::ProviderError | ErrorKind::WorkerTimeout => StatusCode::BAD_GATEWAY,
    };

    (
        status,
        Json(ErrorBody { error_type: kind.to_string(), message: message.into(), suggestion: kind.suggestion(), task_id: None }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_not_found_maps_to_404() {
        let (status, _) = error_response(ErrorKind::TaskNotFound, "nope");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn quota_exhausted_maps_to_402() {
        let (status, _) = error_response(ErrorKind::QuotaExhausted, "over budget");
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn store_unavailable_maps_to_503() {
        let (status, _) = error_response(ErrorKind::StoreUnavailable, "db down");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
