//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the fabric eventually resolves to one of
//! these kinds so that the HTTP/WS surface, the telemetry envelope and the
//! progress bus can all report failures with a stable vocabulary instead of
//! ad hoc strings.

use thiserror::Error;

/// Stable error kind, mirrored onto the wire as `error_type` on progress
/// and task-failure payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Input
    FileNotFound,
    FileUnreadable,
    UnsupportedFileType,
    PayloadTooLarge,
    // Pipeline
    ParseExtractFailed,
    MalformedJson,
    ValidationFailed,
    // Gateway
    RateLimited,
    ProviderTimeout,
    ProviderError,
    NetworkDown,
    QuotaExhausted,
    // Auth/authorization (surfaced only; issuance is out of scope)
    Unauthorized,
    Forbidden,
    // Concurrency
    StateConflict,
    TaskNotFound,
    TaskAlreadyTerminal,
    // Reaper (§4.8) — no worker reported progress within the timeout window
    WorkerTimeout,
    // Cancellation (§4.4, §7) — the task moved to `Cancelled` while a
    // worker held it; not a failure, just an abandoned run.
    Cancelled,
    // Infrastructure
    StoreUnavailable,
    QueueUnavailable,
}

impl ErrorKind {
    /// A short, user-facing suggestion for how to respond to this error.
    ///
    /// Carried from the reference progress publisher's per-`error_type`
    /// suggestion table.
    #[must_use]
    pub fn suggestion(self) -> &'static str {
        match self {
            Self::FileNotFound | Self::FileUnreadable | Self::UnsupportedFileType | Self::PayloadTooLarge => {
                "Please ensure the file was uploaded correctly and try again."
            }
            Self::RateLimited
            | Self::ProviderTimeout
            | Self::NetworkDown
            | Self::ProviderError => {
                "The AI service is temporarily unavailable. Your task will be retried automatically."
            }
            Self::ParseExtractFailed | Self::MalformedJson | Self::ValidationFailed => {
                "There was an issue parsing your document. Please verify it's a valid source file."
            }
            Self::QuotaExhausted => "This task exceeded its cost budget and was stopped.",
            Self::Unauthorized => "Authentication is required for this operation.",
            Self::Forbidden => "You do not have permission to perform this operation.",
            Self::StateConflict | Self::TaskAlreadyTerminal => {
                "This task has already moved past the requested state."
            }
            Self::Cancelled => "This task was cancelled before it finished.",
            Self::TaskNotFound => "No task was found with that identifier.",
            Self::WorkerTimeout => "This task was automatically stopped because no worker reported progress in time.",
            Self::StoreUnavailable | Self::QueueUnavailable => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ProviderTimeout | Self::NetworkDown | Self::StoreUnavailable | Self::QueueUnavailable
        )
    }

    /// `true` for anything the reaper itself assigns: the job is already
    /// terminal by the time this kind is recorded, so resubmission (not
    /// automatic retry) is the only path forward.
    #[must_use]
    pub fn is_reaper_assigned(self) -> bool {
        matches!(self, Self::WorkerTimeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "{s}")
    }
}

/// Top-level fabric error.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("{kind}: {message}")]
    Domain { kind: ErrorKind, message: String },

    #[error("task store error: {0}")]
    Store(#[from] crate::store::TaskStoreError),

    #[error("work log error: {0}")]
    Queue(#[from] crate::queue::WorkLogError),

    #[error("llm gateway error: {0}")]
    Gateway(#[from] crate::llm::GatewayError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FabricError {
    #[must_use]
    pub fn domain(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            message: message.into(),
        }
    }

    /// Best-effort mapping to the stable [`ErrorKind`] vocabulary, used when
    /// surfacing an error on the progress bus or in an HTTP response.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain { kind, .. } => *kind,
            Self::Store(e) => e.kind(),
            Self::Queue(e) => e.kind(),
            Self::Gateway(e) => e.kind(),
            Self::Pipeline(e) => e.kind(),
            Self::Other(_) => ErrorKind::StoreUnavailable,
        }
    }
}

pub type FabricResult<T> = Result<T, FabricError>;
