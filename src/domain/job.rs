//! Job domain model (§3.1 "Job") and the state machine it obeys (§4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three document-analysis job kinds the fabric dispatches.
///
/// Modeled as a tagged variant rather than a duck-typed payload map so the
/// worker dispatches on the tag instead of reflecting on runtime shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    TemplateParse {
        template_file_id: Uuid,
        file_path: String,
        original_filename: String,
    },
    TemplateEdit {
        template_id: Uuid,
        edit_instructions: String,
    },
    TemplateReview {
        template_id: Uuid,
    },
}

impl JobKind {
    /// The work-log stream name this kind is dispatched on (§4.2).
    #[must_use]
    pub fn stream_name(&self) -> &'static str {
        match self {
            Self::TemplateParse { .. } => "template:parse",
            Self::TemplateEdit { .. } => "template:edit",
            Self::TemplateReview { .. } => "template:review",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::TemplateParse { .. } => "parse",
            Self::TemplateEdit { .. } => "edit",
            Self::TemplateReview { .. } => "review",
        }
    }
}

/// Job lifecycle state (§4.1). Transitions are enforced by the store via a
/// single compare-and-set update, never by an in-memory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an allowed edge of the §4.1 state machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A durable row-per-job record (§3.1 "Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub task_id: Uuid,
    pub kind: String,
    pub related_id: Uuid,
    pub state: JobState,
    pub progress: u8,
    pub step: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub cost_usd: f64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub duration_s: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub creator_id: String,
    pub provider_id: Option<Uuid>,
    pub provider_name: Option<String>,
    pub model: Option<String>,
    pub trace_id: Uuid,
}

impl Job {
    /// Human-readable summary of the result, used on the `task_complete`
    /// progress event and in the subscribe-after-completion synthetic event
    /// (§4.3, §8 scenario 5).
    #[must_use]
    pub fn result_summary(&self) -> Option<serde_json::Value> {
        self.result.as_ref().map(|r| {
            serde_json::json!({
                "total_fixed_sections": r.get("metadata").and_then(|m| m.get("total_fixed_sections")),
                "total_fillable_sections": r.get("metadata").and_then(|m| m.get("total_fillable_sections")),
            })
        })
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        self.started_at.map(|s| (end - s).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_edges_match_state_machine() {
        assert!(JobState::Pending.can_transition_to(JobState::Processing));
        assert!(JobState::Pending.can_transition_to(JobState::Cancelled));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Processing.can_transition_to(JobState::Completed));
        assert!(JobState::Processing.can_transition_to(JobState::Failed));
        assert!(JobState::Processing.can_transition_to(JobState::Cancelled));
    }

    #[test]
    fn disallowed_edges_are_rejected() {
        assert!(!JobState::Completed.can_transition_to(JobState::Processing));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Processing));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }

    #[test]
    fn stream_name_per_kind() {
        let parse = JobKind::TemplateParse {
            template_file_id: Uuid::new_v4(),
            file_path: "f.docx".into(),
            original_filename: "f.docx".into(),
        };
        assert_eq!(parse.stream_name(), "template:parse");
    }
}
