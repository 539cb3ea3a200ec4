//! Template and template-version domain model (§3.1, C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Approved,
    Archived,
}

/// A fixed (customer-invariant) region of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedSection {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
}

/// A customer-specific, fillable region of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillableSection {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub semantic_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mandatory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory_confidence: Option<f64>,
}

/// The parsed structure of a template document (glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStructure {
    pub document_title: String,
    pub fixed_sections: Vec<FixedSection>,
    pub fillable_sections: Vec<FillableSection>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TemplateStructure {
    /// Diff two structures into the `±N fillable / ±N fixed / ±N mandatory /
    /// ±N tags` change summary used by `update_structure` (§4.7), or
    /// `"Minor edits"` if nothing countable changed.
    #[must_use]
    pub fn diff_summary(&self, previous: &Self) -> String {
        let d_fillable = self.fillable_sections.len() as i64 - previous.fillable_sections.len() as i64;
        let d_fixed = self.fixed_sections.len() as i64 - previous.fixed_sections.len() as i64;

        let mandatory_count = |s: &Self| s.fillable_sections.iter().filter(|f| f.is_mandatory == Some(true)).count() as i64;
        let d_mandatory = mandatory_count(self) - mandatory_count(previous);

        let tag_count = |s: &Self| s.fillable_sections.iter().map(|f| f.semantic_tags.len()).sum::<usize>() as i64;
        let d_tags = tag_count(self) - tag_count(previous);

        let mut parts = Vec::new();
        if d_fillable != 0 {
            parts.push(format!("{d_fillable:+} fillable"));
        }
        if d_fixed != 0 {
            parts.push(format!("{d_fixed:+} fixed"));
        }
        if d_mandatory != 0 {
            parts.push(format!("{d_mandatory:+} mandatory"));
        }
        if d_tags != 0 {
            parts.push(format!("{d_tags:+} tags"));
        }

        if parts.is_empty() {
            "Minor edits".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Current, mutable record of a template (§3.1 "Template").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: Uuid,
    pub name: String,
    pub iso_standard: Option<String>,
    pub file_id: Option<Uuid>,
    pub structure: TemplateStructure,
    pub version_number: i32,
    pub restored_from_version: Option<i32>,
    pub total_fixed: i32,
    pub total_fillable: i32,
    pub tags: Vec<String>,
    pub status: TemplateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// An immutable snapshot row in the version history (§3.1, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub id: Uuid,
    pub template_id: Uuid,
    pub version_number: i32,
    pub structure_snapshot: TemplateStructure,
    pub change_summary: String,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub restored_from_version: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(fillable: usize, fixed: usize) -> TemplateStructure {
        TemplateStructure {
            document_title: "t".into(),
            fixed_sections: (0..fixed)
                .map(|i| FixedSection {
                    id: format!("fx{i}"),
                    title: "x".into(),
                    content: "c".into(),
                    section_type: None,
                })
                .collect(),
            fillable_sections: (0..fillable)
                .map(|i| FillableSection {
                    id: format!("fl{i}"),
                    title: "x".into(),
                    kind: "field".into(),
                    semantic_tags: vec!["a".into()],
                    placeholder: None,
                    is_mandatory: None,
                    mandatory_confidence: None,
                })
                .collect(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn diff_summary_reports_counts() {
        let prev = structure(2, 1);
        let next = structure(3, 1);
        assert_eq!(next.diff_summary(&prev), "+1 fillable");
    }

    #[test]
    fn diff_summary_falls_back_to_minor_edits() {
        let prev = structure(2, 1);
        let next = structure(2, 1);
        assert_eq!(next.diff_summary(&prev), "Minor edits");
    }
}
