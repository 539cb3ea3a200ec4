//! Structural and semantic validation of a parsed [`TemplateStructure`].
//!
//! Grounded on the reference template validator: structural checks are
//! hard failures (`validation_failed`); semantic checks are warnings that
//! are reported but do not block the pipeline.

use crate::domain::template::TemplateStructure;

const ALLOWED_FILLABLE_TYPES: &[&str] = &["table", "paragraph", "list", "field"];
const MAX_SECTIONS: usize = 150;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structural validation: required fields and well-formed types. A
/// non-empty error list means the structure must be rejected outright
/// (`validation_failed`).
#[must_use]
pub fn validate_structural(structure: &TemplateStructure) -> Vec<String> {
    let mut errors = Vec::new();

    if structure.document_title.trim().is_empty() {
        errors.push("document_title is required".to_string());
    }

    for section in &structure.fixed_sections {
        if section.id.trim().is_empty() {
            errors.push("fixed section missing id".to_string());
        }
        if section.title.trim().is_empty() {
            errors.push(format!("fixed section {} missing title", section.id));
        }
        if section.content.trim().is_empty() {
            errors.push(format!("fixed section {} missing content", section.id));
        }
    }

    for section in &structure.fillable_sections {
        if section.id.trim().is_empty() {
            errors.push("fillable section missing id".to_string());
        }
        if section.title.trim().is_empty() {
            errors.push(format!("fillable section {} missing title", section.id));
        }
        if !ALLOWED_FILLABLE_TYPES.contains(&section.kind.as_str()) {
            errors.push(format!("fillable section {} has invalid type '{}'", section.id, section.kind));
        }
        if section.semantic_tags.is_empty() {
            errors.push(format!("fillable section {} missing semantic_tags", section.id));
        }
        if let Some(confidence) = section.mandatory_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                errors.push(format!("fillable section {} has mandatory_confidence out of [0,1]", section.id));
            }
        }
    }

    errors
}

/// Semantic validation: plausibility checks that warn but never block.
#[must_use]
pub fn validate_semantic(structure: &TemplateStructure) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut seen_ids = std::collections::HashSet::new();
    let all_ids = structure
        .fixed_sections
        .iter()
        .map(|s| s.id.as_str())
        .chain(structure.fillable_sections.iter().map(|s| s.id.as_str()));
    for id in all_ids {
        if !seen_ids.insert(id) {
            warnings.push(format!("duplicate section id '{id}'"));
        }
    }

    for section in &structure.fillable_sections {
        if section.is_mandatory == Some(true) && section.mandatory_confidence.unwrap_or(0.0) < 0.85 {
            warnings.push(format!(
                "fillable section {} marked mandatory with low confidence ({:.2})",
                section.id,
                section.mandatory_confidence.unwrap_or(0.0)
            ));
        }
        if section.semantic_tags.is_empty() {
            warnings.push(format!("fillable section {} has no semantic_tags", section.id));
        }
    }

    let total = structure.fixed_sections.len() + structure.fillable_sections.len();
    if total == 0 {
        warnings.push("template has zero sections".to_string());
    } else if total > MAX_SECTIONS {
        warnings.push(format!("template has {total} sections, exceeding the usual maximum of {MAX_SECTIONS}"));
    }

    warnings
}

#[must_use]
pub fn validate(structure: &TemplateStructure) -> ValidationReport {
    ValidationReport { errors: validate_structural(structure), warnings: validate_semantic(structure) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::{FillableSection, FixedSection};

    fn valid_structure() -> TemplateStructure {
        TemplateStructure {
            document_title: "Doc".into(),
            fixed_sections: vec![FixedSection { id: "fx1".into(), title: "Intro".into(), content: "text".into(), section_type: None }],
            fillable_sections: vec![FillableSection {
                id: "fl1".into(),
                title: "Name".into(),
                kind: "field".into(),
                semantic_tags: vec!["party_name".into()],
                placeholder: None,
                is_mandatory: Some(true),
                mandatory_confidence: Some(0.95),
            }],
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn valid_structure_has_no_errors() {
        let report = validate(&valid_structure());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_document_title_is_a_structural_error() {
        let mut s = valid_structure();
        s.document_title = String::new();
        assert!(!validate_structural(&s).is_empty());
    }

    #[test]
    fn invalid_fillable_type_is_rejected() {
        let mut s = valid_structure();
        s.fillable_sections[0].kind = "bogus".into();
        let errors = validate_structural(&s);
        assert!(errors.iter().any(|e| e.contains("invalid type")));
    }

    #[test]
    fn low_confidence_mandatory_is_a_warning_not_an_error() {
        let mut s = valid_structure();
        s.fillable_sections[0].mandatory_confidence = Some(0.5);
        assert!(validate_structural(&s).is_empty());
        let warnings = validate_semantic(&s);
        assert!(warnings.iter().any(|w| w.contains("low confidence")));
    }

    #[test]
    fn duplicate_ids_are_flagged() {
        let mut s = valid_structure();
        let dup = FillableSection {
            id: "fx1".into(),
            title: "Dup".into(),
            kind: "field".into(),
            semantic_tags: vec!["x".into()],
            placeholder: None,
            is_mandatory: None,
            mandatory_confidence: None,
        };
        s.fillable_sections.push(dup);
        let warnings = validate_semantic(&s);
        assert!(warnings.iter().any(|w| w.contains("duplicate")));
    }
}
