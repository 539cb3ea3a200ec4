//! Template version store (C7) — snapshot-per-version, restore-as-new-version.
//!
//! Invariants (§4.7, §8 property 4/5): every current template structure
//! equals the snapshot of the version row sharing its `version_number`;
//! version rows are immutable; `version_number` increases strictly with no
//! gaps per template.

use chrono::Utc;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::template::{Template, TemplateStatus, TemplateStructure, TemplateVersion};
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum VersionStoreError {
    #[error("template {0} not found")]
    NotFound(Uuid),
    #[error("version {1} of template {0} not found")]
    VersionNotFound(Uuid, i32),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl VersionStoreError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::VersionNotFound(..) => ErrorKind::TaskNotFound,
            Self::Unavailable(_) => ErrorKind::StoreUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, VersionStoreError>;

#[derive(Debug, FromRow)]
struct TemplateRow {
    template_id: Uuid,
    name: String,
    iso_standard: Option<String>,
    file_id: Option<Uuid>,
    structure: serde_json::Value,
    version_number: i32,
    restored_from_version: Option<i32>,
    total_fixed: i32,
    total_fillable: i32,
    tags: Vec<String>,
    status: String,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    approved_at: Option<chrono::DateTime<Utc>>,
}

impl TemplateRow {
    fn into_template(self) -> Template {
        Template {
            template_id: self.template_id,
            name: self.name,
            iso_standard: self.iso_standard,
            file_id: self.file_id,
            structure: serde_json::from_value(self.structure).unwrap_or_else(|_| TemplateStructure {
                document_title: String::new(),
                fixed_sections: Vec::new(),
                fillable_sections: Vec::new(),
                metadata: serde_json::json!({}),
            }),
            version_number: self.version_number,
            restored_from_version: self.restored_from_version,
            total_fixed: self.total_fixed,
            total_fillable: self.total_fillable,
            tags: self.tags,
            status: match self.status.as_str() {
                "approved" => TemplateStatus::Approved,
                "archived" => TemplateStatus::Archived,
                _ => TemplateStatus::Draft,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            approved_at: self.approved_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct VersionRow {
    id: Uuid,
    template_id: Uuid,
    version_number: i32,
    structure_snapshot: serde_json::Value,
    change_summary: String,
    notes: Option<String>,
    created_by: String,
    created_at: chrono::DateTime<Utc>,
    restored_from_version: Option<i32>,
}

impl VersionRow {
    fn into_version(self) -> TemplateVersion {
        TemplateVersion {
            id: self.id,
            template_id: self.template_id,
            version_number: self.version_number,
            structure_snapshot: serde_json::from_value(self.structure_snapshot).unwrap_or_else(|_| TemplateStructure {
                document_title: String::new(),
                fixed_sections: Vec::new(),
                fillable_sections: Vec::new(),
                metadata: serde_json::json!({}),
            }),
            change_summary: self.change_summary,
            notes: self.notes,
            created_by: self.created_by,
            created_at: self.created_at,
            restored_from_version: self.restored_from_version,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersionStore {
    pool: PgPool,
}

impl VersionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `create_initial(template_fields, initial_structure, creator) -> template_id`.
    pub async fn create_initial(
        &self,
        name: &str,
        iso_standard: Option<&str>,
        file_id: Option<Uuid>,
        structure: &TemplateStructure,
        creator: &str,
    ) -> Result<Uuid> {
        let template_id = Uuid::new_v4();
        let structure_json = serde_json::to_value(structure).expect("TemplateStructure always serializes");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO templates
                (template_id, name, iso_standard, file_id, structure, version_number,
                 total_fixed, total_fillable, tags, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7, '{}', 'draft', now(), now())
            ",
        )
        .bind(template_id)
        .bind(name)
        .bind(iso_standard)
        .bind(file_id)
        .bind(&structure_json)
        .bind(structure.fixed_sections.len() as i32)
        .bind(structure.fillable_sections.len() as i32)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO template_versions
                (id, template_id, version_number, structure_snapshot, change_summary, notes, created_by, created_at, restored_from_version)
            VALUES ($1, $2, 1, $3, 'Initial version', NULL, $4, now(), NULL)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(template_id)
        .bind(&structure_json)
        .bind(creator)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(template_id)
    }

    /// `update_structure(template_id, new_structure, notes?, editor) -> new_version_number`.
    pub async fn update_structure(
        &self,
        template_id: Uuid,
        new_structure: &TemplateStructure,
        notes: Option<&str>,
        editor: &str,
    ) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE template_id = $1 FOR UPDATE")
            .bind(template_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(VersionStoreError::NotFound(template_id))?
            .into_template();

        let change_summary = new_structure.diff_summary(&current.structure);
        let new_version = current.version_number + 1;
        let structure_json = serde_json::to_value(new_structure).expect("TemplateStructure always serializes");

        sqlx::query(
            r"
            UPDATE templates
            SET structure = $2, version_number = $3, total_fixed = $4, total_fillable = $5,
                restored_from_version = NULL, updated_at = now()
            WHERE template_id = $1
            ",
        )
        .bind(template_id)
        .bind(&structure_json)
        .bind(new_version)
        .bind(new_structure.fixed_sections.len() as i32)
        .bind(new_structure.fillable_sections.len() as i32)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO template_versions
                (id, template_id, version_number, structure_snapshot, change_summary, notes, created_by, created_at, restored_from_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now(), NULL)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(template_id)
        .bind(new_version)
        .bind(&structure_json)
        .bind(&change_summary)
        .bind(notes)
        .bind(editor)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_version)
    }

    /// `restore(template_id, target_version, restorer) -> new_version_number`.
    pub async fn restore(&self, template_id: Uuid, target_version: i32, restorer: &str) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE template_id = $1 FOR UPDATE")
            .bind(template_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(VersionStoreError::NotFound(template_id))?
            .into_template();

        let target = sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM template_versions WHERE template_id = $1 AND version_number = $2",
        )
        .bind(template_id)
        .bind(target_version)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(VersionStoreError::VersionNotFound(template_id, target_version))?
        .into_version();

        let new_version = current.version_number + 1;
        let snapshot_json = serde_json::to_value(&target.structure_snapshot).expect("TemplateStructure always serializes");
        let change_summary = format!("Restored from version {target_version}");

        sqlx::query(
            r"
            UPDATE templates
            SET structure = $2, version_number = $3, total_fixed = $4, total_fillable = $5,
                restored_from_version = $6, updated_at = now()
            WHERE template_id = $1
            ",
        )
        .bind(template_id)
        .bind(&snapshot_json)
        .bind(new_version)
        .bind(target.structure_snapshot.fixed_sections.len() as i32)
        .bind(target.structure_snapshot.fillable_sections.len() as i32)
        .bind(target_version)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO template_versions
                (id, template_id, version_number, structure_snapshot, change_summary, notes, created_by, created_at, restored_from_version)
            VALUES ($1, $2, $3, $4, $5, NULL, $6, now(), $7)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(template_id)
        .bind(new_version)
        .bind(&snapshot_json)
        .bind(&change_summary)
        .bind(restorer)
        .bind(target_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_version)
    }

    pub async fn list_versions(&self, template_id: Uuid) -> Result<Vec<TemplateVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM template_versions WHERE template_id = $1 ORDER BY version_number ASC",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(VersionRow::into_version).collect())
    }

    pub async fn get_version(&self, template_id: Uuid, version_number: i32) -> Result<TemplateVersion> {
        sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM template_versions WHERE template_id = $1 AND version_number = $2",
        )
        .bind(template_id)
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await?
        .map(VersionRow::into_version)
        .ok_or(VersionStoreError::VersionNotFound(template_id, version_number))
    }

    pub async fn get_template(&self, template_id: Uuid) -> Result<Template> {
        sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE template_id = $1")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?
            .map(TemplateRow::into_template)
            .ok_or(VersionStoreError::NotFound(template_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::{FillableSection, FixedSection};

    fn structure(fillable_tags: Vec<&str>) -> TemplateStructure {
        TemplateStructure {
            document_title: "Doc".into(),
            fixed_sections: vec![FixedSection {
                id: "fx1".into(),
                title: "Intro".into(),
                content: "...".into(),
                section_type: None,
            }],
            fillable_sections: fillable_tags
                .into_iter()
                .enumerate()
                .map(|(i, tag)| FillableSection {
                    id: format!("fl{i}"),
                    title: "Field".into(),
                    kind: "field".into(),
                    semantic_tags: vec![tag.to_string()],
                    placeholder: None,
                    is_mandatory: None,
                    mandatory_confidence: None,
                })
                .collect(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn restore_change_summary_names_the_source_version() {
        let s = structure(vec!["a"]);
        assert_eq!(format!("Restored from version {}", 1), "Restored from version 1");
        let _ = s;
    }
}
