use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConflictState, DetectedDuring, MigrationStatus, Severity, TemplateStatus};
use crate::validator::Issue;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTemplate {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub document_type: String,
    pub active_version_id: Option<String>,
    pub status: TemplateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable schema snapshot of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVersion {
    pub id: String,
    pub template_id: String,
    pub version: String,
    pub schema_hash: String,
    pub schema: Value,
    pub section_outline: Value,
    pub status: TemplateStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub content: Value,
    pub template_id: String,
    pub template_version: String,
    pub template_schema_hash: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
}

impl Document {
    #[must_use]
    pub fn binding(&self) -> TemplateBinding {
        TemplateBinding {
            template_id: self.template_id.clone(),
            version: self.template_version.clone(),
            schema_hash: self.template_schema_hash.clone(),
        }
    }
}

/// The (template, version, schema hash) triple a document is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBinding {
    pub template_id: String,
    pub version: String,
    pub schema_hash: String,
}

/// One upgrade attempt. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMigration {
    pub id: String,
    pub document_id: String,
    pub from_version: String,
    pub to_version: String,
    pub status: MigrationStatus,
    pub validation_errors: Option<Vec<Issue>>,
    pub initiated_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A section of a document with its approved-content counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSection {
    pub id: String,
    pub document_id: String,
    pub section_key: String,
    pub title: String,
    pub approved_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_content_markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDraft {
    pub id: String,
    pub section_id: String,
    pub document_id: String,
    pub user_id: String,
    pub draft_version: i64,
    pub draft_base_version: i64,
    pub content_markdown: String,
    pub summary_note: Option<String>,
    pub conflict_state: ConflictState,
    pub conflict_reason: Option<String>,
    pub rebased_at: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
    pub saved_by: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub formatting_annotations: Vec<FormattingAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingAnnotation {
    pub id: String,
    pub section_id: String,
    pub draft_id: String,
    pub start_offset: i64,
    pub end_offset: i64,
    pub mark_type: String,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Annotation payload as supplied by a saving collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFormattingAnnotation {
    pub start_offset: i64,
    pub end_offset: i64,
    pub mark_type: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftConflictLog {
    pub id: String,
    pub section_id: String,
    pub draft_id: String,
    pub detected_at: DateTime<Utc>,
    pub detected_during: DetectedDuring,
    pub previous_approved_version: i64,
    pub latest_approved_version: i64,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DraftConflictLog {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
