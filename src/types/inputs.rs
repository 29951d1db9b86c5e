use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ConflictState, DetectedDuring, NewFormattingAnnotation};

/// Who is writing, and optionally when and on whose behalf the save is stamped.
#[derive(Debug, Clone, Default)]
pub struct SaveContext {
    pub actor_id: String,
    pub saved_at: Option<DateTime<Utc>>,
    pub saved_by: Option<String>,
    /// When present, replaces the draft's annotations wholesale.
    pub formatting_annotations: Option<Vec<NewFormattingAnnotation>>,
}

impl SaveContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_annotations(mut self, annotations: Vec<NewFormattingAnnotation>) -> Self {
        self.formatting_annotations = Some(annotations);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSectionDraft {
    pub section_id: String,
    pub document_id: String,
    pub user_id: String,
    pub draft_version: i64,
    pub draft_base_version: i64,
    pub content_markdown: String,
    #[serde(default)]
    pub summary_note: Option<String>,
}

/// Field-level changes to a draft. `None` leaves the column untouched.
///
/// A supplied `draft_version` must be greater than the stored one.
#[derive(Debug, Clone, Default)]
pub struct DraftUpdate {
    pub draft_version: Option<i64>,
    pub draft_base_version: Option<i64>,
    pub content_markdown: Option<String>,
    pub summary_note: Option<Option<String>>,
    pub conflict_state: Option<ConflictState>,
    pub conflict_reason: Option<Option<String>>,
    pub rebased_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone)]
pub struct NewConflictLog {
    pub section_id: String,
    pub draft_id: String,
    pub detected_at: DateTime<Utc>,
    pub detected_during: DetectedDuring,
    pub previous_approved_version: i64,
    pub latest_approved_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub resolved_by: String,
    #[serde(default)]
    pub resolution_note: Option<String>,
}

/// A draft update together with the conflict bookkeeping that must commit with it.
///
/// The conflict row, if any, is inserted before the draft row is touched.
#[derive(Debug, Clone, Default)]
pub struct DraftRevision {
    pub update: DraftUpdate,
    pub conflict: Option<NewConflictLog>,
    pub resolve_open_conflicts: Option<ConflictResolution>,
}
