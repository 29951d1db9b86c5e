use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::DraftPolicy;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::*;

/// A collaborator's save of their draft for one section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSave {
    pub section_id: String,
    pub document_id: String,
    pub user_id: String,
    pub draft_version: i64,
    pub draft_base_version: i64,
    pub content_markdown: String,
    #[serde(default)]
    pub summary_note: Option<String>,
    /// Replaces the draft's annotation set when present.
    #[serde(default)]
    pub formatting_annotations: Option<Vec<NewFormattingAnnotation>>,
}

/// What a collaborator sees on entering a section editor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEntry {
    pub section: DocumentSection,
    pub draft: Option<SectionDraft>,
    /// The conflict recorded by this entry, if it recorded one.
    pub conflict: Option<DraftConflictLog>,
}

/// Next conflict state after a check.
///
/// `open_conflicts` counts unresolved logs including any written by this check.
/// Divergence after a rebase counts as a repeated conflict and blocks the draft.
#[must_use]
pub fn next_state(
    current: ConflictState,
    diverged: bool,
    open_conflicts: usize,
    policy: &DraftPolicy,
) -> ConflictState {
    use ConflictState::*;

    if diverged {
        // A rebased draft has no permitted edge back to rebase_required.
        if matches!(current, Blocked | Rebased)
            || open_conflicts >= policy.blocked_after_open_conflicts
        {
            Blocked
        } else {
            RebaseRequired
        }
    } else {
        match current {
            RebaseRequired => Rebased,
            Rebased | Clean => Clean,
            Blocked => Blocked,
        }
    }
}

fn divergence_reason(base: i64, latest: i64) -> String {
    format!("approved version advanced from {base} to {latest}")
}

/// Reason column for the target state. `None` keeps the stored reason.
fn reason_for(
    state: ConflictState,
    diverged: bool,
    base: i64,
    latest: i64,
    open_conflicts: usize,
) -> Option<Option<String>> {
    match state {
        ConflictState::RebaseRequired => Some(Some(divergence_reason(base, latest))),
        ConflictState::Blocked if diverged => Some(Some(format!(
            "{open_conflicts} unresolved conflicts; {}",
            divergence_reason(base, latest)
        ))),
        ConflictState::Blocked => None,
        ConflictState::Rebased | ConflictState::Clean => Some(None),
    }
}

pub struct DraftService {
    store: Arc<dyn Store>,
    policy: DraftPolicy,
}

impl DraftService {
    pub fn new(store: Arc<dyn Store>, policy: DraftPolicy) -> Self {
        Self { store, policy }
    }

    fn section(&self, id: &str) -> Result<DocumentSection> {
        self.store.get_section(id)?.ok_or(Error::NotFound)
    }

    /// Unresolved logs of a draft, newest first.
    fn open_conflicts(&self, draft_id: &str) -> Result<Vec<DraftConflictLog>> {
        let logs = self.store.list_conflict_logs_by_draft(draft_id)?;
        Ok(logs.into_iter().filter(|log| !log.is_resolved()).collect())
    }

    /// Builds the log row for an observed divergence. Every observation gets its own row.
    fn detect(
        &self,
        section: &DocumentSection,
        draft_id: &str,
        base: i64,
        during: DetectedDuring,
    ) -> NewConflictLog {
        NewConflictLog {
            section_id: section.id.clone(),
            draft_id: draft_id.to_string(),
            detected_at: Utc::now(),
            detected_during: during,
            previous_approved_version: base,
            latest_approved_version: section.approved_version,
        }
    }

    fn trace_outcome(&self, draft: &SectionDraft, log: Option<&DraftConflictLog>) {
        if let Some(log) = log {
            tracing::info!(
                draft_id = %draft.id,
                section_id = %draft.section_id,
                previous = log.previous_approved_version,
                latest = log.latest_approved_version,
                during = %log.detected_during,
                "draft conflict detected"
            );
        }
        if draft.conflict_state == ConflictState::Blocked {
            tracing::warn!(
                draft_id = %draft.id,
                user_id = %draft.user_id,
                "draft blocked pending resolution"
            );
        }
    }

    /// Persists a collaborator's draft and reconciles it with the approved version.
    ///
    /// A detected conflict never fails the save: the content is stored and the
    /// returned draft carries the new conflict state.
    pub fn save(&self, section_id: &str, input: &DraftSave, actor_id: &str) -> Result<SectionDraft> {
        let section = self.section(section_id)?;
        if input.section_id != section.id {
            return Err(Error::BadRequest(
                "sectionId does not match the addressed section".to_string(),
            ));
        }
        if input.document_id != section.document_id {
            return Err(Error::BadRequest(format!(
                "section {} does not belong to document {}",
                section.id, input.document_id
            )));
        }

        let latest = section.approved_version;
        let base = input.draft_base_version;
        if base < 0 || base > latest {
            return Err(Error::BadRequest(format!(
                "draftBaseVersion {base} is outside 0..={latest}"
            )));
        }
        let diverged = latest > base;

        let ctx = SaveContext {
            formatting_annotations: input.formatting_annotations.clone(),
            ..SaveContext::new(actor_id)
        };

        let Some(existing) = self
            .store
            .find_draft_for_user(&section.id, &input.user_id)?
        else {
            let conflict =
                diverged.then(|| self.detect(&section, "", base, DetectedDuring::Save));
            let open_after = usize::from(conflict.is_some());
            let state = next_state(ConflictState::Clean, diverged, open_after, &self.policy);
            let revision = DraftRevision {
                update: DraftUpdate {
                    conflict_state: Some(state),
                    conflict_reason: reason_for(state, diverged, base, latest, open_after),
                    ..DraftUpdate::default()
                },
                conflict,
                resolve_open_conflicts: None,
            };
            let new_draft = NewSectionDraft {
                section_id: section.id.clone(),
                document_id: section.document_id.clone(),
                user_id: input.user_id.clone(),
                draft_version: input.draft_version,
                draft_base_version: base,
                content_markdown: input.content_markdown.clone(),
                summary_note: input.summary_note.clone(),
            };

            let (draft, log) = self.store.create_draft_revision(&new_draft, &revision, &ctx)?;
            self.trace_outcome(&draft, log.as_ref());
            return Ok(draft);
        };

        if input.draft_version == existing.draft_version {
            tracing::debug!(draft_id = %existing.id, "draft save replayed");
            return Ok(existing);
        }
        if input.draft_version < existing.draft_version {
            return Err(Error::Conflict(format!(
                "draftVersion {} is older than stored version {}",
                input.draft_version, existing.draft_version
            )));
        }

        let open = self.open_conflicts(&existing.id)?;
        let conflict =
            diverged.then(|| self.detect(&section, &existing.id, base, DetectedDuring::Save));
        let open_after = open.len() + usize::from(conflict.is_some());
        let state = next_state(existing.conflict_state, diverged, open_after, &self.policy);
        if !existing.conflict_state.can_transition_to(state) {
            return Err(Error::Conflict(format!(
                "draft cannot move from {} to {state}",
                existing.conflict_state
            )));
        }

        let rebasing =
            existing.conflict_state == ConflictState::RebaseRequired && state == ConflictState::Rebased;
        let revision = DraftRevision {
            update: DraftUpdate {
                draft_version: Some(input.draft_version),
                draft_base_version: Some(base),
                content_markdown: Some(input.content_markdown.clone()),
                summary_note: Some(input.summary_note.clone()),
                conflict_state: Some(state),
                conflict_reason: reason_for(state, diverged, base, latest, open_after),
                rebased_at: rebasing.then(|| Some(Utc::now())),
            },
            conflict,
            resolve_open_conflicts: rebasing.then(|| ConflictResolution {
                resolved_by: actor_id.to_string(),
                resolution_note: Some(format!("rebased onto approved version {latest}")),
            }),
        };

        let (draft, log) = self.store.save_draft_revision(&existing.id, &revision, &ctx)?;
        if rebasing {
            tracing::info!(draft_id = %draft.id, base, "draft rebased");
        }
        self.trace_outcome(&draft, log.as_ref());
        Ok(draft)
    }

    /// Runs the divergence check for a collaborator opening a section, without
    /// touching draft content.
    pub fn enter_section(
        &self,
        section_id: &str,
        user_id: &str,
        actor_id: &str,
    ) -> Result<SectionEntry> {
        let section = self.section(section_id)?;
        let Some(draft) = self.store.find_draft_for_user(section_id, user_id)? else {
            return Ok(SectionEntry {
                section,
                draft: None,
                conflict: None,
            });
        };

        let latest = section.approved_version;
        let base = draft.draft_base_version;
        if latest <= base {
            return Ok(SectionEntry {
                section,
                draft: Some(draft),
                conflict: None,
            });
        }

        let open = self.open_conflicts(&draft.id)?;
        let conflict = self.detect(&section, &draft.id, base, DetectedDuring::Entry);
        let open_after = open.len() + 1;
        let state = next_state(draft.conflict_state, true, open_after, &self.policy);

        let revision = DraftRevision {
            update: DraftUpdate {
                conflict_state: Some(state),
                conflict_reason: reason_for(state, true, base, latest, open_after),
                ..DraftUpdate::default()
            },
            conflict: Some(conflict),
            resolve_open_conflicts: None,
        };
        // Entry is not a save: keep the save stamps as they were.
        let ctx = SaveContext {
            saved_at: Some(draft.saved_at),
            saved_by: Some(draft.saved_by.clone()),
            ..SaveContext::new(actor_id)
        };

        let (draft, log) = self.store.save_draft_revision(&draft.id, &revision, &ctx)?;
        self.trace_outcome(&draft, log.as_ref());
        Ok(SectionEntry {
            section,
            draft: Some(draft),
            conflict: log,
        })
    }

    /// Releases a blocked draft, resolving all of its open conflicts.
    pub fn unblock_draft(
        &self,
        draft_id: &str,
        note: Option<String>,
        actor_id: &str,
    ) -> Result<SectionDraft> {
        let draft = self.get_draft(draft_id)?;
        if draft.conflict_state != ConflictState::Blocked {
            return Err(Error::Conflict(format!("draft {draft_id} is not blocked")));
        }

        let section = self.section(&draft.section_id)?;
        let latest = section.approved_version;
        let base = draft.draft_base_version;
        let state = if base >= latest {
            ConflictState::Clean
        } else {
            ConflictState::RebaseRequired
        };

        let revision = DraftRevision {
            update: DraftUpdate {
                conflict_state: Some(state),
                conflict_reason: reason_for(state, base < latest, base, latest, 0),
                ..DraftUpdate::default()
            },
            conflict: None,
            resolve_open_conflicts: Some(ConflictResolution {
                resolved_by: actor_id.to_string(),
                resolution_note: note.or_else(|| Some("released from blocked state".to_string())),
            }),
        };
        let ctx = SaveContext {
            saved_at: Some(draft.saved_at),
            saved_by: Some(draft.saved_by.clone()),
            ..SaveContext::new(actor_id)
        };

        let (draft, _) = self.store.save_draft_revision(draft_id, &revision, &ctx)?;
        tracing::info!(draft_id, state = %draft.conflict_state, "draft unblocked");
        Ok(draft)
    }

    pub fn resolve_conflict(
        &self,
        log_id: &str,
        resolution: &ConflictResolution,
    ) -> Result<DraftConflictLog> {
        if resolution.resolved_by.trim().is_empty() {
            return Err(Error::BadRequest("resolvedBy cannot be empty".to_string()));
        }
        let log = self.store.resolve_conflict_log(log_id, resolution)?;
        tracing::info!(conflict_id = log_id, draft_id = %log.draft_id, "conflict resolved");
        Ok(log)
    }

    pub fn get_draft(&self, id: &str) -> Result<SectionDraft> {
        self.store.find_draft_by_id(id)?.ok_or(Error::NotFound)
    }

    pub fn list_drafts(&self, section_id: &str) -> Result<Vec<SectionDraft>> {
        self.section(section_id)?;
        self.store.list_drafts_by_section(section_id)
    }

    pub fn delete_draft(&self, id: &str, actor_id: &str) -> Result<()> {
        if !self.store.delete_draft(id, actor_id)? {
            return Err(Error::NotFound);
        }
        tracing::info!(draft_id = id, "draft deleted");
        Ok(())
    }

    /// Conflict history of a draft, including drafts that have since been deleted.
    pub fn list_conflicts_for_draft(&self, draft_id: &str) -> Result<Vec<DraftConflictLog>> {
        self.store
            .find_draft_by_id_including_deleted(draft_id)?
            .ok_or(Error::NotFound)?;
        self.store.list_conflict_logs_by_draft(draft_id)
    }

    pub fn list_conflicts_for_section(&self, section_id: &str) -> Result<Vec<DraftConflictLog>> {
        self.section(section_id)?;
        self.store.list_conflict_logs_by_section(section_id)
    }
}
