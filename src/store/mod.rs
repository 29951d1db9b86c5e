mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
///
/// Every method is one atomic unit: multi-row writes commit together or not at all.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Template catalog
    fn create_template(&self, template: &DocumentTemplate) -> Result<()>;
    fn get_template(&self, id: &str) -> Result<Option<DocumentTemplate>>;
    fn list_templates(&self) -> Result<Vec<DocumentTemplate>>;
    fn deprecate_template(&self, id: &str) -> Result<DocumentTemplate>;
    fn create_template_version(&self, version: &TemplateVersion) -> Result<()>;
    fn get_template_version(&self, template_id: &str, version: &str)
    -> Result<Option<TemplateVersion>>;
    fn get_template_version_by_id(&self, id: &str) -> Result<Option<TemplateVersion>>;
    fn list_template_versions(&self, template_id: &str) -> Result<Vec<TemplateVersion>>;
    fn activate_template_version(&self, template_id: &str, version_id: &str)
    -> Result<DocumentTemplate>;

    // Documents
    fn create_document(&self, doc: &Document) -> Result<()>;
    fn get_document(&self, id: &str) -> Result<Option<Document>>;
    fn update_document_content(
        &self,
        id: &str,
        content: &serde_json::Value,
        actor_id: &str,
    ) -> Result<Document>;
    fn delete_document(&self, id: &str, actor_id: &str) -> Result<bool>;

    // Template migrations
    /// Rebinds the document to `target` and records `migration`, in one transaction.
    /// Fails with `Conflict` if the document's binding no longer matches `expected`.
    fn apply_template_migration(
        &self,
        expected: &TemplateBinding,
        target: &TemplateVersion,
        migration: &TemplateMigration,
    ) -> Result<Document>;
    fn record_template_migration(&self, migration: &TemplateMigration) -> Result<()>;
    fn list_template_migrations(&self, document_id: &str) -> Result<Vec<TemplateMigration>>;

    // Sections
    fn create_section(&self, section: &DocumentSection) -> Result<()>;
    fn get_section(&self, id: &str) -> Result<Option<DocumentSection>>;
    fn list_sections(&self, document_id: &str) -> Result<Vec<DocumentSection>>;
    fn approve_section(
        &self,
        id: &str,
        content_markdown: &str,
        approved_by: &str,
    ) -> Result<DocumentSection>;

    // Section drafts
    fn create_draft(&self, input: &NewSectionDraft, ctx: &SaveContext) -> Result<SectionDraft>;
    /// Creates a draft whose first save already carries conflict bookkeeping.
    /// The conflict's `draft_id` is replaced with the new draft's id.
    fn create_draft_revision(
        &self,
        input: &NewSectionDraft,
        revision: &DraftRevision,
        ctx: &SaveContext,
    ) -> Result<(SectionDraft, Option<DraftConflictLog>)>;
    fn update_draft(&self, id: &str, updates: &DraftUpdate, ctx: &SaveContext)
    -> Result<SectionDraft>;
    /// Applies a draft update plus its conflict bookkeeping atomically.
    fn save_draft_revision(
        &self,
        id: &str,
        revision: &DraftRevision,
        ctx: &SaveContext,
    ) -> Result<(SectionDraft, Option<DraftConflictLog>)>;
    fn find_draft_by_id(&self, id: &str) -> Result<Option<SectionDraft>>;
    /// Audit path: returns tombstoned drafts too.
    fn find_draft_by_id_including_deleted(&self, id: &str) -> Result<Option<SectionDraft>>;
    fn find_draft_for_user(&self, section_id: &str, user_id: &str) -> Result<Option<SectionDraft>>;
    fn list_drafts_by_section(&self, section_id: &str) -> Result<Vec<SectionDraft>>;
    fn delete_draft(&self, id: &str, actor_id: &str) -> Result<bool>;

    // Formatting annotations
    fn replace_formatting_annotations(
        &self,
        draft_id: &str,
        annotations: &[NewFormattingAnnotation],
        actor_id: &str,
    ) -> Result<Vec<FormattingAnnotation>>;
    fn list_formatting_annotations(&self, draft_id: &str) -> Result<Vec<FormattingAnnotation>>;

    // Conflict log
    fn create_conflict_log(&self, log: &NewConflictLog) -> Result<DraftConflictLog>;
    fn resolve_conflict_log(&self, id: &str, resolution: &ConflictResolution)
    -> Result<DraftConflictLog>;
    fn list_conflict_logs_by_draft(&self, draft_id: &str) -> Result<Vec<DraftConflictLog>>;
    fn list_conflict_logs_by_section(&self, section_id: &str) -> Result<Vec<DraftConflictLog>>;
}
