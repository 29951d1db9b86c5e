use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Document, MigrationStatus, TemplateMigration, TemplateVersion};
use crate::validator::ValidatorCache;

/// Moves a document onto a newer template version when its content still validates.
pub struct MigrationExecutor {
    store: Arc<dyn Store>,
    validators: ValidatorCache,
}

impl MigrationExecutor {
    pub fn new(store: Arc<dyn Store>, validators: ValidatorCache) -> Self {
        Self { store, validators }
    }

    /// Validates `document` against `target` and rebinds it on success.
    ///
    /// Either way exactly one migration row is written. On failure the document is
    /// untouched and the issues come back in [`Error::TemplateValidationFailed`].
    pub fn execute(
        &self,
        document: &Document,
        target: &TemplateVersion,
        actor_id: &str,
    ) -> Result<(Document, TemplateMigration)> {
        let validator = self.validators.get_or_compile(target)?;
        let now = Utc::now();

        let mut migration = TemplateMigration {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            from_version: document.template_version.clone(),
            to_version: target.version.clone(),
            status: MigrationStatus::Succeeded,
            validation_errors: None,
            initiated_by: actor_id.to_string(),
            created_at: now,
            completed_at: Some(now),
        };

        match validator.safe_parse(&document.content) {
            Ok(_) => {
                let updated =
                    self.store
                        .apply_template_migration(&document.binding(), target, &migration)?;
                tracing::info!(
                    document_id = %document.id,
                    from = %migration.from_version,
                    to = %migration.to_version,
                    "template migration applied"
                );
                Ok((updated, migration))
            }
            Err(issues) => {
                migration.status = MigrationStatus::Failed;
                migration.validation_errors = Some(issues.clone());
                self.store.record_template_migration(&migration)?;
                tracing::warn!(
                    document_id = %document.id,
                    from = %migration.from_version,
                    to = %migration.to_version,
                    issues = issues.len(),
                    "template migration rejected"
                );
                Err(Error::TemplateValidationFailed {
                    template_id: target.template_id.clone(),
                    version: target.version.clone(),
                    issues,
                })
            }
        }
    }
}
