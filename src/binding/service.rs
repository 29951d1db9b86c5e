use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::decision::{TemplateDecision, decide};
use super::executor::MigrationExecutor;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{
    Document, DocumentSection, TemplateMigration, TemplateStatus, TemplateVersion,
};
use crate::validator::ValidatorCache;

/// Result of opening a document: the (possibly rebound) document and what was decided.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOpen {
    pub document: Document,
    pub migration: Option<TemplateMigration>,
    pub template_decision: TemplateDecision,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    #[serde(default)]
    pub id: Option<String>,
    pub project_id: String,
    pub title: String,
    pub content: Value,
    pub template_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    pub section_key: String,
    pub title: String,
}

/// Documents and their sections, kept consistent with the template catalog.
pub struct DocumentService {
    store: Arc<dyn Store>,
    validators: ValidatorCache,
    executor: MigrationExecutor,
}

impl DocumentService {
    pub fn new(store: Arc<dyn Store>, validators: ValidatorCache) -> Self {
        Self {
            executor: MigrationExecutor::new(Arc::clone(&store), validators.clone()),
            store,
            validators,
        }
    }

    fn document(&self, id: &str) -> Result<Document> {
        self.store.get_document(id)?.ok_or(Error::NotFound)
    }

    fn active_version(&self, template_id: &str) -> Result<Option<TemplateVersion>> {
        let Some(template) = self.store.get_template(template_id)? else {
            return Ok(None);
        };
        let Some(active_id) = template.active_version_id else {
            return Ok(None);
        };

        self.store
            .get_template_version_by_id(&active_id)?
            .map(Some)
            .ok_or_else(|| {
                Error::TemplateConfiguration(format!(
                    "active version {active_id} of template {template_id} is missing"
                ))
            })
    }

    fn validate(&self, version: &TemplateVersion, content: &Value) -> Result<()> {
        let validator = self.validators.get_or_compile(version)?;
        validator
            .safe_parse(content)
            .map(|_| ())
            .map_err(|issues| Error::TemplateValidationFailed {
                template_id: version.template_id.clone(),
                version: version.version.clone(),
                issues,
            })
    }

    /// Opens a document, auto-upgrading its template binding when the catalog allows it.
    pub fn open_document(&self, id: &str, actor_id: &str) -> Result<DocumentOpen> {
        let document = self.document(id)?;
        let binding = document.binding();

        let bound = self
            .store
            .get_template_version(&binding.template_id, &binding.version)?;
        let active = self.active_version(&binding.template_id)?;
        let decision = decide(&binding, bound.as_ref(), active.as_ref());

        tracing::info!(
            document_id = id,
            template_id = %binding.template_id,
            version = %binding.version,
            action = decision.action(),
            "template decision computed"
        );

        match decision {
            TemplateDecision::Blocked {
                template_id,
                requested_version,
                ..
            } => Err(Error::TemplateVersionRemoved {
                template_id,
                missing_version: requested_version,
            }),
            TemplateDecision::Noop { .. } => Ok(DocumentOpen {
                document,
                migration: None,
                template_decision: decision,
            }),
            TemplateDecision::Upgrade { .. } => {
                let target = active.ok_or_else(|| {
                    Error::TemplateConfiguration(format!(
                        "template {} has no active version to upgrade to",
                        binding.template_id
                    ))
                })?;
                let (document, migration) = self.executor.execute(&document, &target, actor_id)?;
                Ok(DocumentOpen {
                    document,
                    migration: Some(migration),
                    template_decision: decision,
                })
            }
        }
    }

    /// Creates a document bound to the template's active version.
    pub fn create_document(&self, input: &NewDocument, actor_id: &str) -> Result<Document> {
        if input.title.trim().is_empty() {
            return Err(Error::BadRequest("title cannot be empty".to_string()));
        }

        let template = self
            .store
            .get_template(&input.template_id)?
            .ok_or(Error::NotFound)?;
        if template.status == TemplateStatus::Deprecated {
            return Err(Error::Conflict(format!(
                "template {} is deprecated",
                template.id
            )));
        }
        let active = self.active_version(&template.id)?.ok_or_else(|| {
            Error::Conflict(format!("template {} has no active version", template.id))
        })?;

        self.validate(&active, &input.content)?;

        let now = Utc::now();
        let document = Document {
            id: input
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            project_id: input.project_id.clone(),
            title: input.title.trim().to_string(),
            content: input.content.clone(),
            template_id: active.template_id.clone(),
            template_version: active.version.clone(),
            template_schema_hash: active.schema_hash.clone(),
            created_at: now,
            created_by: actor_id.to_string(),
            updated_at: now,
            updated_by: actor_id.to_string(),
            deleted_at: None,
            deleted_by: None,
        };
        self.store.create_document(&document)?;
        tracing::info!(document_id = %document.id, version = %active.version, "document created");

        self.document(&document.id)
    }

    /// Replaces document content after validating it against the bound version.
    pub fn update_content(&self, id: &str, content: &Value, actor_id: &str) -> Result<Document> {
        let document = self.document(id)?;
        let bound = self
            .store
            .get_template_version(&document.template_id, &document.template_version)?
            .ok_or_else(|| Error::TemplateVersionRemoved {
                template_id: document.template_id.clone(),
                missing_version: document.template_version.clone(),
            })?;

        self.validate(&bound, content)?;
        self.store.update_document_content(id, content, actor_id)
    }

    pub fn delete_document(&self, id: &str, actor_id: &str) -> Result<()> {
        if !self.store.delete_document(id, actor_id)? {
            return Err(Error::NotFound);
        }
        tracing::info!(document_id = id, "document deleted");
        Ok(())
    }

    pub fn list_migrations(&self, document_id: &str) -> Result<Vec<TemplateMigration>> {
        self.document(document_id)?;
        self.store.list_template_migrations(document_id)
    }

    pub fn create_section(&self, document_id: &str, input: &NewSection) -> Result<DocumentSection> {
        self.document(document_id)?;
        if input.section_key.trim().is_empty() {
            return Err(Error::BadRequest("sectionKey cannot be empty".to_string()));
        }

        let section = DocumentSection {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            section_key: input.section_key.trim().to_string(),
            title: input.title.clone(),
            approved_version: 0,
            approved_content_markdown: None,
            approved_at: None,
            approved_by: None,
            created_at: Utc::now(),
        };
        self.store.create_section(&section)?;

        self.store.get_section(&section.id)?.ok_or(Error::NotFound)
    }

    pub fn get_section(&self, id: &str) -> Result<DocumentSection> {
        self.store.get_section(id)?.ok_or(Error::NotFound)
    }

    pub fn list_sections(&self, document_id: &str) -> Result<Vec<DocumentSection>> {
        self.document(document_id)?;
        self.store.list_sections(document_id)
    }

    /// Publishes new approved content, advancing the section's approved version by one.
    pub fn approve_section(
        &self,
        id: &str,
        content_markdown: &str,
        actor_id: &str,
    ) -> Result<DocumentSection> {
        let section = self.store.approve_section(id, content_markdown, actor_id)?;
        tracing::info!(
            section_id = id,
            approved_version = section.approved_version,
            "section approved"
        );
        Ok(section)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::binding::{NoopReason, UpgradeReason};
    use crate::catalog::{NewTemplate, NewTemplateVersion, TemplateCatalog, schema_hash};
    use crate::store::SqliteStore;
    use crate::types::MigrationStatus;
    use crate::validator::PathSegment;

    struct Fixture {
        _temp: TempDir,
        store: Arc<SqliteStore>,
        catalog: TemplateCatalog,
        service: DocumentService,
    }

    fn design_schema() -> Value {
        json!({
            "type": "object",
            "required": ["introduction", "system_overview"],
            "properties": {
                "introduction": { "type": "string" },
                "system_overview": {
                    "type": "object",
                    "required": ["tech_stack"],
                    "properties": { "tech_stack": { "type": "string" } }
                }
            }
        })
    }

    fn strict_schema() -> Value {
        json!({
            "type": "object",
            "required": ["introduction", "system_overview", "risks"],
            "properties": {
                "introduction": { "type": "string" },
                "system_overview": {
                    "type": "object",
                    "required": ["tech_stack"],
                    "properties": { "tech_stack": { "type": "string" } }
                },
                "risks": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    fn setup() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(temp.path().join("test.db")).unwrap());
        store.initialize().unwrap();

        let catalog = TemplateCatalog::new(store.clone());
        catalog
            .create_template(&NewTemplate {
                id: Some("tpl-1".to_string()),
                name: "Solution design".to_string(),
                description: None,
                document_type: "design".to_string(),
            })
            .unwrap();
        register(&catalog, "1.0.0", design_schema());
        catalog.activate_version("tpl-1", "1.0.0").unwrap();

        let service = DocumentService::new(store.clone(), ValidatorCache::new(16));
        Fixture {
            _temp: temp,
            store,
            catalog,
            service,
        }
    }

    fn register(catalog: &TemplateCatalog, version: &str, schema: Value) {
        catalog
            .register_version(
                "tpl-1",
                &NewTemplateVersion {
                    version: version.to_string(),
                    schema,
                    section_outline: None,
                },
                Some("author"),
            )
            .unwrap();
    }

    fn new_document(content: Value) -> NewDocument {
        NewDocument {
            id: Some("doc-1".to_string()),
            project_id: "proj-1".to_string(),
            title: "Design".to_string(),
            content,
            template_id: "tpl-1".to_string(),
        }
    }

    fn valid_content() -> Value {
        json!({ "introduction": "Hi", "system_overview": { "tech_stack": "React" } })
    }

    #[test]
    fn test_create_binds_to_active_version() {
        let f = setup();
        let doc = f
            .service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        assert_eq!(doc.template_version, "1.0.0");
        assert_eq!(
            doc.template_schema_hash,
            schema_hash(&design_schema()).unwrap()
        );
    }

    #[test]
    fn test_create_rejects_invalid_content() {
        let f = setup();
        let err = f
            .service
            .create_document(
                &new_document(json!({ "introduction": "Hi", "system_overview": {} })),
                "alice",
            )
            .unwrap_err();

        let Error::TemplateValidationFailed { issues, .. } = err else {
            panic!("expected validation failure, got {err:?}");
        };
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].path,
            vec![
                PathSegment::from("system_overview"),
                PathSegment::from("tech_stack")
            ]
        );
        assert!(f.store.get_document("doc-1").unwrap().is_none());
    }

    #[test]
    fn test_open_up_to_date_document_is_noop() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        let opened = f.service.open_document("doc-1", "alice").unwrap();
        assert_eq!(
            opened.template_decision,
            TemplateDecision::Noop {
                reason: NoopReason::UpToDate
            }
        );
        assert!(opened.migration.is_none());
    }

    #[test]
    fn test_open_upgrades_when_content_fits() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        let mut relaxed = design_schema();
        relaxed["properties"]["appendix"] = json!({ "type": "string" });
        register(&f.catalog, "1.1.0", relaxed.clone());
        f.catalog.activate_version("tpl-1", "1.1.0").unwrap();

        let opened = f.service.open_document("doc-1", "bob").unwrap();
        assert_eq!(
            opened.template_decision,
            TemplateDecision::Upgrade {
                reason: UpgradeReason::OutOfDate,
                current_version: "1.0.0".to_string(),
                target_version: "1.1.0".to_string(),
            }
        );
        assert_eq!(opened.document.template_version, "1.1.0");
        assert_eq!(
            opened.document.template_schema_hash,
            schema_hash(&relaxed).unwrap()
        );

        let migration = opened.migration.unwrap();
        assert_eq!(migration.status, MigrationStatus::Succeeded);
        assert_eq!(migration.initiated_by, "bob");

        let again = f.service.open_document("doc-1", "bob").unwrap();
        assert!(again.migration.is_none());
        assert_eq!(f.service.list_migrations("doc-1").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_upgrade_replays_identically() {
        let f = setup();
        let created = f
            .service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        register(&f.catalog, "2.0.0", strict_schema());
        f.catalog.activate_version("tpl-1", "2.0.0").unwrap();

        let first = f.service.open_document("doc-1", "alice").unwrap_err();
        let second = f.service.open_document("doc-1", "alice").unwrap_err();

        let (
            Error::TemplateValidationFailed { issues: a, .. },
            Error::TemplateValidationFailed { issues: b, .. },
        ) = (first, second)
        else {
            panic!("expected validation failures");
        };
        assert_eq!(a, b);
        assert_eq!(a[0].path, vec![PathSegment::from("risks")]);

        let doc = f.store.get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.template_version, created.template_version);
        assert_eq!(doc.template_schema_hash, created.template_schema_hash);
        assert_eq!(doc.updated_at, created.updated_at);

        let history = f.service.list_migrations("doc-1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.status == MigrationStatus::Failed));
        assert_eq!(history[0].validation_errors.as_ref(), Some(&a));
    }

    #[test]
    fn test_open_blocks_on_removed_version() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();
        f.store
            .connection()
            .execute(
                "UPDATE documents SET template_version = '0.9.0' WHERE id = 'doc-1'",
                [],
            )
            .unwrap();

        let err = f.service.open_document("doc-1", "alice").unwrap_err();
        assert!(matches!(
            err,
            Error::TemplateVersionRemoved { ref template_id, ref missing_version }
                if template_id == "tpl-1" && missing_version == "0.9.0"
        ));
    }

    #[test]
    fn test_open_detects_schema_drift() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();
        f.store
            .connection()
            .execute(
                "UPDATE documents SET template_schema_hash = 'stale' WHERE id = 'doc-1'",
                [],
            )
            .unwrap();

        let opened = f.service.open_document("doc-1", "alice").unwrap();
        assert_eq!(
            opened.template_decision,
            TemplateDecision::Upgrade {
                reason: UpgradeReason::SchemaMismatch,
                current_version: "1.0.0".to_string(),
                target_version: "1.0.0".to_string(),
            }
        );
        assert_eq!(
            opened.document.template_schema_hash,
            schema_hash(&design_schema()).unwrap()
        );
    }

    #[test]
    fn test_corrupt_target_schema_is_configuration_error() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();
        register(&f.catalog, "2.0.0", json!({ "type": "object" }));
        f.catalog.activate_version("tpl-1", "2.0.0").unwrap();
        f.store
            .connection()
            .execute(
                "UPDATE template_versions SET schema_json = '[1]' WHERE version = '2.0.0'",
                [],
            )
            .unwrap();

        let err = f.service.open_document("doc-1", "alice").unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
        assert!(f.service.list_migrations("doc-1").unwrap().is_empty());
    }

    #[test]
    fn test_update_content_validates_against_bound_version() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        let err = f
            .service
            .update_content("doc-1", &json!({ "introduction": 7 }), "bob")
            .unwrap_err();
        assert!(matches!(err, Error::TemplateValidationFailed { .. }));

        let mut content = valid_content();
        content["introduction"] = json!("Hello");
        let updated = f.service.update_content("doc-1", &content, "bob").unwrap();
        assert_eq!(updated.content["introduction"], "Hello");
        assert_eq!(updated.updated_by, "bob");
    }

    #[test]
    fn test_create_requires_active_version() {
        let f = setup();
        f.catalog
            .create_template(&NewTemplate {
                id: Some("tpl-2".to_string()),
                name: "Empty".to_string(),
                description: None,
                document_type: "design".to_string(),
            })
            .unwrap();

        let mut input = new_document(valid_content());
        input.template_id = "tpl-2".to_string();
        assert!(matches!(
            f.service.create_document(&input, "alice"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_sections_and_approval() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        let section = f
            .service
            .create_section(
                "doc-1",
                &NewSection {
                    section_key: "introduction".to_string(),
                    title: "Introduction".to_string(),
                },
            )
            .unwrap();
        assert_eq!(section.approved_version, 0);

        let approved = f
            .service
            .approve_section(&section.id, "# Intro", "lead")
            .unwrap();
        assert_eq!(approved.approved_version, 1);
        assert_eq!(f.service.list_sections("doc-1").unwrap().len(), 1);
    }

    #[test]
    fn test_deleted_document_is_gone() {
        let f = setup();
        f.service
            .create_document(&new_document(valid_content()), "alice")
            .unwrap();

        f.service.delete_document("doc-1", "alice").unwrap();
        assert!(matches!(
            f.service.open_document("doc-1", "alice"),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            f.service.delete_document("doc-1", "alice"),
            Err(Error::NotFound)
        ));
    }
}
