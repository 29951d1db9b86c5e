//! Template catalog: templates and their immutable schema versions.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{DocumentTemplate, TemplateStatus, TemplateVersion};
use crate::validator::Validator;

/// Hex SHA-256 of the schema's compact JSON form.
///
/// `serde_json` maps keep their keys sorted, so equal schemas hash equally
/// regardless of the key order they were submitted in.
pub fn schema_hash(schema: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(schema)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub document_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplateVersion {
    pub version: String,
    pub schema: Value,
    #[serde(default)]
    pub section_outline: Option<Value>,
}

pub struct TemplateCatalog {
    store: Arc<dyn Store>,
}

impl TemplateCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn create_template(&self, input: &NewTemplate) -> Result<DocumentTemplate> {
        if input.name.trim().is_empty() {
            return Err(Error::BadRequest("template name cannot be empty".to_string()));
        }
        if input.document_type.trim().is_empty() {
            return Err(Error::BadRequest("documentType cannot be empty".to_string()));
        }

        let now = Utc::now();
        let template = DocumentTemplate {
            id: input
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            document_type: input.document_type.trim().to_string(),
            active_version_id: None,
            status: TemplateStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        self.store.create_template(&template)?;
        tracing::info!(template_id = %template.id, "template created");

        self.store.get_template(&template.id)?.ok_or(Error::NotFound)
    }

    pub fn get_template(&self, id: &str) -> Result<DocumentTemplate> {
        self.store.get_template(id)?.ok_or(Error::NotFound)
    }

    pub fn list_templates(&self) -> Result<Vec<DocumentTemplate>> {
        self.store.list_templates()
    }

    /// Registers a new schema snapshot. The schema must compile.
    pub fn register_version(
        &self,
        template_id: &str,
        input: &NewTemplateVersion,
        actor_id: Option<&str>,
    ) -> Result<TemplateVersion> {
        self.get_template(template_id)?;

        if input.version.trim().is_empty() {
            return Err(Error::BadRequest("version cannot be empty".to_string()));
        }

        if let Err(err) = Validator::compile(&input.schema) {
            return Err(match err {
                Error::InvalidSchema { path, message } => {
                    Error::BadRequest(format!("schema is malformed at {path}: {message}"))
                }
                other => other,
            });
        }

        let version = TemplateVersion {
            id: Uuid::new_v4().to_string(),
            template_id: template_id.to_string(),
            version: input.version.trim().to_string(),
            schema_hash: schema_hash(&input.schema)?,
            schema: input.schema.clone(),
            section_outline: input
                .section_outline
                .clone()
                .unwrap_or_else(|| Value::Array(Vec::new())),
            status: TemplateStatus::Draft,
            created_at: Utc::now(),
            created_by: actor_id.map(str::to_string),
        };
        self.store.create_template_version(&version)?;
        tracing::info!(
            template_id,
            version = %version.version,
            schema_hash = %version.schema_hash,
            "template version registered"
        );

        Ok(version)
    }

    pub fn get_version(&self, template_id: &str, version: &str) -> Result<TemplateVersion> {
        self.store
            .get_template_version(template_id, version)?
            .ok_or(Error::NotFound)
    }

    pub fn list_versions(&self, template_id: &str) -> Result<Vec<TemplateVersion>> {
        self.get_template(template_id)?;
        self.store.list_template_versions(template_id)
    }

    /// Makes `version` the template's active version. The previous one is deprecated.
    pub fn activate_version(&self, template_id: &str, version: &str) -> Result<DocumentTemplate> {
        let template = self.get_template(template_id)?;
        if template.status == TemplateStatus::Deprecated {
            return Err(Error::Conflict(format!(
                "template {template_id} is deprecated"
            )));
        }

        let target = self.get_version(template_id, version)?;
        let updated = self
            .store
            .activate_template_version(template_id, &target.id)?;
        tracing::info!(template_id, version, "template version activated");

        Ok(updated)
    }

    pub fn deprecate_template(&self, id: &str) -> Result<DocumentTemplate> {
        let template = self.store.deprecate_template(id)?;
        tracing::info!(template_id = id, "template deprecated");
        Ok(template)
    }
}
