use std::sync::Arc;

use moka::sync::Cache;

use super::Validator;
use crate::error::Result;
use crate::types::TemplateVersion;

type CacheKey = (String, String, String);

/// Compiled validators keyed by (template id, version, schema hash).
///
/// Template versions are immutable, so an entry is valid for as long as it lives.
#[derive(Clone)]
pub struct ValidatorCache {
    inner: Cache<CacheKey, Arc<Validator>>,
}

impl ValidatorCache {
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Returns the compiled validator for `version`, compiling it on first use.
    pub fn get_or_compile(&self, version: &TemplateVersion) -> Result<Arc<Validator>> {
        let key = (
            version.template_id.clone(),
            version.version.clone(),
            version.schema_hash.clone(),
        );
        if let Some(validator) = self.inner.get(&key) {
            return Ok(validator);
        }

        let validator = Arc::new(Validator::compile(&version.schema)?);
        tracing::debug!(
            template_id = %version.template_id,
            version = %version.version,
            "compiled template validator"
        );
        self.inner.insert(key, Arc::clone(&validator));
        Ok(validator)
    }
}
