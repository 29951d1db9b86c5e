use thiserror::Error;

use crate::validator::Issue;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored template schema cannot be compiled. Authoring-time corruption, not a document error.
    #[error("invalid template schema at {path}: {message}")]
    InvalidSchema { path: String, message: String },

    /// Catalog state the binding engine relies on is missing or inconsistent.
    #[error("template configuration error: {0}")]
    TemplateConfiguration(String),

    #[error("template {template_id} has no version {missing_version}")]
    TemplateVersionRemoved {
        template_id: String,
        missing_version: String,
    },

    #[error("content does not satisfy template {template_id} version {version}")]
    TemplateValidationFailed {
        template_id: String,
        version: String,
        issues: Vec<Issue>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
