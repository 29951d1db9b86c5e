use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::request_id::current_request_id;
use crate::error::{Error, Result as StoreResult};

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<Value>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// API error that converts to a proper HTTP response.
///
/// Rendered as `{"data": null, "error": {code, message, requestId, details?, ...fields}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    /// Extra top-level members of the error object.
    pub fields: Map<String, Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => ApiError::not_found("Not found"),
            Error::AlreadyExists => {
                Self::new(StatusCode::CONFLICT, "ALREADY_EXISTS", "Already exists")
            }
            Error::BadRequest(message) => ApiError::bad_request(message),
            Error::Conflict(message) => ApiError::conflict(message),
            Error::TemplateVersionRemoved {
                template_id,
                missing_version,
            } => Self::new(
                StatusCode::CONFLICT,
                "TEMPLATE_VERSION_REMOVED",
                format!("Template {template_id} no longer has version {missing_version}"),
            )
            .with_field("templateId", template_id)
            .with_field("missingVersion", missing_version),
            Error::TemplateValidationFailed {
                template_id,
                version,
                issues,
            } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "TEMPLATE_VALIDATION_FAILED",
                format!("Content does not satisfy template {template_id} version {version}"),
            )
            .with_details(json!({ "issues": issues })),
            err @ (Error::InvalidSchema { .. } | Error::TemplateConfiguration(_)) => {
                tracing::error!("{err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TEMPLATE_CONFIGURATION",
                    err.to_string(),
                )
            }
            err => {
                tracing::error!("{err}");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "INVALID_BODY", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = self.fields;
        error.insert("code".to_string(), Value::from(self.code));
        error.insert("message".to_string(), Value::from(self.message));
        if let Some(details) = self.details {
            error.insert("details".to_string(), details);
        }
        if let Some(request_id) = current_request_id() {
            error.insert("requestId".to_string(), Value::from(request_id));
        }

        let body = json!({ "data": null, "error": error });
        (self.status, Json(body)).into_response()
    }
}

/// Maps a missing entity to a 404 with a specific message; other errors convert as usual.
pub trait StoreResultExt<T> {
    fn or_not_found(self, message: &'static str) -> Result<T, ApiError>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn or_not_found(self, message: &'static str) -> Result<T, ApiError> {
        self.map_err(|err| match err {
            Error::NotFound => ApiError::not_found(message),
            other => ApiError::from(other),
        })
    }
}
