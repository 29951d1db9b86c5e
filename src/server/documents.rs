use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use super::AppState;
use super::actor::Actor;
use super::dto::UpdateDocumentRequest;
use super::json::ApiJson;
use super::response::{ApiError, ApiResponse, StoreResultExt};
use crate::binding::{NewDocument, NewSection};
use crate::error::Error;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents", post(create_document))
        .route(
            "/documents/{id}",
            get(open_document)
                .patch(update_document)
                .delete(delete_document),
        )
        .route("/documents/{id}/migrations", get(list_migrations))
        .route(
            "/documents/{id}/sections",
            post(create_section).get(list_sections),
        )
}

async fn create_document(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<NewDocument>,
) -> impl IntoResponse {
    let document = state
        .documents()
        .create_document(&req, &actor)
        .or_not_found("Template not found")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(document))))
}

/// Opens a document, upgrading its template binding first when possible.
async fn open_document(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let opened = state
        .documents()
        .open_document(&id, &actor)
        .or_not_found("Document not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(opened)))
}

async fn update_document(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateDocumentRequest>,
) -> impl IntoResponse {
    let document = state
        .documents()
        .update_content(&id, &req.content, &actor)
        .or_not_found("Document not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(document)))
}

async fn delete_document(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .documents()
        .delete_document(&id, &actor)
        .or_not_found("Document not found")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

async fn list_migrations(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let migrations = state
        .documents()
        .list_migrations(&id)
        .or_not_found("Document not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(migrations)))
}

async fn create_section(
    _actor: Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<NewSection>,
) -> impl IntoResponse {
    let section = state
        .documents()
        .create_section(&id, &req)
        .map_err(|err| match err {
            Error::AlreadyExists => ApiError::conflict(format!(
                "Document already has a section '{}'",
                req.section_key
            )),
            Error::NotFound => ApiError::not_found("Document not found"),
            other => ApiError::from(other),
        })?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(section))))
}

async fn list_sections(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let sections = state
        .documents()
        .list_sections(&id)
        .or_not_found("Document not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(sections)))
}
