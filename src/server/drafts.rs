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
use super::dto::{ApproveSectionRequest, ResolveConflictRequest, UnblockDraftRequest};
use super::json::ApiJson;
use super::response::{ApiError, ApiResponse, StoreResultExt};
use crate::drafts::DraftSave;
use crate::types::ConflictResolution;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Section routes
        .route("/sections/{id}", get(get_section))
        .route("/sections/{id}/approve", post(approve_section))
        .route("/sections/{id}/enter", post(enter_section))
        .route("/sections/{id}/drafts", get(list_drafts).put(save_draft))
        .route("/sections/{id}/conflicts", get(list_section_conflicts))
        // Draft routes
        .route("/drafts/{id}", get(get_draft).delete(delete_draft))
        .route("/drafts/{id}/unblock", post(unblock_draft))
        .route("/drafts/{id}/conflicts", get(list_draft_conflicts))
        // Conflict routes
        .route("/conflicts/{id}/resolve", post(resolve_conflict))
}

async fn get_section(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let section = state
        .documents()
        .get_section(&id)
        .or_not_found("Section not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(section)))
}

async fn approve_section(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ApproveSectionRequest>,
) -> impl IntoResponse {
    let section = state
        .documents()
        .approve_section(&id, &req.content_markdown, &actor)
        .or_not_found("Section not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(section)))
}

/// Entry check for the acting user's draft of a section.
async fn enter_section(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let entry = state
        .drafts()
        .enter_section(&id, &actor, &actor)
        .or_not_found("Section not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(entry)))
}

async fn list_drafts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let drafts = state
        .drafts()
        .list_drafts(&id)
        .or_not_found("Section not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(drafts)))
}

/// Saves a draft. A detected conflict is reported in the draft's state, not as an error.
async fn save_draft(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<DraftSave>,
) -> impl IntoResponse {
    let draft = state
        .drafts()
        .save(&id, &req, &actor)
        .or_not_found("Section not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(draft)))
}

async fn list_section_conflicts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let conflicts = state
        .drafts()
        .list_conflicts_for_section(&id)
        .or_not_found("Section not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(conflicts)))
}

async fn get_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let draft = state
        .drafts()
        .get_draft(&id)
        .or_not_found("Draft not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(draft)))
}

async fn delete_draft(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .drafts()
        .delete_draft(&id, &actor)
        .or_not_found("Draft not found")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

async fn unblock_draft(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<ApiJson<UnblockDraftRequest>>,
) -> impl IntoResponse {
    let req = body.map(|ApiJson(req)| req).unwrap_or_default();
    let draft = state
        .drafts()
        .unblock_draft(&id, req.note, &actor)
        .or_not_found("Draft not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(draft)))
}

async fn list_draft_conflicts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let conflicts = state
        .drafts()
        .list_conflicts_for_draft(&id)
        .or_not_found("Draft not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(conflicts)))
}

async fn resolve_conflict(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<ApiJson<ResolveConflictRequest>>,
) -> impl IntoResponse {
    let req = body.map(|ApiJson(req)| req).unwrap_or_default();
    let resolution = ConflictResolution {
        resolved_by: actor,
        resolution_note: req.resolution_note,
    };
    let log = state
        .drafts()
        .resolve_conflict(&id, &resolution)
        .or_not_found("Conflict not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(log)))
}
