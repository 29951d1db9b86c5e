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
use super::json::ApiJson;
use super::response::{ApiError, ApiResponse, StoreResultExt};
use crate::catalog::{NewTemplate, NewTemplateVersion};
use crate::error::Error;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/templates", post(create_template).get(list_templates))
        .route("/templates/{id}", get(get_template))
        .route("/templates/{id}/deprecate", post(deprecate_template))
        .route(
            "/templates/{id}/versions",
            post(register_version).get(list_versions),
        )
        .route("/templates/{id}/versions/{version}", get(get_version))
        .route(
            "/templates/{id}/versions/{version}/activate",
            post(activate_version),
        )
}

async fn create_template(
    _actor: Actor,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<NewTemplate>,
) -> impl IntoResponse {
    let template = state.catalog().create_template(&req)?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(template))))
}

async fn list_templates(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let templates = state.catalog().list_templates()?;

    Ok::<_, ApiError>(Json(ApiResponse::success(templates)))
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let template = state
        .catalog()
        .get_template(&id)
        .or_not_found("Template not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(template)))
}

async fn deprecate_template(
    _actor: Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let template = state
        .catalog()
        .deprecate_template(&id)
        .or_not_found("Template not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(template)))
}

async fn register_version(
    Actor(actor): Actor,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<NewTemplateVersion>,
) -> impl IntoResponse {
    let version = state
        .catalog()
        .register_version(&id, &req, Some(&actor))
        .map_err(|err| match err {
            Error::AlreadyExists => ApiError::conflict(format!(
                "Template {id} already has version {}",
                req.version
            )),
            other => ApiError::from(other),
        })?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(version))))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let versions = state
        .catalog()
        .list_versions(&id)
        .or_not_found("Template not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(versions)))
}

async fn get_version(
    State(state): State<Arc<AppState>>,
    Path((id, version)): Path<(String, String)>,
) -> impl IntoResponse {
    let version = state
        .catalog()
        .get_version(&id, &version)
        .or_not_found("Template version not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(version)))
}

async fn activate_version(
    _actor: Actor,
    State(state): State<Arc<AppState>>,
    Path((id, version)): Path<(String, String)>,
) -> impl IntoResponse {
    let template = state
        .catalog()
        .activate_version(&id, &version)
        .or_not_found("Template version not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(template)))
}
