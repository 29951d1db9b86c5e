use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::response::ApiError;

/// Header through which the upstream session layer names the acting user.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Extractor for the acting user
pub struct Actor(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Actor(v.to_string()))
            .ok_or_else(|| ApiError::unauthorized("x-actor-id header required"))
    }
}
