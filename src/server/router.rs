use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::request_id::{REQUEST_ID_HEADER, assign_request_id};
use super::{documents, drafts, templates};
use crate::binding::DocumentService;
use crate::catalog::TemplateCatalog;
use crate::config::{DraftPolicy, ServerConfig};
use crate::drafts::DraftService;
use crate::store::Store;
use crate::validator::ValidatorCache;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub validators: ValidatorCache,
    pub policy: DraftPolicy,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &ServerConfig) -> Self {
        Self {
            store,
            validators: ValidatorCache::new(config.validator_cache_capacity),
            policy: config.drafts,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> TemplateCatalog {
        TemplateCatalog::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn documents(&self) -> DocumentService {
        DocumentService::new(Arc::clone(&self.store), self.validators.clone())
    }

    #[must_use]
    pub fn drafts(&self) -> DraftService {
        DraftService::new(Arc::clone(&self.store), self.policy)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info!(
        request_id,
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(templates::router())
        .merge(documents::router())
        .merge(drafts::router());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        // Outermost last, so the request log sees the echoed request id.
        .layer(middleware::from_fn(assign_request_id))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
