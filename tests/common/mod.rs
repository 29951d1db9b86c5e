#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header::CONTENT_TYPE};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use folio::config::ServerConfig;
use folio::server::{ACTOR_HEADER, AppState, create_router};
use folio::store::{SqliteStore, Store};

pub struct TestApp {
    _temp_dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub router: Router,
}

/// Builds the full router over a fresh database in a temp directory.
pub fn build_test_app() -> TestApp {
    build_test_app_with(ServerConfig::default())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let temp_dir = TempDir::new().expect("create temp dir");
    let store = Arc::new(SqliteStore::new(temp_dir.path().join("folio.db")).expect("open store"));
    store.initialize().expect("initialize store");

    let state = Arc::new(AppState::new(store.clone(), &config));
    TestApp {
        _temp_dir: temp_dir,
        store,
        router: create_router(state),
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header(ACTOR_HEADER, actor);
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Method::GET, uri, Some("alice"), None).await
    }

    pub async fn post(&self, uri: &str, actor: &str, body: Value) -> Response<Body> {
        self.request(Method::POST, uri, Some(actor), Some(body)).await
    }

    pub async fn put(&self, uri: &str, actor: &str, body: Value) -> Response<Body> {
        self.request(Method::PUT, uri, Some(actor), Some(body)).await
    }

    /// Creates `tpl-1` with version 1.0.0 active, requiring an introduction and
    /// a system overview with a tech stack.
    pub async fn seed_template(&self) {
        let response = self
            .post(
                "/api/v1/templates",
                "author",
                json!({ "id": "tpl-1", "name": "Solution design", "documentType": "design" }),
            )
            .await;
        assert_eq!(response.status(), 201);

        self.register_version("1.0.0", design_schema()).await;
        self.activate_version("1.0.0").await;
    }

    pub async fn register_version(&self, version: &str, schema: Value) {
        let response = self
            .post(
                "/api/v1/templates/tpl-1/versions",
                "author",
                json!({ "version": version, "schema": schema }),
            )
            .await;
        assert_eq!(response.status(), 201);
    }

    pub async fn activate_version(&self, version: &str) {
        let response = self
            .post(
                &format!("/api/v1/templates/tpl-1/versions/{version}/activate"),
                "author",
                json!({}),
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    pub async fn seed_document(&self) {
        let response = self
            .post(
                "/api/v1/documents",
                "alice",
                json!({
                    "id": "doc-1",
                    "projectId": "proj-1",
                    "title": "Design",
                    "templateId": "tpl-1",
                    "content": { "introduction": "Hi", "system_overview": { "tech_stack": "React" } }
                }),
            )
            .await;
        assert_eq!(response.status(), 201);
    }

    /// Creates a section of `doc-1` and returns its id.
    pub async fn seed_section(&self) -> String {
        let response = self
            .post(
                "/api/v1/documents/doc-1/sections",
                "alice",
                json!({ "sectionKey": "introduction", "title": "Introduction" }),
            )
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await["data"]["id"]
            .as_str()
            .expect("section id")
            .to_string()
    }

    pub async fn approve(&self, section_id: &str, times: usize) {
        for _ in 0..times {
            let response = self
                .post(
                    &format!("/api/v1/sections/{section_id}/approve"),
                    "lead",
                    json!({ "contentMarkdown": "# Approved" }),
                )
                .await;
            assert_eq!(response.status(), 200);
        }
    }
}

pub fn design_schema() -> Value {
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

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("body is json")
}
