//! HTTP integration tests driving the router in-process.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use common::{body_json, build_test_app, build_test_app_with, design_schema};
use folio::config::{DraftPolicy, ServerConfig};
use folio::store::Store;

fn strict_schema() -> Value {
    let mut schema = design_schema();
    schema["required"] = json!(["introduction", "system_overview", "risks"]);
    schema["properties"]["risks"] = json!({ "type": "array", "items": { "type": "string" } });
    schema
}

fn draft_body(section_id: &str, user: &str, version: i64, base: i64) -> Value {
    json!({
        "sectionId": section_id,
        "documentId": "doc-1",
        "userId": user,
        "draftVersion": version,
        "draftBaseVersion": base,
        "contentMarkdown": format!("# {user} v{version}"),
    })
}

#[tokio::test]
async fn health_returns_ok_and_request_id() {
    let app = build_test_app();
    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn caller_request_id_is_echoed_in_header_and_error_body() {
    let app = build_test_app();
    let request = axum::http::Request::builder()
        .uri("/api/v1/documents/missing")
        .header("x-actor-id", "alice")
        .header("x-request-id", "req-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let json = body_json(response).await;
    assert!(json["data"].is_null());
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    assert_eq!(json["error"]["message"], "Document not found");
    assert_eq!(json["error"]["requestId"], "req-123");
}

#[tokio::test]
async fn missing_actor_is_rejected() {
    let app = build_test_app();
    let response = app
        .request(Method::GET, "/api/v1/documents/doc-1", None, None)
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
    assert!(json["error"]["requestId"].is_string());
}

#[tokio::test]
async fn open_current_document_is_noop() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;

    let response = app.get("/api/v1/documents/doc-1").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(
        json["data"]["templateDecision"],
        json!({ "action": "noop", "reason": "up_to_date" })
    );
    assert!(json["data"]["migration"].is_null());
    assert_eq!(json["data"]["document"]["templateVersion"], "1.0.0");
    assert!(json["error"].is_null());
}

#[tokio::test]
async fn open_upgrades_document_to_active_version() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;

    let mut relaxed = design_schema();
    relaxed["properties"]["appendix"] = json!({ "type": "string" });
    app.register_version("1.1.0", relaxed).await;
    app.activate_version("1.1.0").await;

    let json = body_json(app.get("/api/v1/documents/doc-1").await).await;
    assert_eq!(
        json["data"]["templateDecision"],
        json!({
            "action": "upgrade",
            "reason": "out_of_date",
            "currentVersion": "1.0.0",
            "targetVersion": "1.1.0"
        })
    );
    assert_eq!(json["data"]["document"]["templateVersion"], "1.1.0");
    assert_eq!(json["data"]["migration"]["status"], "succeeded");
    assert_eq!(json["data"]["migration"]["fromVersion"], "1.0.0");

    let history = body_json(app.get("/api/v1/documents/doc-1/migrations").await).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_upgrade_reports_issues_and_leaves_document_alone() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    app.register_version("2.0.0", strict_schema()).await;
    app.activate_version("2.0.0").await;

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let response = app.get("/api/v1/documents/doc-1").await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        bodies.push(body_json(response).await);
    }

    let error = &bodies[0]["error"];
    assert_eq!(error["code"], "TEMPLATE_VALIDATION_FAILED");
    assert_eq!(
        error["details"]["issues"],
        json!([{ "path": ["risks"], "message": "Required", "code": "invalid_type" }])
    );
    assert_eq!(bodies[0]["error"]["details"], bodies[1]["error"]["details"]);

    let history = body_json(app.get("/api/v1/documents/doc-1/migrations").await).await;
    let history = history["data"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|m| m["status"] == "failed"));

    let doc = app.store.get_document("doc-1").unwrap().unwrap();
    assert_eq!(doc.template_version, "1.0.0");
}

#[tokio::test]
async fn open_with_removed_version_is_blocked() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    app.store
        .connection()
        .execute(
            "UPDATE documents SET template_version = '0.1.0' WHERE id = 'doc-1'",
            [],
        )
        .unwrap();

    let response = app.get("/api/v1/documents/doc-1").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "TEMPLATE_VERSION_REMOVED");
    assert_eq!(json["error"]["templateId"], "tpl-1");
    assert_eq!(json["error"]["missingVersion"], "0.1.0");
    assert!(json["error"]["requestId"].is_string());
}

#[tokio::test]
async fn create_document_validates_content() {
    let app = build_test_app();
    app.seed_template().await;

    let response = app
        .post(
            "/api/v1/documents",
            "alice",
            json!({
                "projectId": "proj-1",
                "title": "Design",
                "templateId": "tpl-1",
                "content": { "introduction": "Hi", "system_overview": {} }
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = body_json(response).await;
    assert_eq!(
        json["error"]["details"]["issues"][0]["path"],
        json!(["system_overview", "tech_stack"])
    );
}

#[tokio::test]
async fn duplicate_template_version_conflicts() {
    let app = build_test_app();
    app.seed_template().await;

    let response = app
        .post(
            "/api/v1/templates/tpl-1/versions",
            "author",
            json!({ "version": "1.0.0", "schema": design_schema() }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn patch_and_delete_document() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;

    let response = app
        .request(
            Method::PATCH,
            "/api/v1/documents/doc-1",
            Some("bob"),
            Some(json!({ "content": { "introduction": 1 } })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .request(Method::DELETE, "/api/v1/documents/doc-1", Some("bob"), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get("/api/v1/documents/doc-1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stale_draft_base_requires_rebase_without_failing_save() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    let section_id = app.seed_section().await;
    let uri = format!("/api/v1/sections/{section_id}/drafts");

    app.approve(&section_id, 2).await;
    let response = app.put(&uri, "alice", draft_body(&section_id, "alice", 1, 2)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let draft = body_json(response).await;
    assert_eq!(draft["data"]["conflictState"], "clean");
    let draft_id = draft["data"]["id"].as_str().unwrap().to_string();

    app.approve(&section_id, 3).await;
    let response = app.put(&uri, "alice", draft_body(&section_id, "alice", 2, 2)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let draft = body_json(response).await;
    assert_eq!(draft["data"]["conflictState"], "rebase_required");
    assert_eq!(draft["data"]["contentMarkdown"], "# alice v2");

    let conflicts =
        body_json(app.get(&format!("/api/v1/drafts/{draft_id}/conflicts")).await).await;
    let conflicts = conflicts["data"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["previousApprovedVersion"], 2);
    assert_eq!(conflicts[0]["latestApprovedVersion"], 5);
    assert_eq!(conflicts[0]["detectedDuring"], "save");

    let response = app.put(&uri, "alice", draft_body(&section_id, "alice", 3, 5)).await;
    let draft = body_json(response).await;
    assert_eq!(draft["data"]["conflictState"], "rebased");
    assert!(draft["data"]["rebasedAt"].is_string());
}

#[tokio::test]
async fn draft_annotations_round_trip() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    let section_id = app.seed_section().await;
    let uri = format!("/api/v1/sections/{section_id}/drafts");

    let mut body = draft_body(&section_id, "alice", 1, 0);
    body["formattingAnnotations"] = json!([
        { "startOffset": 0, "endOffset": 5, "markType": "heading", "message": "too long", "severity": "warning" }
    ]);
    let draft = body_json(app.put(&uri, "alice", body.clone()).await).await;
    assert_eq!(draft["data"]["formattingAnnotations"].as_array().unwrap().len(), 1);
    let draft_id = draft["data"]["id"].as_str().unwrap().to_string();

    body["draftVersion"] = json!(2);
    body["formattingAnnotations"] = json!([
        { "startOffset": 2, "endOffset": 4, "markType": "bold", "message": "nested bold", "severity": "error" },
        { "startOffset": 6, "endOffset": 9, "markType": "link", "message": "bare url", "severity": "warning" }
    ]);
    app.put(&uri, "alice", body.clone()).await;

    let draft = body_json(app.get(&format!("/api/v1/drafts/{draft_id}")).await).await;
    let annotations = draft["data"]["formattingAnnotations"].as_array().unwrap();
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0]["markType"], "bold");
    assert_eq!(annotations[1]["markType"], "link");

    body["draftVersion"] = json!(3);
    body["formattingAnnotations"] = json!([{ "startOffset": 4, "endOffset": 4, "markType": "x", "message": "", "severity": "error" }]);
    let response = app.put(&uri, "alice", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn replayed_and_stale_saves() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    let section_id = app.seed_section().await;
    let uri = format!("/api/v1/sections/{section_id}/drafts");

    let first = body_json(app.put(&uri, "alice", draft_body(&section_id, "alice", 2, 0)).await).await;
    let replay = body_json(app.put(&uri, "alice", draft_body(&section_id, "alice", 2, 0)).await).await;
    assert_eq!(first["data"]["updatedAt"], replay["data"]["updatedAt"]);

    let response = app.put(&uri, "alice", draft_body(&section_id, "alice", 1, 0)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.put(&uri, "alice", draft_body(&section_id, "alice", 3, 7)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blocked_draft_is_released_by_unblock() {
    let app = build_test_app_with(ServerConfig {
        drafts: DraftPolicy {
            blocked_after_open_conflicts: 1,
        },
        ..ServerConfig::default()
    });
    app.seed_template().await;
    app.seed_document().await;
    let section_id = app.seed_section().await;
    let uri = format!("/api/v1/sections/{section_id}/drafts");

    let draft = body_json(app.put(&uri, "alice", draft_body(&section_id, "alice", 1, 0)).await).await;
    let draft_id = draft["data"]["id"].as_str().unwrap().to_string();
    app.approve(&section_id, 1).await;

    let entry = body_json(
        app.post(&format!("/api/v1/sections/{section_id}/enter"), "alice", json!({}))
            .await,
    )
    .await;
    assert_eq!(entry["data"]["draft"]["conflictState"], "blocked");
    assert_eq!(entry["data"]["conflict"]["detectedDuring"], "entry");

    let response = app
        .post(
            &format!("/api/v1/drafts/{draft_id}/unblock"),
            "lead",
            json!({ "note": "discussed offline" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let draft = body_json(response).await;
    assert_eq!(draft["data"]["conflictState"], "rebase_required");

    let conflicts =
        body_json(app.get(&format!("/api/v1/sections/{section_id}/conflicts")).await).await;
    assert_eq!(conflicts["data"][0]["resolvedBy"], "lead");
    assert_eq!(conflicts["data"][0]["resolutionNote"], "discussed offline");
}

#[tokio::test]
async fn conflict_resolution_and_history_after_delete() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    let section_id = app.seed_section().await;
    let uri = format!("/api/v1/sections/{section_id}/drafts");

    let draft = body_json(app.put(&uri, "bob", draft_body(&section_id, "bob", 1, 0)).await).await;
    let draft_id = draft["data"]["id"].as_str().unwrap().to_string();
    app.approve(&section_id, 1).await;
    app.put(&uri, "bob", draft_body(&section_id, "bob", 2, 0)).await;

    let conflicts =
        body_json(app.get(&format!("/api/v1/drafts/{draft_id}/conflicts")).await).await;
    let conflict_id = conflicts["data"][0]["id"].as_str().unwrap().to_string();

    let resolve_uri = format!("/api/v1/conflicts/{conflict_id}/resolve");
    let response = app
        .post(&resolve_uri, "lead", json!({ "resolutionNote": "accepted" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.post(&resolve_uri, "lead", json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/drafts/{draft_id}"),
            Some("bob"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let drafts = body_json(app.get(&uri).await).await;
    assert!(drafts["data"].as_array().unwrap().is_empty());

    let conflicts =
        body_json(app.get(&format!("/api/v1/drafts/{draft_id}/conflicts")).await).await;
    assert_eq!(conflicts["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_body_uses_error_envelope() {
    let app = build_test_app();
    app.seed_template().await;
    app.seed_document().await;
    let section_id = app.seed_section().await;

    let request = axum::http::Request::builder()
        .method(Method::PUT)
        .uri(format!("/api/v1/sections/{section_id}/drafts"))
        .header("x-actor-id", "alice")
        .header("x-request-id", "req-bad-body")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{\"sectionId\": "))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["data"].is_null());
    assert_eq!(json["error"]["code"], "INVALID_BODY");
    assert_eq!(json["error"]["requestId"], "req-bad-body");

    let response = app
        .put(
            &format!("/api/v1/sections/{section_id}/drafts"),
            "alice",
            json!({ "sectionId": section_id }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "INVALID_BODY");
    assert!(json["error"]["requestId"].is_string());
}

#[tokio::test]
async fn malformed_optional_body_is_rejected() {
    let app = build_test_app();
    let response = app
        .post(
            "/api/v1/conflicts/missing/resolve",
            "lead",
            json!({ "resolutionNote": 42 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "INVALID_BODY");
}
