//! HTTP surface: health, transport envelope, REST routes and server-side rendering

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use marginalia::config::{Config, DatabaseConfig};
use marginalia::db::RecordStore;
use marginalia::routes::build_router;
use marginalia::state::AppState;

async fn app() -> Router {
    let mut config = Config::default();
    config.database = DatabaseConfig::in_memory();
    let store = RecordStore::open(&config.database).await.unwrap();
    build_router(AppState::new(config, store))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_database() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn transport_round_trip() {
    let app = app().await;

    let (status, created) = send(
        &app,
        "POST",
        "/api/v1/transport",
        Some(json!({
            "type": "create",
            "payload": { "url": "https://example.com/", "originalText": "hello world" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["success"], true);
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (_, fetched) = send(
        &app,
        "POST",
        "/api/v1/transport",
        Some(json!({ "type": "get", "payload": { "id": id } })),
    )
    .await;
    assert_eq!(fetched["data"], created["data"]);

    let (_, unknown) = send(
        &app,
        "POST",
        "/api/v1/transport",
        Some(json!({ "type": "screenshot", "payload": {} })),
    )
    .await;
    assert_eq!(unknown["success"], false);
    assert_eq!(unknown["error"]["code"], "unknown_operation");
}

#[tokio::test]
async fn rest_crud_and_not_found() {
    let app = app().await;

    let (status, record) = send(
        &app,
        "POST",
        "/api/v1/annotations",
        Some(json!({ "url": "https://example.com/a", "originalText": "some passage" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = record["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/annotations/{}", id);

    let (status, updated) = send(
        &app,
        "PATCH",
        &uri,
        Some(json!({ "status": "archived" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "archived");

    let (status, listed) = send(
        &app,
        "GET",
        "/api/v1/annotations?url=https%3A%2F%2Fexample.com%2Fa&status=archived",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn invalid_transition_is_conflict() {
    let app = app().await;
    let (_, record) = send(
        &app,
        "POST",
        "/api/v1/annotations",
        Some(json!({ "url": "https://example.com/a", "originalText": "some passage" })),
    )
    .await;
    let uri = format!("/api/v1/annotations/{}", record["id"].as_str().unwrap());

    send(&app, "PATCH", &uri, Some(json!({ "status": "deleted" }))).await;
    let (status, body) = send(&app, "PATCH", &uri, Some(json!({ "status": "active" }))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn render_injects_markers_for_url() {
    let app = app().await;
    send(
        &app,
        "POST",
        "/api/v1/annotations",
        Some(json!({ "id": "m1", "url": "https://example.com/r", "originalText": "marked text" })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/render",
        Some(json!({
            "url": "https://example.com/r",
            "html": "<div><p>Some marked text here</p><p>plain</p></div>"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["injectedCount"], 1);
    let html = body["html"].as_str().unwrap();
    assert!(html.contains("data-annotation-id=\"m1\""));
    assert!(html.contains("<p>plain</p>"));
}
