mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::*;
use kodegen_tools_screenshot::{RenderService, router};
use std::sync::Arc;
use tower::ServiceExt;

const BODY_LIMIT: usize = 64 * 1024;

fn app(script: Script) -> (axum::Router, Arc<RenderService<FakeLauncher>>) {
    let (pool, _fake) = fake_pool(1, 2, script);
    let service = Arc::new(RenderService::new(
        pool,
        timeouts_ms(1_000, 1_000, 1_000, 5_000),
    ));
    (router(Arc::clone(&service), BODY_LIMIT), service)
}

fn post_render(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/render")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request")
}

#[tokio::test]
async fn test_post_render_returns_image_bytes() {
    let (app, _service) = app(Script::default());

    let response = app
        .oneshot(post_render(r#"{"html":"<p>hi</p>","width":800,"height":600}"#))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body = to_bytes(response.into_body(), BODY_LIMIT).await.expect("body");
    assert_eq!(&body[..], PNG_MAGIC);
}

#[tokio::test]
async fn test_type_alias_selects_jpeg() {
    let (app, _service) = app(Script::default());

    let response = app
        .oneshot(post_render(r#"{"url":"https://example.com","type":"jpeg"}"#))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (app, service) = app(Script::default());

    let response = app
        .oneshot(post_render("{not json"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let body = to_bytes(response.into_body(), BODY_LIMIT).await.expect("body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["error"], "bad_request");
    assert_eq!(service.pool().stats().browsers, 0);
}

#[tokio::test]
async fn test_missing_source_is_bad_request() {
    let (app, _service) = app(Script::default());

    let response = app
        .oneshot(post_render(r#"{"width":640}"#))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (app, _service) = app(Script::default());
    let html = "x".repeat(BODY_LIMIT * 2);
    let payload = serde_json::json!({ "html": html }).to_string();

    let response = app.oneshot(post_render(payload)).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_navigation_failure_maps_to_unavailable() {
    let (app, _service) = app(Script {
        fail_navigation: true,
        ..Script::default()
    });

    let response = app
        .oneshot(post_render(r#"{"url":"https://missing.invalid"}"#))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(response.into_body(), BODY_LIMIT).await.expect("body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["error"], "navigation_failed");
}

#[tokio::test]
async fn test_health_reports_pool_stats() {
    let (app, service) = app(Script::default());
    service.pool().warmup(1).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), BODY_LIMIT).await.expect("body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pool"]["browsers"], 1);
    assert_eq!(json["pool"]["capacity"], 2);
    assert_eq!(json["pool"]["activeLeases"], 0);
}

#[tokio::test]
async fn test_health_after_shutdown_is_unavailable() {
    let (app, service) = app(Script::default());
    service.pool().shutdown().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(response.into_body(), BODY_LIMIT).await.expect("body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["status"], "shutting_down");
}
