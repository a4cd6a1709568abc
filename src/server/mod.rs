//! HTTP surface
//!
//! `POST /render` turns a JSON [`RenderRequest`] into image bytes;
//! `GET /health` reports pool occupancy.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::browser_pool::PoolStats;
use crate::engine::EngineLauncher;
use crate::render::{RenderError, RenderRequest, RenderResponse, RenderService};

/// Build the service router
pub fn router<L: EngineLauncher>(service: Arc<RenderService<L>>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/render", post(render_handler::<L>))
        .route("/health", get(health_handler::<L>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(service)
}

async fn render_handler<L: EngineLauncher>(
    State(service): State<Arc<RenderService<L>>>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Response {
    let response = match payload {
        Ok(Json(request)) => service.render(request).await,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected malformed render request");
            RenderResponse::error(&RenderError::BadRequest(rejection.body_text()), Uuid::new_v4())
        }
    };
    into_http(response)
}

fn into_http(response: RenderResponse) -> Response {
    let mut http = (response.status, response.body).into_response();
    let headers = http.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(response.content_type),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    http
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pool: PoolStats,
}

async fn health_handler<L: EngineLauncher>(
    State(service): State<Arc<RenderService<L>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let pool = service.pool().stats();
    let (status, label) = if pool.shutting_down {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            pool,
        }),
    )
}
