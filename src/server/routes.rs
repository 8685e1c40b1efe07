// src/server/routes.rs

//! HTTP routes: the proxied API, the counters page and process metrics.

use super::AppState;
use crate::core::cache::{GeoRequest, ProxyResponse};
use crate::core::metrics::gather_metrics;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing::{error, warn};

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = (status, self.body).into_response();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => warn!("Dropping invalid response header '{name}'"),
            }
        }
        response
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/maps/api/{*rest}", get(proxy_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler));
    if state.prometheus_enabled {
        router = router.route("/prometheus", get(prometheus_handler));
    }
    router.with_state(state)
}

async fn proxy_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let request = GeoRequest::from_raw_query(uri.path(), uri.query());
    match state.manager.handle(&request).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            error!("Request for {} failed: {e}", request.path);
            ProxyResponse::from_error(&e).into_response()
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.manager.metrics().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            error!("Failed to read metrics: {e}");
            ProxyResponse::from_error(&e).into_response()
        }
    }
}

async fn stats_handler() -> impl IntoResponse {
    (StatusCode::FOUND, [(LOCATION, "/metrics")])
}

async fn prometheus_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
