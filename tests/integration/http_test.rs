// tests/integration/http_test.rs

//! The HTTP surface end to end: router, cache manager and the reqwest
//! upstream client talking to a local fake of the upstream API.

use super::test_helpers::*;
use axum::Router;
use axum::extract::RawQuery;
use axum::http::StatusCode;
use axum::routing::get;
use geocache::core::cache::{CacheManager, CacheSettings, LocalResolver};
use geocache::core::metrics::UPSTREAM_LATENCY_SECONDS;
use geocache::core::store::MemoryStore;
use geocache::core::upstream::{HttpUpstream, UpstreamClient};
use geocache::server::{AppState, router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Serves `app` on an ephemeral port and returns its base URL.
async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A stand-in for the upstream API that records the raw query of each call.
async fn fake_upstream(seen: Arc<Mutex<Vec<String>>>) -> String {
    let app = Router::new()
        .route(
            "/maps/api/geocode/json",
            get(move |RawQuery(query): RawQuery| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(query.unwrap_or_default());
                    axum::Json(json!({
                        "results": [{"formatted_address": "Paris, France"}],
                        "status": "OK"
                    }))
                }
            }),
        )
        .route(
            "/maps/api/broken/json",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    spawn(app).await
}

struct Proxy {
    base: String,
    client: reqwest::Client,
    store: Arc<MemoryStore>,
    upstream_queries: Arc<Mutex<Vec<String>>>,
}

async fn start_proxy(api_key: Option<&str>, prometheus_enabled: bool) -> Proxy {
    let upstream_queries = Arc::new(Mutex::new(Vec::new()));
    let upstream_base = fake_upstream(upstream_queries.clone()).await;

    let settings = CacheSettings {
        upstream_base,
        api_key: api_key.map(str::to_string),
        ..test_settings()
    };
    let store = Arc::new(MemoryStore::new());
    let manager = CacheManager::new(
        settings,
        store.clone(),
        Arc::new(HttpUpstream::new(Duration::from_secs(5)).unwrap()),
        LocalResolver::new(Arc::new(FixedTimezone(vec!["Europe/Paris"]))),
    );
    let state = AppState {
        manager: Arc::new(manager),
        prometheus_enabled,
    };
    let base = spawn(router(state)).await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    Proxy {
        base,
        client,
        store,
        upstream_queries,
    }
}

impl Proxy {
    async fn get(&self, path_and_query: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path_and_query}", self.base))
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_http_upstream_reports_status_and_body() {
    let upstream = fake_upstream(Arc::default()).await;
    let client = HttpUpstream::new(Duration::from_secs(5)).unwrap();

    let ok = client
        .get(&format!("{upstream}/maps/api/geocode/json?address=Paris"))
        .await
        .unwrap();
    assert_eq!(ok.status, 200);
    let body: Value = serde_json::from_str(&ok.body).unwrap();
    assert_eq!(body["status"], "OK");

    let broken = client
        .get(&format!("{upstream}/maps/api/broken/json"))
        .await
        .unwrap();
    assert_eq!(broken.status, 500);
    assert_eq!(broken.status_text, "Internal Server Error");
}

#[tokio::test]
async fn test_http_upstream_connection_failure_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let observed_before = UPSTREAM_LATENCY_SECONDS.get_sample_count();
    let client = HttpUpstream::new(Duration::from_secs(1)).unwrap();
    let err = client
        .get(&format!("http://{addr}/maps/api/geocode/json"))
        .await
        .unwrap_err();
    assert!(matches!(err, geocache::core::GeoCacheError::Upstream(_)));
    // Other tests share the histogram, so only growth is asserted.
    assert!(UPSTREAM_LATENCY_SECONDS.get_sample_count() > observed_before);
}

#[tokio::test]
async fn test_proxy_miss_then_hit() {
    let proxy = start_proxy(Some(TEST_KEY), false).await;

    let first = proxy
        .get("/maps/api/geocode/json?address=Paris%2C+France")
        .await;
    assert_eq!(first.status(), 200);
    assert_eq!(
        first.headers()["content-type"],
        "application/json; charset=UTF-8"
    );
    let first_body = first.text().await.unwrap();
    assert!(first_body.ends_with("}\n"));

    let second = proxy
        .get("/maps/api/geocode/json?address=Paris%2C+France")
        .await;
    assert_eq!(second.text().await.unwrap(), first_body);

    assert_eq!(
        *proxy.upstream_queries.lock(),
        vec![format!("key={TEST_KEY}&address=Paris%2C%20France")]
    );
    // Legacy probe, read and write for the miss; legacy probe and read for the hit.
    assert_eq!(proxy.store.executed_batches(), 5);
}

#[tokio::test]
async fn test_proxy_forwards_upstream_status_text() {
    let proxy = start_proxy(Some(TEST_KEY), false).await;

    let response = proxy.get("/maps/api/broken/json?x=1").await;

    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Internal Server Error\n");
}

#[tokio::test]
async fn test_proxy_rejects_requests_without_credential() {
    let proxy = start_proxy(None, false).await;

    let rejected = proxy.get("/maps/api/geocode/json?address=Paris").await;
    assert_eq!(rejected.status(), 401);
    assert_eq!(rejected.text().await.unwrap(), "Unauthorized\n");

    let accepted = proxy
        .get("/maps/api/geocode/json?address=Paris&key=caller")
        .await;
    assert_eq!(accepted.status(), 200);
    assert_eq!(
        *proxy.upstream_queries.lock(),
        vec!["address=Paris&key=caller".to_string()]
    );
}

#[tokio::test]
async fn test_timezone_is_answered_locally_over_http() {
    let proxy = start_proxy(Some(TEST_KEY), false).await;

    let response = proxy
        .get("/maps/api/timezone/json?location=48.8566%2C2.3522&timestamp=0")
        .await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "OK", "timeZoneId": "Europe/Paris"}));
    assert!(proxy.upstream_queries.lock().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint_reports_counters() {
    let proxy = start_proxy(Some(TEST_KEY), false).await;
    proxy.get("/maps/api/geocode/json?address=Paris").await;
    proxy.get("/maps/api/geocode/json?address=Paris").await;

    let response = proxy.get("/metrics").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "getCount": {GEOCODE_PATH: 2},
            "setCount": {GEOCODE_PATH: 1},
            "migrateCount": {}
        })
    );
}

#[tokio::test]
async fn test_stats_redirects_to_metrics() {
    let proxy = start_proxy(Some(TEST_KEY), false).await;

    let response = proxy.get("/stats").await;

    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], "/metrics");
}

#[tokio::test]
async fn test_prometheus_endpoint_is_optional() {
    let disabled = start_proxy(Some(TEST_KEY), false).await;
    assert_eq!(disabled.get("/prometheus").await.status(), 404);

    let enabled = start_proxy(Some(TEST_KEY), true).await;
    enabled.get("/maps/api/geocode/json?address=Paris").await;
    let response = enabled.get("/prometheus").await;
    assert_eq!(response.status(), 200);
    assert!(
        response
            .text()
            .await
            .unwrap()
            .contains("geocache_requests_total")
    );
}
