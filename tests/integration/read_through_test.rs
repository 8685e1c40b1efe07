// tests/integration/read_through_test.rs

//! Read-through behaviour: misses, hits, TTL policy and upstream failures.

use super::test_helpers::*;
use geocache::core::GeoCacheError;
use geocache::core::cache::{GeoRequest, JSON_CONTENT_TYPE, MetricsSnapshot};
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_miss_fetches_upstream_and_caches_with_standard_ttl() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({
        "results": [{"formatted_address": "Paris, France"}],
        "status": "OK"
    }));

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some(JSON_CONTENT_TYPE));
    assert_eq!(
        response.body,
        "{\n  \"results\": [\n    {\n      \"formatted_address\": \"Paris, France\"\n    }\n  ],\n  \"status\": \"OK\"\n}\n"
    );

    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    assert_eq!(
        ctx.store.peek(&key).as_deref(),
        Some(r#"{"results":[{"formatted_address":"Paris, France"}],"status":"OK"}"#)
    );
    assert_eq!(ctx.store.ttl(&key), Some(Duration::from_secs(EXPIRE_SECONDS)));

    let metrics = ctx.metrics().await;
    assert_eq!(metrics.set_count.get(GEOCODE_PATH), Some(&1));
    assert_eq!(metrics.get_count.get(GEOCODE_PATH), Some(&1));
    assert!(metrics.migrate_count.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeat_request_is_served_from_cache_and_refreshes_ttl() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({"status": "OK", "results": []}));

    let first = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;
    tokio::time::advance(Duration::from_secs(1000)).await;

    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    assert_eq!(
        ctx.store.ttl(&key),
        Some(Duration::from_secs(EXPIRE_SECONDS - 1000))
    );

    let second = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(first, second);
    assert_eq!(ctx.upstream.call_count(), 1);
    assert_eq!(ctx.store.ttl(&key), Some(Duration::from_secs(EXPIRE_SECONDS)));

    let metrics = ctx.metrics().await;
    assert_eq!(metrics.get_count.get(GEOCODE_PATH), Some(&2));
    assert_eq!(metrics.set_count.get(GEOCODE_PATH), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_zero_results_use_the_short_ttl() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({"status": "ZERO_RESULTS", "results": []}));

    let response = ctx.request(GEOCODE_PATH, &[("address", "nowhere")]).await;
    assert_eq!(response.status, 200);
    assert_eq!(body_json(&response)["status"], "ZERO_RESULTS");

    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "nowhere")]).current.to_string();
    assert_eq!(
        ctx.store.ttl(&key),
        Some(Duration::from_secs(SHORT_EXPIRE_SECONDS))
    );
}

#[tokio::test]
async fn test_business_error_is_returned_but_not_cached() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({
        "error_message": "You have exceeded your daily request quota.",
        "status": "OVER_QUERY_LIMIT"
    }));
    ctx.upstream.push_json(json!({"status": "OK", "results": []}));

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some(JSON_CONTENT_TYPE));
    assert_eq!(body_json(&response)["status"], "OVER_QUERY_LIMIT");

    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    assert_eq!(ctx.store.peek(&key), None);
    assert!(ctx.metrics().await.set_count.is_empty());

    // Nothing was cached, so the next request goes upstream again.
    let retry = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;
    assert_eq!(body_json(&retry)["status"], "OK");
    assert_eq!(ctx.upstream.call_count(), 2);
}

#[tokio::test]
async fn test_upstream_transport_error_is_forwarded_without_write() {
    let ctx = TestContext::new();
    ctx.upstream.push_status(500, "Internal Server Error");

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(response.status, 500);
    assert_eq!(response.body, "Internal Server Error\n");
    assert_eq!(response.header("content-type"), None);

    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    assert_eq!(ctx.store.peek(&key), None);
    assert!(ctx.metrics().await.set_count.is_empty());
}

#[tokio::test]
async fn test_upstream_client_failure_escalates() {
    let ctx = TestContext::new();
    ctx.upstream
        .push_error(GeoCacheError::Upstream("connection reset".to_string()));

    let result = ctx
        .manager
        .handle(&GeoRequest::new(GEOCODE_PATH, query(&[("address", "Paris")])))
        .await;
    assert_eq!(
        result.unwrap_err(),
        GeoCacheError::Upstream("connection reset".to_string())
    );
}

#[tokio::test]
async fn test_missing_credential_is_unauthorized_without_side_effects() {
    let mut settings = test_settings();
    settings.api_key = None;
    let ctx = TestContext::with(settings, FixedTimezone(vec!["Europe/Paris"]));

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(response.status, 401);
    assert_eq!(response.body, "Unauthorized\n");
    assert_eq!(ctx.store.executed_batches(), 0);
    assert_eq!(ctx.upstream.call_count(), 0);
    assert_eq!(ctx.metrics().await, MetricsSnapshot::default());
}

#[tokio::test]
async fn test_caller_credential_is_forwarded_but_not_hashed() {
    let mut settings = test_settings();
    settings.api_key = None;
    let ctx = TestContext::with(settings, FixedTimezone(vec![]));
    ctx.upstream.push_json(json!({"status": "OK", "results": []}));

    let first = ctx
        .request(GEOCODE_PATH, &[("address", "Paris, France"), ("key", "caller-key")])
        .await;
    assert_eq!(first.status, 200);
    assert_eq!(
        ctx.upstream.calls(),
        vec![
            "https://maps.googleapis.com/maps/api/geocode/json?address=Paris%2C%20France&key=caller-key"
                .to_string()
        ]
    );

    // A different caller key maps to the same cache entry.
    let second = ctx
        .request(GEOCODE_PATH, &[("key", "other-key"), ("address", "Paris, France")])
        .await;
    assert_eq!(first, second);
    assert_eq!(ctx.upstream.call_count(), 1);
}

#[tokio::test]
async fn test_default_credential_is_prepended_to_upstream_query() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({"status": "OK", "results": []}));

    ctx.request(GEOCODE_PATH, &[("sensor", "false"), ("address", "Paris")])
        .await;

    assert_eq!(
        ctx.upstream.calls(),
        vec![format!(
            "https://maps.googleapis.com/maps/api/geocode/json?key={TEST_KEY}&sensor=false&address=Paris"
        )]
    );
}

#[tokio::test]
async fn test_parameter_order_does_not_split_the_cache() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({"status": "OK", "results": [1]}));

    let first = ctx
        .request(GEOCODE_PATH, &[("address", "Paris"), ("language", "fr")])
        .await;
    let second = ctx
        .request(GEOCODE_PATH, &[("language", "fr"), ("address", "Paris")])
        .await;

    assert_eq!(first, second);
    assert_eq!(ctx.upstream.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hit_rewrites_badly_formatted_entry_and_keeps_ttl() {
    let ctx = TestContext::new();
    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    ctx.store.seed(
        &key,
        "{ \"status\" : \"OK\",\n  \"results\" : [ ] }",
        Some(Duration::from_secs(5)),
    );

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(response.body, "{\n  \"status\": \"OK\",\n  \"results\": []\n}\n");
    assert_eq!(ctx.store.peek(&key).as_deref(), Some(r#"{"status":"OK","results":[]}"#));
    // The read refreshed the TTL; the rewrite must not have cleared it.
    assert_eq!(ctx.store.ttl(&key), Some(Duration::from_secs(EXPIRE_SECONDS)));
    assert_eq!(ctx.upstream.call_count(), 0);
}

#[tokio::test]
async fn test_well_formatted_hit_is_not_rewritten() {
    let ctx = TestContext::new();
    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    ctx.store.seed(&key, r#"{"status":"OK","results":[]}"#, None);

    ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    // Legacy probe and the read pipeline; no third batch for a rewrite.
    assert_eq!(ctx.store.executed_batches(), 2);
}

#[tokio::test]
async fn test_malformed_cache_entry_is_treated_as_a_miss() {
    let ctx = TestContext::new();
    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    ctx.store.seed(&key, "{\"status\": \"OK\", \"results\": [", None);
    ctx.upstream.push_json(json!({"status": "OK", "results": ["fresh"]}));

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(response.status, 200);
    assert_eq!(body_json(&response)["results"][0], "fresh");
    assert_eq!(
        ctx.store.peek(&key).as_deref(),
        Some(r#"{"status":"OK","results":["fresh"]}"#)
    );
}

#[tokio::test]
async fn test_cached_non_cacheable_status_is_refetched() {
    let ctx = TestContext::new();
    let key = ctx.fingerprint(GEOCODE_PATH, &[("address", "Paris")]).current.to_string();
    ctx.store.seed(&key, r#"{"status":"REQUEST_DENIED"}"#, None);
    ctx.upstream.push_json(json!({"status": "OK", "results": []}));

    let response = ctx.request(GEOCODE_PATH, &[("address", "Paris")]).await;

    assert_eq!(body_json(&response)["status"], "OK");
    assert_eq!(ctx.upstream.call_count(), 1);
    assert_eq!(
        ctx.store.peek(&key).as_deref(),
        Some(r#"{"status":"OK","results":[]}"#)
    );
}

#[tokio::test]
async fn test_concurrent_misses_both_reach_upstream() {
    let ctx = TestContext::new();
    ctx.upstream.push_json(json!({"status": "OK", "results": [1]}));
    ctx.upstream.push_json(json!({"status": "OK", "results": [1]}));

    let (a, b) = tokio::join!(
        ctx.request(GEOCODE_PATH, &[("address", "Paris")]),
        ctx.request(GEOCODE_PATH, &[("address", "Paris")]),
    );

    assert_eq!(a, b);
    assert!(ctx.upstream.call_count() >= 1);
    assert!(ctx.upstream.call_count() <= 2);
}
