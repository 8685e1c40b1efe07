// src/core/metrics.rs

//! Defines and registers Prometheus metrics for process monitoring.
//!
//! These complement the per-path counters kept in the store: they describe
//! this process only and reset on restart.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec,
};

lazy_static! {
    /// Proxied requests by how they were answered:
    /// `hit`, `miss`, `local`, `unauthorized` or `upstream_error`.
    pub static ref REQUESTS_TOTAL: IntCounterVec =
        register_int_counter_vec!("geocache_requests_total", "Total number of proxied requests, labeled by outcome.", &["outcome"]).unwrap();
    /// Legacy cache entries migrated to the canonical key space.
    pub static ref MIGRATIONS_TOTAL: IntCounter =
        register_int_counter!("geocache_migrations_total", "Total number of legacy cache entries migrated.").unwrap();
    /// Store connection attempts that were retried.
    pub static ref STORE_RECONNECTS_TOTAL: IntCounter =
        register_int_counter!("geocache_store_reconnects_total", "Total number of retried store connection attempts.").unwrap();

    /// Latency of upstream API calls.
    pub static ref UPSTREAM_LATENCY_SECONDS: Histogram =
        register_histogram!("geocache_upstream_latency_seconds", "Latency of upstream API calls in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
