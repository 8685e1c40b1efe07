// src/core/cache/manager.rs

//! The read-through cache: local shortcut, legacy migration, cached read,
//! and upstream fetch with write-back.

use super::counters::{CounterKind, MetricsSnapshot, PathCounters};
use super::fingerprint::Fingerprint;
use super::migration::migrate_legacy;
use super::payload::{ApiStatus, GeoPayload};
use super::response::{GeoRequest, ProxyResponse};
use super::timezone::LocalResolver;
use crate::config::Config;
use crate::core::GeoCacheError;
use crate::core::metrics;
use crate::core::store::{KvStore, Pipeline, SetExpiry};
use crate::core::upstream::{
    UpstreamClient, UpstreamOutcome, authorized_query, classify, request_url,
};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The parts of [`Config`] the cache manager needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub namespace: String,
    pub upstream_base: String,
    pub api_key: Option<String>,
    pub expire_seconds: u64,
    pub short_expire_seconds: u64,
}

impl From<&Config> for CacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            upstream_base: config.upstream.base_url.clone(),
            api_key: config.api_key.clone(),
            expire_seconds: config.cache.expire_seconds,
            short_expire_seconds: config.cache.short_expire_seconds,
        }
    }
}

impl CacheSettings {
    /// TTL for a response with `status`, or `None` if it must not be cached.
    pub fn ttl_for(&self, status: &ApiStatus) -> Option<u64> {
        match status {
            ApiStatus::Ok => Some(self.expire_seconds),
            ApiStatus::ZeroResults => Some(self.short_expire_seconds),
            ApiStatus::Other(_) => None,
        }
    }
}

/// Serves proxied requests from the cache, falling back to the upstream API.
///
/// Holds no per-request state; every request is computed from store reads,
/// so one instance is shared by all concurrent requests.
pub struct CacheManager {
    settings: CacheSettings,
    store: Arc<dyn KvStore>,
    upstream: Arc<dyn UpstreamClient>,
    local: LocalResolver,
    counters: PathCounters,
}

impl CacheManager {
    pub fn new(
        settings: CacheSettings,
        store: Arc<dyn KvStore>,
        upstream: Arc<dyn UpstreamClient>,
        local: LocalResolver,
    ) -> Self {
        Self {
            counters: PathCounters::new(settings.namespace.clone()),
            settings,
            store,
            upstream,
            local,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Reads the per-path get/set/migrate counters.
    pub async fn metrics(&self) -> Result<MetricsSnapshot, GeoCacheError> {
        self.counters.snapshot(self.store.as_ref()).await
    }

    /// Handles one proxied request.
    ///
    /// Store failures escalate as errors. Everything expected, including
    /// upstream transport failures and malformed cache entries, ends in a
    /// response.
    pub async fn handle(&self, request: &GeoRequest) -> Result<ProxyResponse, GeoCacheError> {
        let Some(auth_query) = authorized_query(&request.query, self.settings.api_key.as_deref())
        else {
            info!("Rejecting request for {} without a credential", request.path);
            metrics::REQUESTS_TOTAL.with_label_values(&["unauthorized"]).inc();
            return Ok(ProxyResponse::unauthorized());
        };

        if let Some(payload) = self.local.resolve(request) {
            metrics::REQUESTS_TOTAL.with_label_values(&["local"]).inc();
            return Ok(ProxyResponse::json(&payload));
        }

        let fingerprint = Fingerprint::compute(
            &self.settings.upstream_base,
            &self.settings.namespace,
            &request.path,
            &request.query,
        );
        debug!(
            "Incoming request for {}?{} (cache key {})",
            fingerprint.endpoint, fingerprint.canonical_query, fingerprint.current
        );

        migrate_legacy(
            self.store.as_ref(),
            &self.counters,
            &fingerprint,
            &request.path,
        )
        .await?;

        if let Some(payload) = self.read_cached(&fingerprint, &request.path).await? {
            metrics::REQUESTS_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(ProxyResponse::json(&payload));
        }

        self.fetch_upstream(&fingerprint, &request.path, &auth_query)
            .await
    }

    /// Reads the canonical entry, refreshing its TTL and counting the read in
    /// the same batch. Returns the payload only for a usable hit.
    async fn read_cached(
        &self,
        fingerprint: &Fingerprint,
        path: &str,
    ) -> Result<Option<GeoPayload>, GeoCacheError> {
        let key = fingerprint.current.to_string();
        let pipeline = Pipeline::new()
            .get(&key)
            .expire(&key, self.settings.expire_seconds);
        let results = self
            .counters
            .increment(pipeline, CounterKind::Get, path)
            .execute(self.store.as_ref())
            .await?;

        let Some(raw) = results.text(0)? else {
            return Ok(None);
        };
        let payload = match GeoPayload::parse(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cached entry {key} is not valid JSON, treating as a miss: {e}");
                return Ok(None);
            }
        };
        if !payload.status().is_cacheable() {
            warn!(
                "Cached entry {key} has non-cacheable status '{}', refetching",
                payload.status()
            );
            return Ok(None);
        }

        debug!("Cache hit for {key}");
        let compact = payload.to_compact();
        if compact != raw {
            debug!("Reformatting cached entry {key}");
            Pipeline::new()
                .set(&key, compact, SetExpiry::KeepTtl)
                .execute(self.store.as_ref())
                .await?;
        }
        Ok(Some(payload))
    }

    async fn fetch_upstream(
        &self,
        fingerprint: &Fingerprint,
        path: &str,
        auth_query: &IndexMap<String, String>,
    ) -> Result<ProxyResponse, GeoCacheError> {
        let url = request_url(&fingerprint.endpoint, auth_query);
        let response = self.upstream.get(&url).await.inspect_err(|e| {
            warn!("Upstream call for {} failed: {e}", fingerprint.endpoint);
            metrics::REQUESTS_TOTAL.with_label_values(&["upstream_error"]).inc();
        })?;

        let payload = match classify(response)? {
            UpstreamOutcome::Transport {
                status,
                status_text,
            } => {
                warn!(
                    "Upstream error for {}?{}: {status} {status_text}",
                    fingerprint.endpoint, fingerprint.canonical_query
                );
                metrics::REQUESTS_TOTAL.with_label_values(&["upstream_error"]).inc();
                return Ok(ProxyResponse::status_text(status, &status_text));
            }
            UpstreamOutcome::Payload(payload) => payload,
        };
        metrics::REQUESTS_TOTAL.with_label_values(&["miss"]).inc();

        match self.settings.ttl_for(payload.status()) {
            None => warn!(
                "Upstream reported status '{}' for {}?{}; not caching",
                payload.status(),
                fingerprint.endpoint,
                fingerprint.canonical_query
            ),
            Some(_) if LocalResolver::applies_to(path) => {
                debug!("Not caching upstream response for {path}");
            }
            Some(ttl) => {
                debug!(
                    "Caching {} as {} for {ttl}s",
                    fingerprint.current,
                    payload.status()
                );
                let pipeline = Pipeline::new().set(
                    &fingerprint.current,
                    payload.to_compact(),
                    SetExpiry::Seconds(ttl),
                );
                self.counters
                    .increment(pipeline, CounterKind::Set, path)
                    .execute(self.store.as_ref())
                    .await?;
            }
        }
        Ok(ProxyResponse::json(&payload))
    }
}
