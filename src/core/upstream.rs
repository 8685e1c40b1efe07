// src/core/upstream.rs

//! The HTTP client for the upstream geolocation API.

use crate::core::GeoCacheError;
use crate::core::cache::fingerprint::{CREDENTIAL_PARAM, encode_component};
use crate::core::cache::payload::GeoPayload;
use crate::core::metrics;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// The raw result of an upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// The canonical reason phrase for `status`, e.g. `Internal Server Error`.
    pub status_text: String,
    pub body: String,
}

/// An upstream call, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    /// A non-200 HTTP status. Forwarded as-is, never cached.
    Transport { status: u16, status_text: String },
    /// A 200 with a JSON body; its status decides cacheability.
    Payload(GeoPayload),
}

/// Performs GET requests against the upstream API.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<UpstreamResponse, GeoCacheError>;
}

/// [`UpstreamClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self, GeoCacheError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("geocache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn get(&self, url: &str) -> Result<UpstreamResponse, GeoCacheError> {
        let started = Instant::now();
        let result = async {
            let res = self.client.get(url).send().await?;
            let status = res.status();
            Ok::<_, reqwest::Error>((status, res.text().await?))
        }
        .await;
        // Failed calls count too; a timeout is the slowest answer there is.
        metrics::UPSTREAM_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        let (status, body) = result?;
        debug!("Upstream answered {status} in {:?}", started.elapsed());
        Ok(UpstreamResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// Resolves the credential for a request: the caller's `key` parameter if
/// present, else `default_key`. The credential comes first, followed by the
/// caller's remaining parameters in their original order.
///
/// Returns `None` when no non-empty credential can be resolved.
pub fn authorized_query(
    query: &IndexMap<String, String>,
    default_key: Option<&str>,
) -> Option<IndexMap<String, String>> {
    let mut auth = IndexMap::with_capacity(query.len() + 1);
    if let Some(key) = default_key {
        auth.insert(CREDENTIAL_PARAM.to_string(), key.to_string());
    }
    for (name, value) in query {
        auth.insert(name.clone(), value.clone());
    }
    let has_credential = auth
        .get(CREDENTIAL_PARAM)
        .is_some_and(|key| !key.is_empty());
    has_credential.then_some(auth)
}

/// Joins the endpoint with every parameter, credential included, in the given order.
pub fn request_url(endpoint: &str, auth_query: &IndexMap<String, String>) -> String {
    let query = auth_query
        .iter()
        .map(|(name, value)| format!("{name}={}", encode_component(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{endpoint}?{query}")
}

/// Splits transport failures from JSON payloads.
pub fn classify(response: UpstreamResponse) -> Result<UpstreamOutcome, GeoCacheError> {
    if response.status != 200 {
        return Ok(UpstreamOutcome::Transport {
            status: response.status,
            status_text: response.status_text,
        });
    }
    let payload = GeoPayload::parse(&response.body)
        .map_err(|e| GeoCacheError::Upstream(format!("upstream body is not JSON: {e}")))?;
    Ok(UpstreamOutcome::Payload(payload))
}
