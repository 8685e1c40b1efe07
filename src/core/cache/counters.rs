// src/core/cache/counters.rs

//! Per-path counters of cache activity, kept in store hashes.

use crate::core::GeoCacheError;
use crate::core::store::{KvStore, Pipeline};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

/// The three caching actions that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Get,
    Set,
    Migrate,
}

impl CounterKind {
    fn as_str(self) -> &'static str {
        match self {
            CounterKind::Get => "get",
            CounterKind::Set => "set",
            CounterKind::Migrate => "migrate",
        }
    }
}

/// Counter values keyed by request path.
pub type PathCounts = IndexMap<String, i64>;

/// A point-in-time read of all three counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub get_count: PathCounts,
    pub set_count: PathCounts,
    pub migrate_count: PathCounts,
}

/// Names the counter hashes and queues increments on pipelines.
#[derive(Debug, Clone)]
pub struct PathCounters {
    namespace: String,
}

impl PathCounters {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The hash holding `kind`, e.g. `ns:metric:get:path:count:h`.
    pub fn hash_key(&self, kind: CounterKind) -> String {
        format!("{}:metric:{}:path:count:h", self.namespace, kind.as_str())
    }

    /// Appends an increment of `kind` for `path` to `pipeline`.
    pub fn increment(&self, pipeline: Pipeline, kind: CounterKind, path: &str) -> Pipeline {
        pipeline.hincrby(self.hash_key(kind), path, 1)
    }

    /// Reads all three counters in one batch.
    pub async fn snapshot(&self, store: &dyn KvStore) -> Result<MetricsSnapshot, GeoCacheError> {
        let results = Pipeline::new()
            .hgetall(self.hash_key(CounterKind::Get))
            .hgetall(self.hash_key(CounterKind::Set))
            .hgetall(self.hash_key(CounterKind::Migrate))
            .execute(store)
            .await?;
        Ok(MetricsSnapshot {
            get_count: parse_counts(results.map(0)?),
            set_count: parse_counts(results.map(1)?),
            migrate_count: parse_counts(results.map(2)?),
        })
    }
}

fn parse_counts(raw: &IndexMap<String, String>) -> PathCounts {
    raw.iter()
        .filter_map(|(path, value)| match value.trim().parse::<i64>() {
            Ok(count) => Some((path.clone(), count)),
            Err(_) => {
                warn!("Ignoring non-integer counter value '{value}' for path '{path}'");
                None
            }
        })
        .collect()
}
