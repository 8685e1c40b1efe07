// src/core/cache/migration.rs

//! Moves entries written under the legacy key scheme into the canonical key space.

use super::counters::{CounterKind, PathCounters};
use super::fingerprint::Fingerprint;
use super::payload::GeoPayload;
use crate::core::GeoCacheError;
use crate::core::metrics;
use crate::core::store::{KvStore, Pipeline, SetExpiry};
use tracing::{info, warn};

/// What a migration attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy entry exists for the fingerprint.
    Absent,
    /// The legacy entry was copied to the canonical key and deleted.
    Migrated,
    /// A legacy entry exists but is not JSON; it is left alone.
    Malformed,
}

/// Migrates the legacy entry for `fingerprint`, if there is one.
///
/// The copy, the deletion and the counter bump go out as a single batch, so
/// the canonical entry is visible the moment the legacy one is gone. The
/// canonical entry is written without a TTL; the read that follows sets it.
pub async fn migrate_legacy(
    store: &dyn KvStore,
    counters: &PathCounters,
    fingerprint: &Fingerprint,
    path: &str,
) -> Result<MigrationOutcome, GeoCacheError> {
    let legacy_key = fingerprint.legacy.to_string();
    let results = Pipeline::new().get(&legacy_key).execute(store).await?;
    let Some(raw) = results.text(0)? else {
        return Ok(MigrationOutcome::Absent);
    };

    let payload = match GeoPayload::parse(raw) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Legacy entry {legacy_key} is not valid JSON, not migrating: {e}");
            return Ok(MigrationOutcome::Malformed);
        }
    };

    let canonical_key = fingerprint.current.to_string();
    let pipeline = Pipeline::new()
        .set(&canonical_key, payload.to_compact(), SetExpiry::Persist)
        .del(&legacy_key);
    counters
        .increment(pipeline, CounterKind::Migrate, path)
        .execute(store)
        .await?;

    metrics::MIGRATIONS_TOTAL.inc();
    info!("Migrated legacy entry {legacy_key} to {canonical_key}");
    Ok(MigrationOutcome::Migrated)
}
