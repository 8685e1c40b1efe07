// src/server/initialization.rs

//! Assembles the store, upstream client and timezone data into shared state.

use crate::config::{Config, StoreBackend};
use crate::core::cache::{CacheManager, CacheSettings, LocalResolver, TzfLookup};
use crate::core::store::resp::RespStoreSettings;
use crate::core::store::{KvStore, MemoryStore, RespStore};
use crate::core::upstream::HttpUpstream;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
    /// Whether `/prometheus` is served.
    pub prometheus_enabled: bool,
}

/// Builds the [`AppState`] described by `config`.
///
/// No store connection is opened here; connections are established lazily by
/// the first pipeline that needs one.
pub fn setup(config: &Config) -> Result<AppState> {
    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Resp => {
            let settings = RespStoreSettings::from(&config.store);
            info!(
                "Using RESP store at {} (db {}, pool of {})",
                settings.addr, settings.database, settings.pool_size
            );
            Arc::new(RespStore::new(settings))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let upstream = Arc::new(HttpUpstream::new(Duration::from_millis(
        config.upstream.timeout_ms,
    ))?);

    info!("Loading timezone boundary data...");
    let local = LocalResolver::new(Arc::new(TzfLookup::new()));

    let settings = CacheSettings::from(config);
    info!(
        "Proxying {} under namespace '{}' (ttl {}s, short ttl {}s)",
        settings.upstream_base,
        settings.namespace,
        settings.expire_seconds,
        settings.short_expire_seconds
    );

    Ok(AppState {
        manager: Arc::new(CacheManager::new(settings, store, upstream, local)),
        prometheus_enabled: config.metrics.enabled,
    })
}
