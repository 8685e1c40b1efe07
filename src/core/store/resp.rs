// src/core/store/resp.rs

//! The networked [`KvStore`]: a small pool of RESP connections.

use super::connection::RespConnection;
use super::reconnect::ReconnectPolicy;
use super::{KvStore, Reply, StoreCommand};
use crate::config::StoreConfig;
use crate::core::GeoCacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for [`RespStore`].
#[derive(Debug, Clone)]
pub struct RespStoreSettings {
    pub addr: String,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: usize,
    pub io_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl From<&StoreConfig> for RespStoreSettings {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            addr: format!("{}:{}", cfg.host, cfg.port),
            password: cfg.password.clone(),
            database: cfg.database,
            pool_size: cfg.pool_size,
            io_timeout: Duration::from_millis(cfg.io_timeout_ms),
            reconnect: ReconnectPolicy::from(&cfg.reconnect),
        }
    }
}

/// A [`KvStore`] backed by a RESP-speaking server.
///
/// Each pipeline checks a connection out of the idle pool (or opens a new one
/// under the reconnection policy) and gives it back through [`PooledConnection`]
/// when it is done, whichever way the pipeline ends.
#[derive(Debug)]
pub struct RespStore {
    settings: RespStoreSettings,
    idle: Mutex<Vec<RespConnection>>,
}

impl RespStore {
    pub fn new(settings: RespStoreSettings) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(settings.pool_size)),
            settings,
        }
    }

    /// Number of connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    async fn acquire(&self) -> Result<PooledConnection<'_>, GeoCacheError> {
        let idle = self.idle.lock().pop();
        match idle {
            Some(conn) => Ok(self.checkout(conn, true)),
            None => Ok(self.checkout(self.open().await?, false)),
        }
    }

    fn checkout(&self, conn: RespConnection, reused: bool) -> PooledConnection<'_> {
        PooledConnection {
            store: self,
            conn: Some(conn),
            poisoned: false,
            reused,
        }
    }

    async fn open(&self) -> Result<RespConnection, GeoCacheError> {
        let settings = &self.settings;
        settings
            .reconnect
            .run("store connect", || async {
                let mut conn = RespConnection::connect(&settings.addr, settings.io_timeout).await?;
                conn.handshake(settings.password.as_deref(), settings.database)
                    .await?;
                Ok(conn)
            })
            .await
    }

    fn release(&self, conn: RespConnection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.settings.pool_size {
            idle.push(conn);
        }
    }
}

/// An RAII guard for a checked-out connection. A connection whose stream may
/// be mid-reply is closed instead of going back to the pool.
struct PooledConnection<'a> {
    store: &'a RespStore,
    conn: Option<RespConnection>,
    poisoned: bool,
    reused: bool,
}

impl PooledConnection<'_> {
    fn get(&mut self) -> Result<&mut RespConnection, GeoCacheError> {
        self.conn
            .as_mut()
            .ok_or_else(|| GeoCacheError::Internal("connection already released".to_string()))
    }

    async fn transaction(&mut self, commands: &[StoreCommand]) -> Result<Vec<Reply>, GeoCacheError> {
        // Stays poisoned if this future is dropped mid-transaction.
        self.poisoned = true;
        let result = self.get()?.transaction(commands).await;
        self.poisoned = matches!(&result, Err(e) if e.poisons_connection());
        result
    }

    /// A pooled connection the server already hung up on fails before any
    /// reply arrives, so the batch never ran and can go out again.
    fn went_stale(&self, err: &GeoCacheError) -> bool {
        self.reused
            && matches!(err, GeoCacheError::Io(e) if matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ))
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.poisoned {
            debug!("Discarding store connection after a connection-level error");
            return;
        }
        self.store.release(conn);
    }
}

#[async_trait]
impl KvStore for RespStore {
    async fn execute(&self, commands: Vec<StoreCommand>) -> Result<Vec<Reply>, GeoCacheError> {
        let mut guard = self.acquire().await?;
        let first = guard.transaction(&commands).await;
        let result = match first {
            Err(e) if guard.went_stale(&e) => {
                drop(guard);
                debug!("Pooled store connection went stale ({e}), retrying on a new one");
                guard = self.checkout(self.open().await?, false);
                guard.transaction(&commands).await
            }
            other => other,
        };
        if let Err(e) = &result {
            if e.poisons_connection() {
                warn!("Store pipeline failed: {e}");
            }
        }
        result
    }
}
