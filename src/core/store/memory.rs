// src/core/store/memory.rs

//! An in-process implementation of [`KvStore`].
//!
//! Batches execute under a single lock, which gives the same no-interleaving
//! guarantee a MULTI/EXEC transaction gives on a real store. Used by the
//! `memory` store backend and throughout the test suite.

use super::{KvStore, Reply, SetExpiry, StoreCommand};
use crate::core::GeoCacheError;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, IndexMap<String, String>>,
}

impl Keyspace {
    /// Drops `key` if its TTL has elapsed, mirroring lazy expiry on access.
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        if self.strings.get(key).is_some_and(|e| e.is_expired(now)) {
            self.strings.remove(key);
        }
    }

    fn apply(&mut self, command: StoreCommand, now: Instant) -> Result<Reply, GeoCacheError> {
        match command {
            StoreCommand::Get { key } => {
                self.purge_if_expired(&key, now);
                if self.hashes.contains_key(&key) {
                    return Err(wrong_type());
                }
                Ok(self
                    .strings
                    .get(&key)
                    .map_or(Reply::Nil, |e| Reply::Text(e.value.clone())))
            }
            StoreCommand::Set { key, value, expiry } => {
                self.purge_if_expired(&key, now);
                let expires_at = match expiry {
                    SetExpiry::Persist => None,
                    SetExpiry::Seconds(secs) => Some(deadline(now, secs, "set")?),
                    SetExpiry::KeepTtl => self.strings.get(&key).and_then(|e| e.expires_at),
                };
                self.hashes.remove(&key);
                self.strings.insert(key, StringEntry { value, expires_at });
                Ok(Reply::Status("OK".to_string()))
            }
            StoreCommand::Del { key } => {
                self.purge_if_expired(&key, now);
                let removed = self.strings.remove(&key).is_some() as i64
                    + self.hashes.remove(&key).is_some() as i64;
                Ok(Reply::Integer(removed))
            }
            StoreCommand::Expire { key, seconds } => {
                self.purge_if_expired(&key, now);
                let expires_at = deadline(now, seconds, "expire")?;
                match self.strings.get_mut(&key) {
                    Some(entry) => {
                        entry.expires_at = Some(expires_at);
                        Ok(Reply::Integer(1))
                    }
                    None => Ok(Reply::Integer(0)),
                }
            }
            StoreCommand::HIncrBy { key, field, delta } => {
                self.purge_if_expired(&key, now);
                if self.strings.contains_key(&key) {
                    return Err(wrong_type());
                }
                let hash = self.hashes.entry(key).or_default();
                let current = match hash.get(&field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| {
                        GeoCacheError::StoreReply("ERR hash value is not an integer".to_string())
                    })?,
                    None => 0,
                };
                let next = current.checked_add(delta).ok_or_else(|| {
                    GeoCacheError::StoreReply(
                        "ERR increment or decrement would overflow".to_string(),
                    )
                })?;
                hash.insert(field, next.to_string());
                Ok(Reply::Integer(next))
            }
            StoreCommand::HGetAll { key } => {
                if self.strings.contains_key(&key) {
                    return Err(wrong_type());
                }
                Ok(Reply::Map(self.hashes.get(&key).cloned().unwrap_or_default()))
            }
        }
    }
}

/// The instant `secs` from `now`, rejected like the store rejects an
/// out-of-range expire time.
fn deadline(now: Instant, secs: u64, command: &str) -> Result<Instant, GeoCacheError> {
    now.checked_add(Duration::from_secs(secs)).ok_or_else(|| {
        GeoCacheError::StoreReply(format!("ERR invalid expire time in '{command}' command"))
    })
}

fn wrong_type() -> GeoCacheError {
    GeoCacheError::StoreReply(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

/// A [`KvStore`] living entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    batches: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches executed so far.
    pub fn executed_batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Reads a string key without going through a pipeline.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let keyspace = self.keyspace.lock();
        keyspace
            .strings
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Remaining time-to-live of a string key. `None` if the key is missing or
    /// has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let keyspace = self.keyspace.lock();
        keyspace
            .strings
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Writes a string key directly, bypassing the batch counter.
    pub fn seed(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.keyspace.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at,
            },
        );
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn execute(&self, commands: Vec<StoreCommand>) -> Result<Vec<Reply>, GeoCacheError> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock();
        // Like EXEC, a failing command does not abort the others; its error is
        // reported once the whole batch has run.
        let mut replies = Vec::with_capacity(commands.len());
        let mut first_error = None;
        for command in commands {
            match keyspace.apply(command, now) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    first_error.get_or_insert(e);
                    replies.push(Reply::Nil);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }
}
