// src/core/store/pipeline.rs

//! A builder that queues typed store commands and executes them as one batch.

use super::{KvStore, Reply, SetExpiry, StoreCommand};
use crate::core::GeoCacheError;
use indexmap::IndexMap;

/// An ordered batch of commands, executed atomically by a [`KvStore`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Pipeline {
    commands: Vec<StoreCommand>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.commands.push(StoreCommand::Get { key: key.into() });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>, expiry: SetExpiry) -> Self {
        self.commands.push(StoreCommand::Set {
            key: key.into(),
            value: value.into(),
            expiry,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.commands.push(StoreCommand::Del { key: key.into() });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, seconds: u64) -> Self {
        self.commands.push(StoreCommand::Expire {
            key: key.into(),
            seconds,
        });
        self
    }

    pub fn hincrby(mut self, key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        self.commands.push(StoreCommand::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn hgetall(mut self, key: impl Into<String>) -> Self {
        self.commands.push(StoreCommand::HGetAll { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sends the batch to the store and waits for all replies.
    pub async fn execute(self, store: &dyn KvStore) -> Result<PipelineResults, GeoCacheError> {
        if self.commands.is_empty() {
            return Ok(PipelineResults { replies: vec![] });
        }
        let expected = self.commands.len();
        let replies = store.execute(self.commands).await?;
        if replies.len() != expected {
            return Err(GeoCacheError::Protocol(format!(
                "pipeline of {expected} commands produced {} replies",
                replies.len()
            )));
        }
        Ok(PipelineResults { replies })
    }
}

/// Replies of an executed [`Pipeline`], addressed by the position of the
/// command that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResults {
    replies: Vec<Reply>,
}

impl PipelineResults {
    fn reply(&self, index: usize) -> Result<&Reply, GeoCacheError> {
        self.replies.get(index).ok_or_else(|| {
            GeoCacheError::Internal(format!("no pipeline reply at position {index}"))
        })
    }

    /// The value of a `GET` reply; `None` when the key does not exist.
    pub fn text(&self, index: usize) -> Result<Option<&str>, GeoCacheError> {
        match self.reply(index)? {
            Reply::Text(s) => Ok(Some(s.as_str())),
            Reply::Nil => Ok(None),
            other => Err(mismatch(index, "text", other)),
        }
    }

    /// The value of an integer reply (`DEL`, `EXPIRE`, `HINCRBY`).
    pub fn integer(&self, index: usize) -> Result<i64, GeoCacheError> {
        match self.reply(index)? {
            Reply::Integer(i) => Ok(*i),
            other => Err(mismatch(index, "integer", other)),
        }
    }

    /// The field map of a `HGETALL` reply; empty when the hash does not exist.
    pub fn map(&self, index: usize) -> Result<&IndexMap<String, String>, GeoCacheError> {
        match self.reply(index)? {
            Reply::Map(m) => Ok(m),
            other => Err(mismatch(index, "map", other)),
        }
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

fn mismatch(index: usize, wanted: &str, got: &Reply) -> GeoCacheError {
    GeoCacheError::Protocol(format!(
        "pipeline reply {index} is not a {wanted} reply: {got:?}"
    ))
}
