// src/core/store/mod.rs

//! The key-value store adapter.
//!
//! Business logic never talks to a connection directly. It queues typed
//! [`StoreCommand`]s on a [`Pipeline`] and hands the batch to a [`KvStore`],
//! which executes it as one contiguous, non-interleaved transaction and
//! returns one [`Reply`] per command, in issue order.

pub mod connection;
pub mod memory;
pub mod pipeline;
pub mod reconnect;
pub mod resp;

use crate::core::GeoCacheError;
use crate::core::protocol::RespFrame;
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;

pub use memory::MemoryStore;
pub use pipeline::{Pipeline, PipelineResults};
pub use reconnect::ReconnectPolicy;
pub use resp::RespStore;

/// How a `SET` treats the time-to-live of the key it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpiry {
    /// Plain `SET`: the key ends up without a TTL.
    Persist,
    /// `SET ... EX <seconds>`.
    Seconds(u64),
    /// `SET ... KEEPTTL`: whatever TTL the key had is retained.
    KeepTtl,
}

/// A single command that can be queued on a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
        expiry: SetExpiry,
    },
    Del {
        key: String,
    },
    Expire {
        key: String,
        seconds: u64,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    HGetAll {
        key: String,
    },
}

impl StoreCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Get { .. } => "GET",
            StoreCommand::Set { .. } => "SET",
            StoreCommand::Del { .. } => "DEL",
            StoreCommand::Expire { .. } => "EXPIRE",
            StoreCommand::HIncrBy { .. } => "HINCRBY",
            StoreCommand::HGetAll { .. } => "HGETALL",
        }
    }

    /// Encodes the command as it is sent over the wire.
    pub fn to_frame(&self) -> RespFrame {
        let mut args: Vec<Bytes> = vec![Bytes::from_static(self.name().as_bytes())];
        match self {
            StoreCommand::Get { key }
            | StoreCommand::Del { key }
            | StoreCommand::HGetAll { key } => args.push(key.clone().into()),
            StoreCommand::Set { key, value, expiry } => {
                args.push(key.clone().into());
                args.push(value.clone().into());
                match expiry {
                    SetExpiry::Persist => {}
                    SetExpiry::Seconds(secs) => {
                        args.push(Bytes::from_static(b"EX"));
                        args.push(secs.to_string().into());
                    }
                    SetExpiry::KeepTtl => args.push(Bytes::from_static(b"KEEPTTL")),
                }
            }
            StoreCommand::Expire { key, seconds } => {
                args.push(key.clone().into());
                args.push(seconds.to_string().into());
            }
            StoreCommand::HIncrBy { key, field, delta } => {
                args.push(key.clone().into());
                args.push(field.clone().into());
                args.push(delta.to_string().into());
            }
        }
        RespFrame::command(args)
    }

    /// Converts the raw wire reply for this command into a typed [`Reply`].
    pub fn reply_from_frame(&self, frame: RespFrame) -> Result<Reply, GeoCacheError> {
        if let RespFrame::Error(msg) = frame {
            return Err(GeoCacheError::StoreReply(msg));
        }
        match self {
            StoreCommand::Get { .. } => Ok(match frame.into_text()? {
                Some(text) => Reply::Text(text),
                None => Reply::Nil,
            }),
            StoreCommand::Set { .. } => match frame {
                RespFrame::SimpleString(s) => Ok(Reply::Status(s)),
                other => Err(unexpected(self, &other)),
            },
            StoreCommand::Del { .. }
            | StoreCommand::Expire { .. }
            | StoreCommand::HIncrBy { .. } => match frame {
                RespFrame::Integer(i) => Ok(Reply::Integer(i)),
                other => Err(unexpected(self, &other)),
            },
            StoreCommand::HGetAll { .. } => match frame {
                RespFrame::Array(items) => {
                    if items.len() % 2 != 0 {
                        return Err(GeoCacheError::Protocol(
                            "HGETALL reply has an odd number of elements".to_string(),
                        ));
                    }
                    let mut map = IndexMap::with_capacity(items.len() / 2);
                    let mut items = items.into_iter();
                    while let (Some(field), Some(value)) = (items.next(), items.next()) {
                        let field = field.into_text()?.unwrap_or_default();
                        let value = value.into_text()?.unwrap_or_default();
                        map.insert(field, value);
                    }
                    Ok(Reply::Map(map))
                }
                RespFrame::NullArray | RespFrame::Null => Ok(Reply::Map(IndexMap::new())),
                other => Err(unexpected(self, &other)),
            },
        }
    }
}

fn unexpected(command: &StoreCommand, frame: &RespFrame) -> GeoCacheError {
    GeoCacheError::Protocol(format!(
        "unexpected reply to {}: {frame:?}",
        command.name()
    ))
}

/// A typed reply to a single [`StoreCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Text(String),
    Integer(i64),
    Status(String),
    Map(IndexMap<String, String>),
}

/// A store able to execute a batch of commands atomically.
///
/// Implementations must run the whole batch as one contiguous sequence with no
/// commands from other clients interleaved, and must return exactly one reply
/// per command, in order.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn execute(&self, commands: Vec<StoreCommand>) -> Result<Vec<Reply>, GeoCacheError>;
}
