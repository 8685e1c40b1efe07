// src/core/errors.rs

//! Defines the primary error type for the caching proxy.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the proxy can run into.
/// Expected conditions (cache misses, malformed entries, local resolution misses)
/// never become errors; only the variants below escalate to the caller.
#[derive(Error, Debug)]
pub enum GeoCacheError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Syntax error")]
    SyntaxError,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The store answered a command with an error reply (e.g. `-WRONGPASS`).
    #[error("Store replied with error: {0}")]
    StoreReply(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store operation timed out")]
    Timeout,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl GeoCacheError {
    /// Returns true if the error means the connection it happened on can no
    /// longer be trusted to be in a clean request/response state.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            GeoCacheError::Io(_)
                | GeoCacheError::IncompleteData
                | GeoCacheError::SyntaxError
                | GeoCacheError::Protocol(_)
                | GeoCacheError::Timeout
        )
    }
}

// `std::io::Error` is not cloneable, so the variant holds it behind an Arc.
impl Clone for GeoCacheError {
    fn clone(&self) -> Self {
        match self {
            GeoCacheError::Io(e) => GeoCacheError::Io(Arc::clone(e)),
            GeoCacheError::IncompleteData => GeoCacheError::IncompleteData,
            GeoCacheError::SyntaxError => GeoCacheError::SyntaxError,
            GeoCacheError::Protocol(s) => GeoCacheError::Protocol(s.clone()),
            GeoCacheError::StoreReply(s) => GeoCacheError::StoreReply(s.clone()),
            GeoCacheError::Store(s) => GeoCacheError::Store(s.clone()),
            GeoCacheError::Timeout => GeoCacheError::Timeout,
            GeoCacheError::Upstream(s) => GeoCacheError::Upstream(s.clone()),
            GeoCacheError::Internal(s) => GeoCacheError::Internal(s.clone()),
        }
    }
}

impl PartialEq for GeoCacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GeoCacheError::Io(e1), GeoCacheError::Io(e2)) => e1.kind() == e2.kind(),
            (GeoCacheError::Protocol(s1), GeoCacheError::Protocol(s2)) => s1 == s2,
            (GeoCacheError::StoreReply(s1), GeoCacheError::StoreReply(s2)) => s1 == s2,
            (GeoCacheError::Store(s1), GeoCacheError::Store(s2)) => s1 == s2,
            (GeoCacheError::Upstream(s1), GeoCacheError::Upstream(s2)) => s1 == s2,
            (GeoCacheError::Internal(s1), GeoCacheError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GeoCacheError {
    fn from(e: std::io::Error) -> Self {
        GeoCacheError::Io(Arc::new(e))
    }
}

impl From<tokio::time::error::Elapsed> for GeoCacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GeoCacheError::Timeout
    }
}

impl From<reqwest::Error> for GeoCacheError {
    fn from(e: reqwest::Error) -> Self {
        GeoCacheError::Upstream(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for GeoCacheError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GeoCacheError::Protocol(format!("reply is not valid UTF-8: {e}"))
    }
}

impl From<serde_json::Error> for GeoCacheError {
    fn from(e: serde_json::Error) -> Self {
        GeoCacheError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
