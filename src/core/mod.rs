// src/core/mod.rs

//! The central module containing the caching logic and its store and upstream adapters.

pub mod cache;
pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod store;
pub mod upstream;

pub use errors::GeoCacheError;
