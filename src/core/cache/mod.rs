// src/core/cache/mod.rs

//! The read-through caching protocol and the pieces it is assembled from.

pub mod counters;
pub mod fingerprint;
pub mod manager;
pub mod migration;
pub mod payload;
pub mod response;
pub mod timezone;

pub use counters::{MetricsSnapshot, PathCounters};
pub use fingerprint::{CacheKey, Fingerprint};
pub use manager::{CacheManager, CacheSettings};
pub use payload::{ApiStatus, GeoPayload};
pub use response::{GeoRequest, JSON_CONTENT_TYPE, ProxyResponse};
pub use timezone::{LocalResolver, TIMEZONE_PATH, TimezoneLookup, TzfLookup};
