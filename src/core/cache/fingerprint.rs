// src/core/cache/fingerprint.rs

//! Derives cache keys from a request.
//!
//! Two schemes coexist. The current one hashes the upstream URL with a sorted,
//! percent-encoded query string. The legacy one hashed the upstream URL with
//! the JSON rendering of the query in arrival order; it only exists so entries
//! written under it can be found and migrated.

use indexmap::IndexMap;
use sha1::{Digest, Sha1};
use std::fmt;

/// The query parameter carrying the upstream API credential. It is never part
/// of a hash input.
pub const CREDENTIAL_PARAM: &str = "key";

/// Namespace of keys written under the legacy scheme.
pub const LEGACY_NAMESPACE: &str = "cache-geo-cache";

/// A hex-encoded SHA-1 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HexDigest(String);

impl HexDigest {
    pub fn of(input: &str) -> Self {
        HexDigest(hex::encode(Sha1::digest(input.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The trailing component of a cache key, identifying the storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTag {
    /// Compact JSON under the current scheme.
    Json,
    /// JSON under the legacy scheme.
    LegacyJson,
}

impl KeyTag {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyTag::Json => "j",
            KeyTag::LegacyJson => "json",
        }
    }
}

/// A store key of the form `namespace:digest:tag`.
///
/// The digest is always hex and the tag a fixed token, so only the namespace
/// could ever contain the delimiter, and it always comes first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    digest: HexDigest,
    tag: KeyTag,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, digest: HexDigest, tag: KeyTag) -> Self {
        Self {
            namespace: namespace.into(),
            digest,
            tag,
        }
    }

    pub fn digest(&self) -> &HexDigest {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.digest.as_str(), self.tag.as_str())
    }
}

impl From<&CacheKey> for String {
    fn from(key: &CacheKey) -> Self {
        key.to_string()
    }
}

/// Percent-encodes a query value the way browsers' `encodeURIComponent` does:
/// everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped.
pub fn encode_component(value: &str) -> String {
    let encoded = urlencoding::encode(value);
    if !encoded.contains('%') {
        return encoded.into_owned();
    }
    encoded
        .replace("%21", "!")
        .replace("%2A", "*")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
}

/// Query parameters without the credential, in their original order.
pub fn without_credential(query: &IndexMap<String, String>) -> IndexMap<String, String> {
    query
        .iter()
        .filter(|(name, _)| name.as_str() != CREDENTIAL_PARAM)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Sorts parameter names and joins `name=encoded(value)` pairs with `&`.
pub fn canonical_query(query: &IndexMap<String, String>) -> String {
    let mut names: Vec<&String> = query.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| format!("{name}={}", encode_component(&query[name])))
        .collect::<Vec<_>>()
        .join("&")
}

/// The keys a request maps to under both schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Upstream base joined with the request path, without a query string.
    pub endpoint: String,
    pub canonical_query: String,
    pub current: CacheKey,
    pub legacy: CacheKey,
}

impl Fingerprint {
    pub fn compute(
        upstream_base: &str,
        namespace: &str,
        path: &str,
        query: &IndexMap<String, String>,
    ) -> Self {
        let endpoint = format!("{upstream_base}{path}");
        let hashed_query = without_credential(query);
        let canonical_query = canonical_query(&hashed_query);

        let current = HexDigest::of(&format!("{endpoint}?{canonical_query}"));
        // A map of strings always serializes; the fallback only keeps this total.
        let legacy_json = serde_json::to_string(&hashed_query).unwrap_or_default();
        let legacy = HexDigest::of(&format!("{endpoint}#{legacy_json}"));

        Self {
            current: CacheKey::new(namespace, current, KeyTag::Json),
            legacy: CacheKey::new(LEGACY_NAMESPACE, legacy, KeyTag::LegacyJson),
            endpoint,
            canonical_query,
        }
    }
}
