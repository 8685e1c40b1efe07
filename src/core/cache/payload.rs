// src/core/cache/payload.rs

//! Typed view of an upstream (or cached) JSON document.

use serde_json::Value;
use std::fmt;

/// The logical outcome the upstream API reports in its `status` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiStatus {
    Ok,
    ZeroResults,
    /// Any other value, including a missing or non-string `status`.
    Other(String),
}

impl ApiStatus {
    pub fn from_document(doc: &Value) -> Self {
        match doc.get("status").and_then(Value::as_str) {
            Some("OK") => ApiStatus::Ok,
            Some("ZERO_RESULTS") => ApiStatus::ZeroResults,
            Some(other) => ApiStatus::Other(other.to_string()),
            None => ApiStatus::Other(String::new()),
        }
    }

    /// Only `OK` and `ZERO_RESULTS` responses may be persisted.
    pub fn is_cacheable(&self) -> bool {
        match self {
            ApiStatus::Ok | ApiStatus::ZeroResults => true,
            ApiStatus::Other(_) => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApiStatus::Ok => "OK",
            ApiStatus::ZeroResults => "ZERO_RESULTS",
            ApiStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed JSON response body together with its classified status.
///
/// Key order of the document is preserved, so re-serializing only ever
/// changes whitespace.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPayload {
    status: ApiStatus,
    document: Value,
}

impl GeoPayload {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(raw).map(Self::from_document)
    }

    pub fn from_document(document: Value) -> Self {
        Self {
            status: ApiStatus::from_document(&document),
            document,
        }
    }

    pub fn status(&self) -> &ApiStatus {
        &self.status
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The compact form, as written to the store.
    pub fn to_compact(&self) -> String {
        self.document.to_string()
    }

    /// Two-space indented JSON followed by a newline, as returned to callers.
    pub fn to_pretty(&self) -> String {
        format!("{:#}\n", self.document)
    }
}
