// src/core/cache/response.rs

//! The request and response shapes exchanged with the routing layer.

use super::payload::GeoPayload;
use crate::core::GeoCacheError;
use indexmap::IndexMap;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// An inbound proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRequest {
    /// The full request path, e.g. `/maps/api/geocode/json`.
    pub path: String,
    /// Decoded query parameters in the order the caller sent them.
    pub query: IndexMap<String, String>,
}

impl GeoRequest {
    pub fn new(path: impl Into<String>, query: IndexMap<String, String>) -> Self {
        Self {
            path: path.into(),
            query,
        }
    }

    /// Builds a request from a raw (still percent-encoded) query string.
    /// A repeated parameter keeps its first position and its last value.
    pub fn from_raw_query(path: impl Into<String>, raw_query: Option<&str>) -> Self {
        let query = raw_query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect::<IndexMap<String, String>>()
            })
            .unwrap_or_default();
        Self::new(path, query)
    }
}

/// What the proxy hands back to the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ProxyResponse {
    /// A 200 response carrying the pretty-printed payload.
    pub fn json(payload: &GeoPayload) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: payload.to_pretty(),
        }
    }

    /// A plain-text response whose body is the status text and a newline.
    pub fn status_text(status: u16, text: &str) -> Self {
        Self {
            status,
            headers: vec![],
            body: format!("{text}\n"),
        }
    }

    pub fn unauthorized() -> Self {
        Self::status_text(401, "Unauthorized")
    }

    /// Maps an escalated error onto an HTTP status.
    pub fn from_error(err: &GeoCacheError) -> Self {
        match err {
            GeoCacheError::Upstream(_) => Self::status_text(502, "Bad Gateway"),
            _ => Self::status_text(500, "Internal Server Error"),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
