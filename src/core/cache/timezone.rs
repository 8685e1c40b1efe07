// src/core/cache/timezone.rs

//! Answers timezone lookups locally, without the store or the upstream API.

use super::payload::GeoPayload;
use super::response::GeoRequest;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use tzf_rs::DefaultFinder;

/// The endpoint served by [`LocalResolver`]. Responses for it are never cached.
pub const TIMEZONE_PATH: &str = "/maps/api/timezone/json";

/// An offline coordinate → timezone lookup.
pub trait TimezoneLookup: Send + Sync {
    /// Candidate IANA zone names for the point, best match first.
    fn lookup(&self, lat: f64, lng: f64) -> Vec<String>;
}

/// [`TimezoneLookup`] backed by the timezone boundary data embedded in `tzf-rs`.
pub struct TzfLookup {
    finder: DefaultFinder,
}

impl TzfLookup {
    /// Loads the embedded boundary data. This is slow, so do it once at startup.
    pub fn new() -> Self {
        Self {
            finder: DefaultFinder::new(),
        }
    }
}

impl Default for TzfLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl TimezoneLookup for TzfLookup {
    fn lookup(&self, lat: f64, lng: f64) -> Vec<String> {
        self.finder
            .get_tz_names(lng, lat)
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Parses `"lat,long"`, rejecting anything that is not a point on the globe.
pub fn parse_location(raw: &str) -> Option<(f64, f64)> {
    let (lat, lng) = raw.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lng: f64 = lng.trim().parse().ok()?;
    let valid = lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng);
    valid.then_some((lat, lng))
}

/// The local shortcut for the timezone endpoint.
#[derive(Clone)]
pub struct LocalResolver {
    lookup: Arc<dyn TimezoneLookup>,
}

impl std::fmt::Debug for LocalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalResolver").finish_non_exhaustive()
    }
}

impl LocalResolver {
    pub fn new(lookup: Arc<dyn TimezoneLookup>) -> Self {
        Self { lookup }
    }

    pub fn applies_to(path: &str) -> bool {
        path == TIMEZONE_PATH
    }

    /// Returns `{status: "OK", timeZoneId}` when the request is a timezone
    /// lookup whose location resolves to at least one zone. Any other outcome
    /// is `None` and the request continues down the normal path.
    pub fn resolve(&self, request: &GeoRequest) -> Option<GeoPayload> {
        if !Self::applies_to(&request.path) {
            return None;
        }
        let Some(raw) = request.query.get("location") else {
            debug!("Timezone request without a location; forwarding upstream");
            return None;
        };
        let Some((lat, lng)) = parse_location(raw) else {
            debug!("Unparseable timezone location '{raw}'; forwarding upstream");
            return None;
        };
        let zone = self.lookup.lookup(lat, lng).into_iter().next();
        let Some(zone) = zone else {
            debug!("No local timezone for {lat},{lng}; forwarding upstream");
            return None;
        };
        debug!("Resolved timezone {zone} locally for {lat},{lng}");
        Some(GeoPayload::from_document(json!({
            "status": "OK",
            "timeZoneId": zone,
        })))
    }
}
