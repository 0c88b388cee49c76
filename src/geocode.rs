// Geocoder: resolves the distinct (city, country) pairs of a table to
// coordinates through an external place-lookup service, one throttled call
// per pair, and joins the result back onto every row.
use serde::Deserialize;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::GeocoderConfig;
use crate::error::{DashboardError, Result};
use crate::types::TransactionTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Place lookup. `Ok(None)` means the service answered without a match.
pub trait GeocodeService {
    fn lookup(&self, query: &str) -> Result<Option<Coordinates>>;
}

/// Client for a Nominatim-compatible `/search` endpoint.
pub struct NominatimClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl NominatimClient {
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn first_place(places: &[Place]) -> Result<Option<Coordinates>> {
    let Some(place) = places.first() else {
        return Ok(None);
    };
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| DashboardError::Geocode(format!("bad coordinate '{}': {}", v, e)))
    };
    Ok(Some(Coordinates {
        latitude: parse(&place.lat)?,
        longitude: parse(&place.lon)?,
    }))
}

impl GeocodeService for NominatimClient {
    fn lookup(&self, query: &str) -> Result<Option<Coordinates>> {
        let url = format!("{}/search", self.base_url);
        let places: Vec<Place> = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()?
            .error_for_status()?
            .json()?;
        first_place(&places)
    }
}

/// Enforces a minimum delay between consecutive lookups of the wrapped
/// service by sleeping the calling thread.
pub struct Throttled<S> {
    inner: S,
    min_delay: Duration,
    last_call: Cell<Option<Instant>>,
}

impl<S> Throttled<S> {
    pub fn new(inner: S, min_delay: Duration) -> Self {
        Self {
            inner,
            min_delay,
            last_call: Cell::new(None),
        }
    }
}

impl<S: GeocodeService> GeocodeService for Throttled<S> {
    fn lookup(&self, query: &str) -> Result<Option<Coordinates>> {
        if let Some(last) = self.last_call.get() {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                thread::sleep(self.min_delay - elapsed);
            }
        }
        self.last_call.set(Some(Instant::now()));
        self.inner.lookup(query)
    }
}

/// The production service: Nominatim behind the configured throttle.
pub fn service_from_config(config: &GeocoderConfig) -> Result<Throttled<NominatimClient>> {
    Ok(Throttled::new(
        NominatimClient::new(config)?,
        Duration::from_millis(config.min_delay_ms),
    ))
}

pub type PlaceKey = (Option<String>, Option<String>);

/// Resolved coordinates per (city, country) for one load; `None` marks a
/// pair that failed or had no match.
pub type CoordinateCache = HashMap<PlaceKey, Option<Coordinates>>;

fn place_query(city: &str, country: Option<&str>) -> String {
    match country {
        Some(country) => format!("{}, {}", city, country),
        None => city.to_string(),
    }
}

/// Look up every pair once. Failures are logged and recorded as unresolved;
/// the batch always completes.
pub fn resolve_places<S: GeocodeService + ?Sized>(pairs: &[PlaceKey], service: &S) -> CoordinateCache {
    let mut cache = CoordinateCache::new();
    for pair in pairs {
        if cache.contains_key(pair) {
            continue;
        }
        let coords = match &pair.0 {
            None => None,
            Some(city) => {
                let query = place_query(city, pair.1.as_deref());
                match service.lookup(&query) {
                    Ok(Some(c)) => {
                        debug!("Geocoded '{}' -> ({}, {})", query, c.latitude, c.longitude);
                        Some(c)
                    }
                    Ok(None) => {
                        debug!("No result for '{}'", query);
                        None
                    }
                    Err(e) => {
                        warn!("Geocoding '{}' failed: {}", query, e);
                        None
                    }
                }
            }
        };
        cache.insert(pair.clone(), coords);
    }
    cache
}

/// Distinct (city, country) pairs in first-appearance order.
pub fn distinct_places(table: &TransactionTable) -> Vec<PlaceKey> {
    let mut seen = HashSet::new();
    table
        .rows
        .iter()
        .map(|t| (t.city.clone(), t.country.clone()))
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

/// Populate latitude/longitude on every row. A table that already carries
/// coordinates is returned unchanged.
pub fn geocode<S: GeocodeService + ?Sized>(table: &TransactionTable, service: &S) -> TransactionTable {
    if table.has_coordinates {
        return table.clone();
    }
    let pairs = distinct_places(table);
    info!("Geocoding {} distinct places", pairs.len());
    let cache = resolve_places(&pairs, service);
    let resolved = cache.values().filter(|c| c.is_some()).count();
    info!("{} of {} places resolved", resolved, cache.len());

    let mut out = table.clone();
    for row in &mut out.rows {
        let coords = cache
            .get(&(row.city.clone(), row.country.clone()))
            .copied()
            .flatten();
        row.latitude = coords.map(|c| c.latitude);
        row.longitude = coords.map(|c| c.longitude);
    }
    out.has_coordinates = true;
    out
}
