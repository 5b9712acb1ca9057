//! Content-addressed matrix cache
//!
//! Keyed by an MD5 fingerprint over the sorted coordinate list and the UTC
//! departure hour, so any request for the same points in the same hour hits
//! the same entry regardless of stop order. The stored value records the
//! coordinate order its grids were built in; reads remap the grids to the
//! caller's order. Values are immutable; eviction is the bucket's TTL only.
//! Cache trouble is never fatal; the resolver falls through to the provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::KvBackend;
use crate::types::Coordinates;

use super::TrafficMatrices;

/// Coordinate rendering used both in the fingerprint and in the stored
/// location list. Six decimals ≈ 0.1 m, well below GPS noise.
fn coord_key(c: &Coordinates) -> String {
    format!("{:.6},{:.6}", c.lat, c.lng)
}

/// Deterministic cache key: MD5 over sorted 6-decimal coordinates plus the
/// departure hour bucket.
pub fn matrix_fingerprint(locations: &[Coordinates], departure_time: DateTime<Utc>) -> String {
    let mut coords: Vec<String> = locations.iter().map(coord_key).collect();
    coords.sort();

    let hour_bucket = departure_time.format("%Y%m%d%H");
    let payload = format!("{}|{}", coords.join(";"), hour_bucket);
    format!("{:x}", md5::compute(payload))
}

/// Stored cache value: the grids plus the coordinate order they are
/// indexed by.
#[derive(Debug, Serialize, Deserialize)]
struct CachedMatrix {
    locations: Vec<String>,
    time_matrix: Vec<Vec<u64>>,
    distance_matrix: Vec<Vec<u64>>,
}

/// Map each requested coordinate to its index in the stored order.
/// Duplicate coordinates pair up positionally. `None` when the sets differ
/// (a fingerprint collision).
fn stored_order(requested: &[Coordinates], stored: &[String]) -> Option<Vec<usize>> {
    if requested.len() != stored.len() {
        return None;
    }
    let mut used = vec![false; stored.len()];
    let mut order = Vec::with_capacity(requested.len());
    for coord in requested {
        let key = coord_key(coord);
        let idx = stored
            .iter()
            .enumerate()
            .position(|(i, s)| !used[i] && *s == key)?;
        used[idx] = true;
        order.push(idx);
    }
    Some(order)
}

/// Shared matrix cache on the key-value backend.
#[derive(Clone)]
pub struct MatrixCache {
    backend: Arc<dyn KvBackend>,
}

impl MatrixCache {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Look up a cached matrix and remap it to the order of `locations`.
    /// Backend errors degrade to a miss.
    pub async fn get(&self, key: &str, locations: &[Coordinates]) -> Option<TrafficMatrices> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Matrix cache read failed, falling through to provider: {e:#}");
                return None;
            }
        };
        let cached: CachedMatrix = match serde_json::from_slice(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Matrix cache entry {key} is corrupt, ignoring: {e}");
                return None;
            }
        };

        let Some(order) = stored_order(locations, &cached.locations) else {
            warn!("Matrix cache entry {key} does not match requested locations, ignoring");
            return None;
        };

        debug!("Distance matrix cache hit key={key}");
        let matrices = TrafficMatrices {
            time_matrix: cached.time_matrix,
            distance_matrix: cached.distance_matrix,
        };
        Some(matrices.reorder(&order))
    }

    /// Store a matrix indexed by `locations`. Backend errors are logged and
    /// swallowed.
    pub async fn put(&self, key: &str, locations: &[Coordinates], matrices: &TrafficMatrices) {
        let cached = CachedMatrix {
            locations: locations.iter().map(coord_key).collect(),
            time_matrix: matrices.time_matrix.clone(),
            distance_matrix: matrices.distance_matrix.clone(),
        };
        let payload = match serde_json::to_vec(&cached) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialise matrix for cache: {e}");
                return;
            }
        };
        match self.backend.put(key, payload).await {
            Ok(()) => debug!("Distance matrix cached key={key}"),
            Err(e) => warn!("Matrix cache write failed, result not cached: {e:#}"),
        }
    }
}
