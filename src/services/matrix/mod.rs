//! Traffic-aware distance/time matrices
//!
//! Uses the Google Distance Matrix API in production, mock for tests.

mod cache;
mod google;
mod resolver;

pub use cache::{matrix_fingerprint, MatrixCache};
pub use google::{GoogleMapsConfig, GoogleMatrixClient};
pub use resolver::{MatrixResolver, ResolvedMatrices};

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::geo;
use crate::types::Coordinates;

/// Pairwise traffic-adjusted travel matrices.
///
/// Index 0 is the driver origin, 1..N-1 the stops in caller order. The
/// diagonal is zero; unreachable pairs hold
/// [`crate::defaults::UNREACHABLE_COST`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficMatrices {
    /// Travel time in seconds [i][j] from location i to location j
    pub time_matrix: Vec<Vec<u64>>,
    /// Distance in meters [i][j] from location i to location j
    pub distance_matrix: Vec<Vec<u64>>,
}

impl TrafficMatrices {
    pub fn size(&self) -> usize {
        self.time_matrix.len()
    }

    /// Travel time from location i to location j in seconds
    pub fn travel_seconds(&self, from: usize, to: usize) -> u64 {
        self.time_matrix[from][to]
    }

    /// Distance from location i to location j in meters
    pub fn distance_meters(&self, from: usize, to: usize) -> u64 {
        self.distance_matrix[from][to]
    }

    /// Whether both grids are square with the expected dimension.
    pub fn is_square(&self, n: usize) -> bool {
        self.time_matrix.len() == n
            && self.distance_matrix.len() == n
            && self.time_matrix.iter().all(|row| row.len() == n)
            && self.distance_matrix.iter().all(|row| row.len() == n)
    }

    /// Re-index both grids so that new index `r` maps to old index
    /// `order[r]`. Used to align matrices with the optimised visit order.
    pub fn reorder(&self, order: &[usize]) -> TrafficMatrices {
        let remap = |grid: &Vec<Vec<u64>>| {
            order
                .iter()
                .map(|&r| order.iter().map(|&c| grid[r][c]).collect())
                .collect()
        };
        TrafficMatrices {
            time_matrix: remap(&self.time_matrix),
            distance_matrix: remap(&self.distance_matrix),
        }
    }
}

/// Traffic provider abstraction (Google Distance Matrix, mock, etc.)
#[async_trait]
pub trait MatrixProvider: Send + Sync {
    /// Fetch matrices for the locations with traffic predicted at the
    /// departure instant. First location is the driver origin.
    async fn fetch(
        &self,
        locations: &[Coordinates],
        departure_time: DateTime<Utc>,
    ) -> Result<TrafficMatrices>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Mock provider for tests.
/// Uses Haversine distance × road coefficient for estimation and counts
/// how often it was called, so cache behaviour can be asserted.
pub struct MockMatrixProvider {
    calls: AtomicUsize,
    /// Coefficient for converting straight-line to road distance
    road_coefficient: f64,
    /// Average speed in km/h for time estimation
    average_speed_kmh: f64,
}

impl Default for MockMatrixProvider {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            road_coefficient: 1.3,
            average_speed_kmh: 40.0,
        }
    }
}

impl MockMatrixProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatrixProvider for MockMatrixProvider {
    async fn fetch(
        &self,
        locations: &[Coordinates],
        _departure_time: DateTime<Utc>,
    ) -> Result<TrafficMatrices> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let n = locations.len();
        let mut time_matrix = vec![vec![0u64; n]; n];
        let mut distance_matrix = vec![vec![0u64; n]; n];

        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let road_km = geo::haversine_distance(&locations[i], &locations[j])
                        * self.road_coefficient;
                    distance_matrix[i][j] = (road_km * 1000.0) as u64;
                    time_matrix[i][j] =
                        (road_km / self.average_speed_kmh * 3600.0) as u64;
                }
            }
        }

        Ok(TrafficMatrices { time_matrix, distance_matrix })
    }

    fn name(&self) -> &str {
        "MockMatrix"
    }
}
