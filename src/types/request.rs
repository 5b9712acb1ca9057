//! Optimisation request/response types

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::MIN_STOPS_PER_ROUTE;
use crate::error::OptimizeError;

use super::{Coordinates, Stop};

/// Request to optimise a driver's pickup route.
///
/// The order of `stops` carries no meaning for the result; it only anchors
/// the naive baseline used by the optimisation score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRouteRequest {
    pub driver_id: String,
    pub driver_location: Coordinates,
    pub departure_time: DateTime<Utc>,
    pub stops: Vec<Stop>,
}

/// A stop in the optimised visit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedStop {
    pub stop_id: String,
    /// 1-based position in the visit order.
    pub sequence: u32,
    pub location: Coordinates,
    /// Arrival wall-clock time, `HH:MM`.
    pub arrival_time: String,
    /// Departure wall-clock time (arrival + service), `HH:MM`.
    pub departure_time: String,
}

/// Result of route optimisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRouteResponse {
    pub driver_id: String,
    pub optimized_stops: Vec<OptimizedStop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
    pub google_maps_url: String,
    /// How much the optimised order improved on the input order, in [0, 1].
    pub optimization_score: f64,
}

/// Driver ids double as state-store keys and pub/sub subject tokens, so
/// they are restricted to a safe alphabet.
pub fn is_valid_driver_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl OptimizeRouteRequest {
    /// Validate the whole request against the input bounds.
    ///
    /// `now` is injected so tests can pin the clock; production passes
    /// `Utc::now()`.
    pub fn validate(&self, max_stops: usize, now: DateTime<Utc>) -> Result<(), OptimizeError> {
        if !is_valid_driver_id(&self.driver_id) {
            return Err(OptimizeError::Validation(format!(
                "driver_id '{}' must be 1-128 chars of [A-Za-z0-9_-]",
                self.driver_id
            )));
        }
        if !self.driver_location.in_range() {
            return Err(OptimizeError::Validation(format!(
                "driver_location out of range ({}, {})",
                self.driver_location.lat, self.driver_location.lng
            )));
        }
        if self.departure_time < now {
            return Err(OptimizeError::Validation(
                "departure_time must not be in the past".to_string(),
            ));
        }
        if self.stops.len() < MIN_STOPS_PER_ROUTE || self.stops.len() > max_stops {
            return Err(OptimizeError::Validation(format!(
                "stops must contain between {} and {} items, got {}",
                MIN_STOPS_PER_ROUTE,
                max_stops,
                self.stops.len()
            )));
        }

        let mut seen = HashSet::new();
        for stop in &self.stops {
            stop.validate().map_err(OptimizeError::Validation)?;
            if !seen.insert(stop.stop_id.as_str()) {
                return Err(OptimizeError::Validation(format!(
                    "duplicate stop_id '{}'",
                    stop.stop_id
                )));
            }
        }
        Ok(())
    }
}
