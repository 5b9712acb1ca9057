//! Pickup stop type

use serde::{Deserialize, Serialize};

use crate::defaults::{MAX_SERVICE_MINUTES, MIN_SERVICE_MINUTES};
use crate::services::timeutil::parse_time_str;

use super::Coordinates;

/// A patient pickup stop as supplied by the caller.
///
/// `stop_id` is an opaque caller-managed identifier, uncorrelated with any
/// person. Pickup windows are wall-clock `HH:MM` strings on the same clock
/// as the request's departure instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub location: Coordinates,
    pub earliest_pickup: String,
    pub latest_pickup: String,
    pub service_time_minutes: u32,
}

impl Stop {
    /// Validate this stop in isolation. Returns a human-readable reason on
    /// the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.stop_id.is_empty() {
            return Err("stop_id must not be empty".to_string());
        }
        if !self.location.in_range() {
            return Err(format!(
                "stop {} has coordinates out of range ({}, {})",
                self.stop_id, self.location.lat, self.location.lng
            ));
        }
        let earliest = parse_time_str(&self.earliest_pickup).ok_or_else(|| {
            format!(
                "stop {} earliest_pickup '{}' is not a valid HH:MM time",
                self.stop_id, self.earliest_pickup
            )
        })?;
        let latest = parse_time_str(&self.latest_pickup).ok_or_else(|| {
            format!(
                "stop {} latest_pickup '{}' is not a valid HH:MM time",
                self.stop_id, self.latest_pickup
            )
        })?;
        if earliest >= latest {
            return Err(format!(
                "stop {}: earliest_pickup ({}) must be before latest_pickup ({})",
                self.stop_id, self.earliest_pickup, self.latest_pickup
            ));
        }
        if !(MIN_SERVICE_MINUTES..=MAX_SERVICE_MINUTES).contains(&self.service_time_minutes) {
            return Err(format!(
                "stop {}: service_time_minutes must be between {} and {}, got {}",
                self.stop_id, MIN_SERVICE_MINUTES, MAX_SERVICE_MINUTES, self.service_time_minutes
            ));
        }
        Ok(())
    }

    /// Pickup window as minutes since midnight. Only meaningful after
    /// [`Stop::validate`] has passed.
    pub fn window_minutes(&self) -> Option<(i64, i64)> {
        let earliest = parse_time_str(&self.earliest_pickup)?;
        let latest = parse_time_str(&self.latest_pickup)?;
        Some((earliest, latest))
    }
}
