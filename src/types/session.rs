//! Driver session state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Coordinates, OptimizedStop, Stop};

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    Completed,
}

/// Kind of out-of-band stop-list change recorded by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopChange {
    Added,
    Cancelled,
}

/// Latest GPS fix reported by the driver app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsFix {
    pub location: Coordinates,
    pub timestamp: DateTime<Utc>,
}

/// One stop of the session's remaining route.
///
/// Carries both the published schedule (sequence, ETAs) and the original
/// pickup constraints so the stop can be fed back into the optimiser on a
/// reroute without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub stop_id: String,
    pub location: Coordinates,
    pub sequence: u32,
    pub arrival_time: String,
    pub departure_time: String,
    pub earliest_pickup: String,
    pub latest_pickup: String,
    pub service_time_minutes: u32,
}

impl RouteEntry {
    /// Pair a published stop with its source constraints.
    pub fn from_parts(optimized: &OptimizedStop, source: &Stop) -> Self {
        Self {
            stop_id: optimized.stop_id.clone(),
            location: optimized.location,
            sequence: optimized.sequence,
            arrival_time: optimized.arrival_time.clone(),
            departure_time: optimized.departure_time.clone(),
            earliest_pickup: source.earliest_pickup.clone(),
            latest_pickup: source.latest_pickup.clone(),
            service_time_minutes: source.service_time_minutes,
        }
    }

    /// The stop as optimiser input.
    pub fn as_stop(&self) -> Stop {
        Stop {
            stop_id: self.stop_id.clone(),
            location: self.location,
            earliest_pickup: self.earliest_pickup.clone(),
            latest_pickup: self.latest_pickup.clone(),
            service_time_minutes: self.service_time_minutes,
        }
    }

    /// The stop as published to the driver.
    pub fn as_optimized(&self) -> OptimizedStop {
        OptimizedStop {
            stop_id: self.stop_id.clone(),
            sequence: self.sequence,
            location: self.location,
            arrival_time: self.arrival_time.clone(),
            departure_time: self.departure_time.clone(),
        }
    }
}

/// Outcome of applying a stop completion to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The stop was in the remaining route and has been completed.
    Completed,
    /// The stop had already been completed earlier; nothing changed.
    AlreadyCompleted,
    /// The stop id is not part of this session at all.
    Unknown,
}

/// All mutable state for one active driver shift.
///
/// Stored as a single JSON document in the state backend under the driver
/// id, with a 12-hour TTL refreshed on every save. Contains only opaque
/// identifiers, coordinates, durations, and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSession {
    pub driver_id: String,
    /// Remaining route in visit order; completed stops are removed.
    pub current_route: Vec<RouteEntry>,
    pub last_gps: Option<GpsFix>,
    /// Append-only within the session's lifetime.
    pub completed_stop_ids: Vec<String>,
    /// Current projected remaining route time in minutes.
    pub remaining_duration_minutes: f64,
    /// Remaining route time captured when the route was last published.
    pub baseline_remaining_minutes: f64,
    /// Projected minutes behind the published schedule at the next stop.
    pub schedule_delay_minutes: f64,
    pub last_reroute_at: Option<DateTime<Utc>>,
    /// Set by out-of-band dispatcher changes; cleared by the next reroute.
    pub stops_changed: Option<StopChange>,
    /// Failed re-optimisation attempts since the last successful publish.
    pub reroute_error_count: u32,
    pub status: SessionStatus,
}

impl DriverSession {
    pub fn new(driver_id: impl Into<String>) -> Self {
        Self {
            driver_id: driver_id.into(),
            current_route: Vec::new(),
            last_gps: None,
            completed_stop_ids: Vec::new(),
            remaining_duration_minutes: 0.0,
            baseline_remaining_minutes: 0.0,
            schedule_delay_minutes: 0.0,
            last_reroute_at: None,
            stops_changed: None,
            reroute_error_count: 0,
            status: SessionStatus::Idle,
        }
    }

    /// The next stop the driver is expected to reach.
    pub fn head_stop_id(&self) -> Option<&str> {
        self.current_route.first().map(|e| e.stop_id.as_str())
    }

    /// Remaining stops as optimiser input, in current visit order.
    pub fn remaining_stops(&self) -> Vec<Stop> {
        self.current_route
            .iter()
            .filter(|e| !self.completed_stop_ids.iter().any(|c| c == &e.stop_id))
            .map(RouteEntry::as_stop)
            .collect()
    }

    /// Apply a stop completion. Completions are append-only; re-completing
    /// a stop is a harmless no-op, an id the session never saw is not.
    pub fn apply_completion(&mut self, stop_id: &str) -> CompletionOutcome {
        if self.completed_stop_ids.iter().any(|c| c == stop_id) {
            return CompletionOutcome::AlreadyCompleted;
        }
        let Some(pos) = self.current_route.iter().position(|e| e.stop_id == stop_id) else {
            return CompletionOutcome::Unknown;
        };
        self.current_route.remove(pos);
        self.completed_stop_ids.push(stop_id.to_string());
        if self.current_route.is_empty() {
            self.status = SessionStatus::Completed;
        }
        CompletionOutcome::Completed
    }

    /// Install a freshly published route and reset the drift baseline.
    ///
    /// Called both at initial publication and on every reroute, even one
    /// that reproduces the previous ordering, so the baseline always
    /// reflects the latest projection. The reroute cooldown clock
    /// (`last_reroute_at`) is deliberately untouched: only an actual
    /// reroute starts it, never the shift-start publication.
    pub fn install_route(&mut self, route: Vec<RouteEntry>, baseline_minutes: f64) {
        self.current_route = route;
        self.baseline_remaining_minutes = baseline_minutes;
        self.remaining_duration_minutes = baseline_minutes;
        self.schedule_delay_minutes = 0.0;
        self.stops_changed = None;
        self.status = if self.current_route.is_empty() {
            SessionStatus::Completed
        } else {
            SessionStatus::Active
        };
    }
}
