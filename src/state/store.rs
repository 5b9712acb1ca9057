//! Session store: a key-value façade for driver state
//!
//! Each session is one JSON document keyed by the driver id; the bucket's
//! TTL evicts abandoned sessions and every save refreshes it.
//!
//! Concurrency contract: the fine-grained operations (`update_gps`,
//! `mark_completed`, `record_reroute`, `set_stops_changed`,
//! `install_published_route`) serialise per driver internally. Composite
//! flows like the ingest worker hold [`SessionStore::lock`] across their
//! whole load-mutate-save cycle and use `get`/`save` directly; those two
//! never lock.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::types::{
    CompletionOutcome, Coordinates, DriverSession, GpsFix, OptimizeRouteResponse, RouteEntry,
    Stop, StopChange,
};

use super::KvBackend;

/// Per-driver async mutexes, created on demand.
///
/// Entries are never removed: the map grows with the set of drivers seen by
/// this process, which is bounded by fleet size.
#[derive(Default)]
pub struct DriverLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DriverLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the driver's mutex; `.lock().await` it to hold exclusion.
    pub fn for_driver(&self, driver_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(driver_id.to_string())
            .or_default()
            .clone()
    }
}

/// Driver session store over the shared key-value backend.
pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
    locks: DriverLocks,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend, locks: DriverLocks::new() }
    }

    /// The per-driver exclusion used by every mutating flow.
    pub fn lock(&self, driver_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.for_driver(driver_id)
    }

    /// Persist the full session document, refreshing its TTL.
    /// Callers must hold the driver's lock.
    pub async fn save(&self, session: &DriverSession) -> Result<()> {
        let payload = serde_json::to_vec(session).context("failed to serialise session")?;
        self.backend.put(&session.driver_id, payload).await?;
        debug!(
            "Saved driver session: driver={} status={:?}",
            session.driver_id, session.status
        );
        Ok(())
    }

    /// Load the session, or `None` if absent or expired.
    pub async fn get(&self, driver_id: &str) -> Result<Option<DriverSession>> {
        let Some(raw) = self.backend.get(driver_id).await? else {
            return Ok(None);
        };
        let session =
            serde_json::from_slice(&raw).context("failed to deserialise session")?;
        Ok(Some(session))
    }

    /// Update only the GPS fix. Returns `false` when no session exists.
    pub async fn update_gps(
        &self,
        driver_id: &str,
        location: Coordinates,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let lock = self.lock(driver_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(false);
        };
        session.last_gps = Some(GpsFix { location, timestamp });
        self.save(&session).await?;
        Ok(true)
    }

    /// Apply a stop completion. `None` when no session exists.
    pub async fn mark_completed(
        &self,
        driver_id: &str,
        stop_id: &str,
    ) -> Result<Option<CompletionOutcome>> {
        let lock = self.lock(driver_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(None);
        };
        let outcome = session.apply_completion(stop_id);
        if outcome == CompletionOutcome::Completed {
            self.save(&session).await?;
            debug!("Stop completed: driver={driver_id} stop={stop_id}");
        }
        Ok(Some(outcome))
    }

    /// Replace the route and reset the drift baseline in a single write.
    /// Returns `false` when no session exists.
    pub async fn record_reroute(
        &self,
        driver_id: &str,
        route: Vec<RouteEntry>,
        baseline_minutes: f64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let lock = self.lock(driver_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.get(driver_id).await? else {
            return Ok(false);
        };
        session.install_route(route, baseline_minutes);
        session.last_reroute_at = Some(at);
        self.save(&session).await?;
        Ok(true)
    }

    /// Record an out-of-band stop-list change for the delay detector.
    /// Creates the session if the dispatcher moves before the driver does.
    pub async fn set_stops_changed(&self, driver_id: &str, change: StopChange) -> Result<()> {
        let lock = self.lock(driver_id);
        let _guard = lock.lock().await;

        let mut session = self
            .get(driver_id)
            .await?
            .unwrap_or_else(|| DriverSession::new(driver_id));
        session.stops_changed = Some(change);
        self.save(&session).await
    }

    /// Remove the session entirely (end of shift).
    pub async fn clear(&self, driver_id: &str) -> Result<()> {
        let lock = self.lock(driver_id);
        let _guard = lock.lock().await;

        self.backend.delete(driver_id).await?;
        info!("Driver session cleared: driver={driver_id}");
        Ok(())
    }

    /// Capture a freshly published optimisation as the session's route and
    /// drift baseline. Used at shift start and never fails the publishing
    /// request: storage trouble is logged and the route still ships.
    pub async fn install_published_route(
        &self,
        response: &OptimizeRouteResponse,
        source_stops: &[Stop],
    ) {
        let driver_id = response.driver_id.as_str();
        let entries = route_entries(response, source_stops);

        let lock = self.lock(driver_id);
        let _guard = lock.lock().await;

        let mut session = match self.get(driver_id).await {
            Ok(Some(session)) => session,
            Ok(None) => DriverSession::new(driver_id),
            Err(e) => {
                warn!("Could not load session for {driver_id}, starting fresh: {e:#}");
                DriverSession::new(driver_id)
            }
        };
        session.install_route(entries, response.total_duration_minutes);
        if let Err(e) = self.save(&session).await {
            warn!("Failed to persist initial route for {driver_id}: {e:#}");
        }
    }

    /// Reachability check for the health probe.
    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

/// Pair published stops with their source constraints, preserving visit
/// order. Stops missing from `source_stops` are skipped with a warning;
/// a published route never invents pickup windows.
pub fn route_entries(
    response: &OptimizeRouteResponse,
    source_stops: &[Stop],
) -> Vec<RouteEntry> {
    response
        .optimized_stops
        .iter()
        .filter_map(|optimized| {
            match source_stops.iter().find(|s| s.stop_id == optimized.stop_id) {
                Some(source) => Some(RouteEntry::from_parts(optimized, source)),
                None => {
                    warn!(
                        "Published stop {} has no source stop, dropping from session",
                        optimized.stop_id
                    );
                    None
                }
            }
        })
        .collect()
}
