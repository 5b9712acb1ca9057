//! Re-routing trigger logic
//!
//! Pure decision function over a session snapshot. Rules, in evaluation
//! order:
//!   1. Dispatcher added or cancelled a stop: always propagates;
//!      the cooldown never suppresses it.
//!   2. Cooldown: at most one traffic-triggered reroute per
//!      `min_reroute_interval_seconds`.
//!   3. Driver is behind schedule by more than the delay threshold.
//!   4. Remaining route time grew past `baseline × traffic_increase_ratio`.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::types::DriverSession;

/// Thresholds the detector compares against, lifted from [`Config`].
#[derive(Debug, Clone)]
pub struct DelayThresholds {
    pub delay_threshold_minutes: f64,
    pub traffic_increase_ratio: f64,
    pub min_reroute_interval_seconds: i64,
}

impl DelayThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delay_threshold_minutes: config.delay_threshold_minutes,
            traffic_increase_ratio: config.traffic_increase_ratio,
            min_reroute_interval_seconds: config.min_reroute_interval_seconds,
        }
    }
}

/// What tripped the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerouteTrigger {
    /// Behind schedule or traffic grew (rules 3 and 4).
    TrafficDelay,
    /// The dispatcher changed the stop list (rule 1).
    StopModified,
}

/// Decide whether the driver's route should be re-optimised now.
/// `None` means leave the current route alone.
pub fn should_reroute(
    session: &DriverSession,
    thresholds: &DelayThresholds,
    now: DateTime<Utc>,
) -> Option<RerouteTrigger> {
    let driver_id = session.driver_id.as_str();

    // Dispatcher changes must reach the driver promptly, cooldown or not.
    if session.stops_changed.is_some() {
        info!("Reroute triggered (stop modified): driver={driver_id}");
        return Some(RerouteTrigger::StopModified);
    }

    // Cooldown: suppress traffic-based rules right after a reroute to
    // avoid rapid-fire disruption.
    if let Some(last) = session.last_reroute_at {
        let since = (now - last).num_seconds();
        if since < thresholds.min_reroute_interval_seconds {
            debug!(
                "Reroute suppressed (cooldown): driver={driver_id} {since}s < {}s",
                thresholds.min_reroute_interval_seconds
            );
            return None;
        }
    }

    if session.schedule_delay_minutes > thresholds.delay_threshold_minutes {
        info!(
            "Reroute triggered (schedule delay): driver={driver_id} delay={:.1} min",
            session.schedule_delay_minutes
        );
        return Some(RerouteTrigger::TrafficDelay);
    }

    if session.baseline_remaining_minutes > 0.0
        && session.remaining_duration_minutes
            > session.baseline_remaining_minutes * thresholds.traffic_increase_ratio
    {
        info!(
            "Reroute triggered (traffic increase): driver={driver_id} remaining={:.1} baseline={:.1} ratio={:.2}",
            session.remaining_duration_minutes,
            session.baseline_remaining_minutes,
            thresholds.traffic_increase_ratio
        );
        return Some(RerouteTrigger::TrafficDelay);
    }

    None
}
