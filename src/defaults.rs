//! Fixed operational constants.
//!
//! Tunable thresholds (delay, reroute cooldown, TTLs) live in
//! [`crate::config::Config`]; the values here are part of the routing
//! contract itself and do not vary per deployment.

/// Maximum minutes a driver may wait at a stop before its window opens.
pub const SLACK_MINUTES: i64 = 30;

/// Shift budget: the route must end within this many minutes of departure.
pub const ROUTE_BUDGET_MINUTES: i64 = 600;

/// Sentinel cost for unreachable matrix entries. High enough that the
/// solver never picks such an arc, low enough to never overflow a sum.
pub const UNREACHABLE_COST: u64 = 999_999;

/// Heartbeat ping cadence on a live driver channel.
pub const HEARTBEAT_INTERVAL_SECONDS: u64 = 60;

/// A channel with no pong this long after a ping is considered dead.
pub const PONG_DEADLINE_SECONDS: u64 = 30;

/// Bound on the per-driver GPS event queue; older pure-GPS fixes are
/// coalesced away once it fills. Completion events are never dropped.
pub const GPS_QUEUE_DEPTH: usize = 3;

/// Inbound GPS frames allowed per driver per minute before RATE_LIMITED.
pub const GPS_RATE_MAX_PER_MINUTE: usize = 30;

/// Minimum number of stops in an optimisation request.
pub const MIN_STOPS_PER_ROUTE: usize = 2;

/// Service duration bounds per stop, in minutes.
pub const MIN_SERVICE_MINUTES: u32 = 1;
pub const MAX_SERVICE_MINUTES: u32 = 60;
