//! Live channel frame types
//!
//! Every frame is a JSON object with a `type` discriminator. The same
//! `route_updated` shape doubles as the pub/sub envelope on the per-driver
//! reroute topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OptimizedStop;

/// Why a new route was pushed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerouteReason {
    TrafficDelay,
    StopAdded,
    StopCancelled,
}

/// Error codes sent over the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidGps,
    InvalidStopId,
    DriverNotFound,
    OptimizationFailed,
    RateLimited,
}

/// Frames the driver app sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    GpsUpdate {
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_stop_id: Option<String>,
    },
    Pong,
}

/// Frames the server sends to the driver app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    RouteUpdated {
        reason: RerouteReason,
        optimized_stops: Vec<OptimizedStop>,
        total_duration_minutes: f64,
        google_maps_url: String,
    },
    Ping {
        server_time: DateTime<Utc>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerFrame::Error { code, message: message.into() }
    }
}
