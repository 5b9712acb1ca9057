//! Live driver sessions: ingest, registry, fan-out

pub mod ingest;
pub mod manager;
pub mod rate_limit;
pub mod registry;

pub use ingest::{EventOutcome, GpsEvent, IngestWorker, MemoryPublisher, NatsPublisher, RoutePublisher};
pub use manager::{MemoryTopics, NatsTopics, SessionManager, TopicSubscriber};
pub use rate_limit::RateLimiter;
pub use registry::{ConnectionRegistry, DriverChannel};

/// Per-driver pub/sub topic carrying `route_updated` envelopes.
pub fn reroute_topic(driver_id: &str) -> String {
    format!("reroute:{driver_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reroute_topic_format() {
        assert_eq!(reroute_topic("drv-1"), "reroute:drv-1");
    }
}
