//! Health probe
//!
//! Reports whether the state backend answers and whether a traffic
//! provider credential is configured. Never calls the paid provider.

use serde::{Deserialize, Serialize};

use crate::state::SessionStore;

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Probe result as exposed on the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub state_backend: String,
    pub maps_api: String,
}

/// Run the probe against the session store and provider configuration.
pub async fn check(store: &SessionStore, maps_key_configured: bool) -> HealthReport {
    let backend_reachable = store.ping().await.is_ok();

    let status = match (backend_reachable, maps_key_configured) {
        (true, true) => HealthStatus::Healthy,
        (false, true) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    };

    HealthReport {
        status,
        state_backend: if backend_reachable { "reachable" } else { "unreachable" }.to_string(),
        maps_api: if maps_key_configured { "configured" } else { "not_configured" }.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{KvBackend, MemoryBackend, SessionStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct DeadBackend;

    #[async_trait]
    impl KvBackend for DeadBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("down")
        }
        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<()> {
            anyhow::bail!("down")
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            anyhow::bail!("down")
        }
        async fn ping(&self) -> Result<()> {
            anyhow::bail!("down")
        }
        fn name(&self) -> &str {
            "dead"
        }
    }

    #[tokio::test]
    async fn test_healthy_when_backend_up_and_key_set() {
        let store = SessionStore::new(MemoryBackend::shared());
        let report = check(&store, true).await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.state_backend, "reachable");
        assert_eq!(report.maps_api, "configured");
    }

    #[tokio::test]
    async fn test_degraded_when_backend_down_but_key_set() {
        let store = SessionStore::new(Arc::new(DeadBackend));
        let report = check(&store, true).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.state_backend, "unreachable");
    }

    #[tokio::test]
    async fn test_unhealthy_without_key() {
        let store = SessionStore::new(MemoryBackend::shared());
        let report = check(&store, false).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.maps_api, "not_configured");
    }

    #[test]
    fn test_report_serialises_snake_case() {
        let report = HealthReport {
            status: HealthStatus::Degraded,
            state_backend: "unreachable".to_string(),
            maps_api: "configured".to_string(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""status":"degraded""#));
        assert!(json.contains("state_backend"));
    }
}
