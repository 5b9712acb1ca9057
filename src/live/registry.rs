//! Connection registry for live driver channels
//!
//! Process-local map of driver id → channel. Each driver has at most one
//! channel; a new connection replaces and closes the prior one. The actual
//! WebSocket lives in the transport adapter behind [`DriverChannel`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::ServerFrame;

/// Outbound half of a driver's bidirectional channel.
#[async_trait]
pub trait DriverChannel: Send + Sync {
    /// Deliver a frame to the driver app.
    async fn send(&self, frame: &ServerFrame) -> Result<()>;

    /// Close the underlying connection.
    async fn close(&self);
}

/// A registered channel plus the token that stops its background tasks.
#[derive(Clone)]
pub struct RegisteredChannel {
    pub channel: Arc<dyn DriverChannel>,
    pub token: CancellationToken,
    /// Monotonic registration number, so a stale disconnect cannot tear
    /// down a replacement connection.
    pub epoch: u64,
}

/// Thread-safe registry of active driver channels.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, RegisteredChannel>,
    next_epoch: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for the driver, returning its entry and any
    /// replaced predecessor (which the caller must cancel and close).
    pub fn register(
        &self,
        driver_id: &str,
        channel: Arc<dyn DriverChannel>,
    ) -> (RegisteredChannel, Option<RegisteredChannel>) {
        let mut inner = self.inner.lock();
        inner.next_epoch += 1;
        let entry = RegisteredChannel {
            channel,
            token: CancellationToken::new(),
            epoch: inner.next_epoch,
        };
        let prior = inner.channels.insert(driver_id.to_string(), entry.clone());
        info!(
            "Driver channel registered: driver={} active={}",
            driver_id,
            inner.channels.len()
        );
        (entry, prior)
    }

    /// Remove the driver's entry if it still belongs to `epoch`.
    /// Returns the removed entry for teardown.
    pub fn remove(&self, driver_id: &str, epoch: u64) -> Option<RegisteredChannel> {
        let mut inner = self.inner.lock();
        match inner.channels.get(driver_id) {
            Some(current) if current.epoch == epoch => {
                let removed = inner.channels.remove(driver_id);
                info!(
                    "Driver channel removed: driver={} active={}",
                    driver_id,
                    inner.channels.len()
                );
                removed
            }
            _ => None,
        }
    }

    /// Remove the driver's entry regardless of epoch.
    pub fn remove_any(&self, driver_id: &str) -> Option<RegisteredChannel> {
        let removed = self.inner.lock().channels.remove(driver_id);
        if removed.is_some() {
            info!("Driver channel removed: driver={driver_id}");
        }
        removed
    }

    pub fn get(&self, driver_id: &str) -> Option<RegisteredChannel> {
        self.inner.lock().channels.get(driver_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Push a frame to the driver if a channel is registered. Returns
    /// whether delivery was attempted and succeeded; an absent channel is
    /// a silent skip, because publications for disconnected drivers are
    /// simply discarded at the fan-out.
    pub async fn send_to(&self, driver_id: &str, frame: &ServerFrame) -> bool {
        let Some(entry) = self.get(driver_id) else {
            debug!("No active channel for driver={driver_id}, frame discarded");
            return false;
        };
        match entry.channel.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send frame to driver={driver_id}: {e:#}");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_channel::MemoryChannel;
    use super::*;
    use crate::types::ErrorCode;

    #[tokio::test]
    async fn test_register_and_send() {
        let registry = ConnectionRegistry::new();
        let channel = MemoryChannel::new();
        registry.register("drv-1", channel.clone());

        let delivered = registry
            .send_to("drv-1", &ServerFrame::error(ErrorCode::RateLimited, "slow down"))
            .await;
        assert!(delivered);
        assert_eq!(channel.sent_frames().len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_absent_driver_is_discarded() {
        let registry = ConnectionRegistry::new();
        let delivered = registry
            .send_to("ghost", &ServerFrame::error(ErrorCode::DriverNotFound, "?"))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_new_registration_returns_prior() {
        let registry = ConnectionRegistry::new();
        let first = MemoryChannel::new();
        let second = MemoryChannel::new();

        let (_, none) = registry.register("drv-1", first);
        assert!(none.is_none());

        let (entry, prior) = registry.register("drv-1", second.clone());
        assert!(prior.is_some());
        assert_eq!(registry.active_count(), 1);

        // The active entry is the second channel
        registry
            .send_to("drv-1", &ServerFrame::error(ErrorCode::RateLimited, "x"))
            .await;
        assert_eq!(second.sent_frames().len(), 1);
        assert!(entry.epoch > prior.unwrap().epoch);
    }

    #[tokio::test]
    async fn test_stale_epoch_cannot_remove_replacement() {
        let registry = ConnectionRegistry::new();
        let (old_entry, _) = registry.register("drv-1", MemoryChannel::new());
        let (_new_entry, _) = registry.register("drv-1", MemoryChannel::new());

        // The old connection's teardown must not evict the replacement
        assert!(registry.remove("drv-1", old_entry.epoch).is_none());
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_matching_epoch() {
        let registry = ConnectionRegistry::new();
        let (entry, _) = registry.register("drv-1", MemoryChannel::new());
        assert!(registry.remove("drv-1", entry.epoch).is_some());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_reports_false() {
        let registry = ConnectionRegistry::new();
        let channel = MemoryChannel::new();
        registry.register("drv-1", channel.clone());
        channel.close().await;

        let delivered = registry
            .send_to("drv-1", &ServerFrame::error(ErrorCode::RateLimited, "x"))
            .await;
        assert!(!delivered);
    }
}
