//! Session manager and fan-out
//!
//! Owns the lifecycle of a live driver channel: registration (one channel
//! per driver, newest wins), the per-session subscription that forwards
//! `route_updated` publications from the driver's topic, and the heartbeat
//! that reaps dead connections. Inbound frames are validated, rate-limited,
//! and handed to the ingest worker.
//!
//! Session state deliberately survives a disconnect: the KV TTL keeps it
//! alive so a reconnecting driver resyncs where they left off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::defaults::{GPS_RATE_MAX_PER_MINUTE, HEARTBEAT_INTERVAL_SECONDS, PONG_DEADLINE_SECONDS};
use crate::state::SessionStore;
use crate::types::{is_valid_driver_id, ClientFrame, Coordinates, ErrorCode, ServerFrame};

use super::ingest::{GpsEvent, IngestWorker};
use super::rate_limit::RateLimiter;
use super::registry::{ConnectionRegistry, DriverChannel};
use super::reroute_topic;

/// Subscription source for per-driver topics (NATS in production, an
/// in-memory hub in tests).
#[async_trait]
pub trait TopicSubscriber: Send + Sync {
    /// Subscribe to a topic, yielding raw payloads until dropped.
    async fn subscribe(&self, topic: String) -> Result<BoxStream<'static, Vec<u8>>>;
}

/// NATS-backed topic subscriptions.
pub struct NatsTopics {
    client: async_nats::Client,
}

impl NatsTopics {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TopicSubscriber for NatsTopics {
    async fn subscribe(&self, topic: String) -> Result<BoxStream<'static, Vec<u8>>> {
        let subscriber = self
            .client
            .subscribe(topic.clone())
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        Ok(subscriber.map(|msg| msg.payload.to_vec()).boxed())
    }
}

/// In-memory topic hub for tests.
#[derive(Default)]
pub struct MemoryTopics {
    senders: Mutex<HashMap<String, Vec<tokio::sync::mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl MemoryTopics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a payload to every subscriber of the topic.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        if let Some(senders) = self.senders.lock().get(topic) {
            for sender in senders {
                let _ = sender.send(payload.clone());
            }
        }
    }
}

#[async_trait]
impl TopicSubscriber for MemoryTopics {
    async fn subscribe(&self, topic: String) -> Result<BoxStream<'static, Vec<u8>>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.senders.lock().entry(topic).or_default().push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }
}

/// Live session manager.
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    ingest: Arc<IngestWorker>,
    store: Arc<SessionStore>,
    topics: Arc<dyn TopicSubscriber>,
    limiter: RateLimiter,
    /// Last pong instant per driver, compared against each ping.
    pongs: Mutex<HashMap<String, Instant>>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        ingest: Arc<IngestWorker>,
        store: Arc<SessionStore>,
        topics: Arc<dyn TopicSubscriber>,
    ) -> Self {
        Self {
            registry,
            ingest,
            store,
            topics,
            limiter: RateLimiter::new(GPS_RATE_MAX_PER_MINUTE, Duration::from_secs(60)),
            pongs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a driver channel: replace any prior connection, subscribe
    /// to the driver's reroute topic, and start the heartbeat.
    pub async fn connect(
        self: Arc<Self>,
        driver_id: &str,
        channel: Arc<dyn DriverChannel>,
    ) -> Result<()> {
        if !is_valid_driver_id(driver_id) {
            anyhow::bail!("invalid driver id '{driver_id}'");
        }

        let stream = self.topics.subscribe(reroute_topic(driver_id)).await?;

        let (entry, prior) = self.registry.register(driver_id, channel);
        if let Some(prior) = prior {
            info!("Replacing existing channel for driver={driver_id}");
            prior.token.cancel();
            prior.channel.close().await;
        }
        self.pongs.lock().insert(driver_id.to_string(), Instant::now());

        let manager = Arc::clone(&self);
        let forward_id = driver_id.to_string();
        let forward_token = entry.token.clone();
        tokio::spawn(async move {
            manager
                .forward_route_updates(forward_id, stream, forward_token)
                .await;
        });

        let manager = Arc::clone(&self);
        let heartbeat_id = driver_id.to_string();
        let heartbeat_token = entry.token.clone();
        let epoch = entry.epoch;
        tokio::spawn(async move {
            manager
                .run_heartbeat(heartbeat_id, epoch, heartbeat_token)
                .await;
        });

        Ok(())
    }

    /// Tear down the driver's channel. Session state persists in the store
    /// for its TTL so a reconnect resumes cleanly.
    pub async fn disconnect(&self, driver_id: &str) {
        if let Some(entry) = self.registry.remove_any(driver_id) {
            entry.token.cancel();
            entry.channel.close().await;
        }
        self.pongs.lock().remove(driver_id);
        info!("Driver disconnected: driver={driver_id}");
    }

    /// Explicit end of shift: drop the channel and the stored session.
    pub async fn end_shift(&self, driver_id: &str) -> Result<()> {
        self.disconnect(driver_id).await;
        self.store.clear(driver_id).await
    }

    /// Handle one inbound frame from the driver's channel.
    pub async fn handle_frame(&self, driver_id: &str, raw: &str) {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Unparseable frame from driver={driver_id}: {e}");
                self.registry
                    .send_to(
                        driver_id,
                        &ServerFrame::error(ErrorCode::InvalidGps, "malformed frame"),
                    )
                    .await;
                return;
            }
        };

        match frame {
            ClientFrame::Pong => {
                self.pongs.lock().insert(driver_id.to_string(), Instant::now());
            }
            ClientFrame::GpsUpdate { lat, lng, timestamp, completed_stop_id } => {
                let location = Coordinates::new(lat, lng);
                if !location.in_range() {
                    self.registry
                        .send_to(
                            driver_id,
                            &ServerFrame::error(
                                ErrorCode::InvalidGps,
                                format!("coordinates out of range ({lat}, {lng})"),
                            ),
                        )
                        .await;
                    return;
                }
                if !self.limiter.check_and_record(driver_id) {
                    self.registry
                        .send_to(
                            driver_id,
                            &ServerFrame::error(
                                ErrorCode::RateLimited,
                                "too many GPS updates, slow down",
                            ),
                        )
                        .await;
                    return;
                }
                self.ingest.clone().enqueue(
                    driver_id,
                    GpsEvent { location, timestamp, completed_stop_id },
                );
            }
        }
    }

    /// Forward topic publications to the driver's channel until cancelled.
    /// Publications with no registered channel are discarded; the session
    /// store and the topic already recorded them.
    async fn forward_route_updates(
        &self,
        driver_id: String,
        mut stream: BoxStream<'static, Vec<u8>>,
        token: CancellationToken,
    ) {
        info!("Fan-out listening: driver={driver_id}");
        loop {
            let payload = tokio::select! {
                _ = token.cancelled() => break,
                payload = stream.next() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let frame: ServerFrame = match serde_json::from_slice(&payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Invalid publication on {}: {e}", reroute_topic(&driver_id));
                    continue;
                }
            };
            if !matches!(frame, ServerFrame::RouteUpdated { .. }) {
                warn!("Unexpected frame type on {}", reroute_topic(&driver_id));
                continue;
            }
            self.registry.send_to(&driver_id, &frame).await;
        }
        info!("Fan-out stopped: driver={driver_id}");
    }

    /// Ping every minute; close the channel when a pong fails to arrive
    /// within the deadline.
    async fn run_heartbeat(&self, driver_id: String, epoch: u64, token: CancellationToken) {
        let interval = Duration::from_secs(HEARTBEAT_INTERVAL_SECONDS);
        let deadline = Duration::from_secs(PONG_DEADLINE_SECONDS);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let ping = ServerFrame::Ping { server_time: Utc::now() };
            if !self.registry.send_to(&driver_id, &ping).await {
                // Channel gone or unwritable: tear it down like a timeout
                if let Some(entry) = self.registry.remove(&driver_id, epoch) {
                    entry.token.cancel();
                    entry.channel.close().await;
                }
                self.pongs.lock().remove(&driver_id);
                return;
            }
            let pinged_at = Instant::now();

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(deadline) => {}
            }

            let alive = self
                .pongs
                .lock()
                .get(&driver_id)
                .is_some_and(|pong| *pong >= pinged_at);
            if !alive {
                warn!("Heartbeat timeout for driver={driver_id}, closing channel");
                if let Some(entry) = self.registry.remove(&driver_id, epoch) {
                    entry.token.cancel();
                    entry.channel.close().await;
                }
                self.pongs.lock().remove(&driver_id);
                return;
            }
        }
    }
}
