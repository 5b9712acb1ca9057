//! NATS request/reply handlers
//!
//! The core's synchronous contracts, served over request/reply subjects
//! for in-cluster callers (the HTTP gateway among them):
//!   - `medroute.route.optimize`: run the pipeline and capture the
//!     session baseline
//!   - `medroute.health`: the health probe

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::error::OptimizeError;
use crate::services::health;
use crate::services::pipeline::Optimizer;
use crate::state::SessionStore;
use crate::types::OptimizeRouteRequest;

pub const OPTIMIZE_SUBJECT: &str = "medroute.route.optimize";
pub const HEALTH_SUBJECT: &str = "medroute.health";

fn error_payload(err: &OptimizeError) -> Vec<u8> {
    serde_json::json!({
        "error": {
            "code": err.code(),
            "message": err.to_string(),
        }
    })
    .to_string()
    .into_bytes()
}

/// Serve optimisation requests until the subscription ends.
pub async fn handle_optimize(
    client: Client,
    mut subscriber: Subscriber,
    optimizer: Arc<Optimizer>,
    store: Arc<SessionStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Optimize request without reply subject, dropping");
                continue;
            }
        };

        let request: OptimizeRouteRequest = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                let err = OptimizeError::Validation(format!("unparseable request: {e}"));
                let _ = client.publish(reply, error_payload(&err).into()).await;
                continue;
            }
        };

        info!("Optimize request: driver={}", request.driver_id);
        let payload = match optimizer.run_and_publish(&request, &store).await {
            Ok(response) => serde_json::to_vec(&response)?,
            Err(err) => {
                error!("Optimisation failed for driver={}: {err}", request.driver_id);
                error_payload(&err)
            }
        };
        let _ = client.publish(reply, payload.into()).await;
    }

    Ok(())
}

/// Serve health probes until the subscription ends.
pub async fn handle_health(
    client: Client,
    mut subscriber: Subscriber,
    store: Arc<SessionStore>,
    maps_key_configured: bool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = msg.reply else {
            continue;
        };
        let report = health::check(&store, maps_key_configured).await;
        let _ = client
            .publish(reply, serde_json::to_vec(&report)?.into())
            .await;
    }

    Ok(())
}
