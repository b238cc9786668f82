//! Bus → WebSocket fan-out.
//!
//! Registered with the bus client on the orchestrator's subscription list.
//! Each bus message is decoded, parsed into its channel's payload type,
//! re-wrapped with the matching `kind` tag and broadcast to every client.
//! Unknown channels and malformed payloads are logged and dropped.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::BusHandler;
use crate::models::{
    ComponentMessage, InsightMessage, IntentMessage, Outgoing, ServiceStatus, TranscriptMessage,
};
use crate::orchestrator::manager::ConnectionManager;

pub struct BusFanout {
    manager: Arc<ConnectionManager>,
}

impl BusFanout {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

/// Map a channel's payload onto the client envelope for that channel.
/// `Ok(None)` means the channel is known but not client-facing.
pub fn envelope_for_channel(
    channel: &str,
    payload: &[u8],
) -> Result<Option<Outgoing>, serde_json::Error> {
    let envelope = match channel {
        "transcripts" => Some(Outgoing::Transcript(serde_json::from_slice::<
            TranscriptMessage,
        >(payload)?)),
        "intents" => Some(Outgoing::Intent(serde_json::from_slice::<IntentMessage>(
            payload,
        )?)),
        "components" => Some(Outgoing::Component(serde_json::from_slice::<
            ComponentMessage,
        >(payload)?)),
        "insights" => Some(Outgoing::Insight(serde_json::from_slice::<InsightMessage>(
            payload,
        )?)),
        "service_status" => Some(Outgoing::ServiceStatus(serde_json::from_slice::<
            ServiceStatus,
        >(payload)?)),
        // Specs inform the pipeline, not the browser; acknowledged and kept
        // off the client socket.
        "design_specs" => None,
        _ => None,
    };
    Ok(envelope)
}

fn channel_is_known(channel: &str) -> bool {
    crate::config::SUBSCRIBE_CHANNELS.contains(&channel)
}

#[async_trait::async_trait]
impl BusHandler for BusFanout {
    async fn handle(&self, channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        if std::str::from_utf8(payload).is_err() {
            warn!(channel, "Dropping non-UTF-8 bus payload");
            return Ok(());
        }
        if !channel_is_known(channel) {
            warn!(channel, "Message from unmapped bus channel dropped");
            return Ok(());
        }

        match envelope_for_channel(channel, payload) {
            Ok(Some(envelope)) => {
                metrics::counter!("bus_messages_relayed_total", 1);
                self.manager.broadcast(&envelope.to_json());
            }
            Ok(None) => {
                debug!(channel, "Known non-client channel, not relayed");
            }
            Err(e) => {
                warn!(channel, error = %e, "Malformed bus payload dropped");
            }
        }
        Ok(())
    }
}
