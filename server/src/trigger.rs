//! Trigger: turns high-confidence intents into design specs.
//!
//! Subscribes to `intents`, joins each qualifying intent against the shared
//! mappings dictionary and publishes the resulting spec on `design_specs`.
//! Intents below the confidence threshold are dropped silently.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusClient, BusHandler};
use crate::config::{DESIGN_SPECS_CHANNEL, INTENTS_CHANNEL};
use crate::mapper::{map_request, MapRequest, MapResponse, MappingsLoader};
use crate::models::{DesignSpec, IntentMessage};

pub struct TriggerService {
    bus: Arc<BusClient>,
    loader: Arc<MappingsLoader>,
    confidence_threshold: f64,
}

impl TriggerService {
    pub fn spawn(
        bus: Arc<BusClient>,
        loader: Arc<MappingsLoader>,
        confidence_threshold: f64,
    ) -> JoinHandle<()> {
        let handler = Arc::new(Self {
            bus: bus.clone(),
            loader,
            confidence_threshold,
        });
        bus.subscribe(vec![INTENTS_CHANNEL.to_string()], handler)
    }

    fn qualifies(&self, intent: &IntentMessage) -> bool {
        intent.confidence >= self.confidence_threshold
    }

    /// Join an intent with the dictionary. A degraded dictionary produces an
    /// empty token map, never a dropped spec.
    pub fn map_intent(&self, intent: &IntentMessage) -> MapResponse {
        let snapshot = self.loader.snapshot();
        map_request(
            &snapshot,
            &MapRequest {
                styles: intent.styles.clone(),
                brand_refs: intent.brand_refs.clone(),
                component: Some(intent.component.clone()),
            },
        )
    }
}

/// Assemble the published spec from an intent and its mapped tokens.
pub fn build_design_spec(intent: &IntentMessage, mapping: &MapResponse) -> DesignSpec {
    DesignSpec {
        spec_id: Uuid::new_v4(),
        component: intent.component.clone(),
        interaction: mapping.theme_tokens.get("interaction").cloned(),
        theme_tokens: mapping.theme_tokens.clone(),
        source_utts: vec![intent.utterance_id],
        created_at: Utc::now(),
    }
}

#[async_trait::async_trait]
impl BusHandler for TriggerService {
    async fn handle(&self, _channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        let intent: IntentMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Unparseable intent payload");
                return Ok(());
            }
        };

        if !self.qualifies(&intent) {
            debug!(
                utterance = %intent.utterance_id,
                confidence = intent.confidence,
                "Intent below confidence threshold, dropped"
            );
            return Ok(());
        }

        let mapping = self.map_intent(&intent);
        let spec = build_design_spec(&intent, &mapping);
        self.bus.publish_json(DESIGN_SPECS_CHANNEL, &spec).await?;
        info!(spec_id = %spec.spec_id, component = spec.component, "Published design spec");
        Ok(())
    }
}
