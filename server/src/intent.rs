//! Regex intent mining over the `transcripts` channel.
//!
//! Components and styles are lowercased, brand references title-cased.
//! Transcripts with no component mention produce nothing.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusHandler};
use crate::config::{INTENTS_CHANNEL, TRANSCRIPTS_CHANNEL};
use crate::models::{IntentMessage, TranscriptMessage};

static COMPONENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(button|dropdown|modal|tab|form)\b").unwrap());
static STYLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(hover|pill|rounded|outline)\b").unwrap());
static BRAND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(stripe|github|google)\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedIntent {
    pub component: String,
    pub styles: Vec<String>,
    pub brand_refs: Vec<String>,
}

/// Scan free text for a design intent. Returns `None` when no component
/// keyword appears.
pub fn detect(text: &str) -> Option<DetectedIntent> {
    let component = COMPONENT_PATTERN
        .captures(text)?
        .get(1)?
        .as_str()
        .to_lowercase();

    let styles = STYLE_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect();

    let brand_refs = BRAND_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| title_case(m.as_str()))
        .collect();

    Some(DetectedIntent {
        component,
        styles,
        brand_refs,
    })
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

pub struct IntentExtractor {
    bus: Arc<BusClient>,
}

impl IntentExtractor {
    pub fn spawn(bus: Arc<BusClient>) -> JoinHandle<()> {
        let handler = Arc::new(Self { bus: bus.clone() });
        bus.subscribe(vec![TRANSCRIPTS_CHANNEL.to_string()], handler)
    }
}

#[async_trait::async_trait]
impl BusHandler for IntentExtractor {
    async fn handle(&self, _channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        let transcript: TranscriptMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Unparseable transcript payload");
                return Ok(());
            }
        };

        let Some(found) = detect(&transcript.text) else {
            debug!(utterance = %transcript.utterance_id, "No intent in transcript");
            return Ok(());
        };

        let intent = IntentMessage {
            utterance_id: transcript.utterance_id,
            component: found.component,
            styles: found.styles,
            brand_refs: found.brand_refs,
            confidence: 1.0,
            speaker: transcript.speaker,
        };
        self.bus.publish_json(INTENTS_CHANNEL, &intent).await?;
        info!(utterance = %intent.utterance_id, component = intent.component, "Published intent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_component_style_and_brand() {
        let found = detect("Add a pill button for Stripe connect").unwrap();
        assert_eq!(found.component, "button");
        assert!(found.styles.contains(&"pill".to_string()));
        assert!(found.brand_refs.contains(&"Stripe".to_string()));
    }

    #[test]
    fn no_component_yields_none() {
        assert!(detect("make it pop a little more").is_none());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let found = detect("A ROUNDED DROPDOWN like GitHub's").unwrap();
        assert_eq!(found.component, "dropdown");
        assert_eq!(found.styles, vec!["rounded".to_string()]);
        assert_eq!(found.brand_refs, vec!["Github".to_string()]);
    }

    #[test]
    fn collects_every_style_mention() {
        let found = detect("an outline form with hover states and rounded corners").unwrap();
        assert_eq!(found.component, "form");
        assert_eq!(
            found.styles,
            vec![
                "outline".to_string(),
                "hover".to_string(),
                "rounded".to_string()
            ]
        );
    }

    #[test]
    fn word_boundaries_are_respected() {
        // "tabulated" must not match the "tab" component.
        assert!(detect("a tabulated report of hoverboards").is_none());
    }
}
