//! Insight mining for design specs.
//!
//! The social lookup is a stub: a canned post set stands in for the real
//! miner. Demographics come from keyword classification, sentiment buckets
//! from the post scores. Consumes `design_specs`, publishes on `insights`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{BusClient, BusHandler};
use crate::config::{DESIGN_SPECS_CHANNEL, INSIGHTS_CHANNEL};
use crate::models::{DesignSpec, InsightMessage, SocialPostPreview};

const SENTIMENT_BUCKETS: [&str; 3] = ["positive", "neutral", "negative"];

/// Keyword → demographic tag rules.
const KEYWORDS: [(&str, &[&str]); 3] = [
    ("Gen Z", &["tiktok", "snapchat"]),
    ("Frontend Dev", &["javascript", "react"]),
    ("Designer", &["figma", "adobe"]),
];

/// Tag free text by keyword lookup; `General` when nothing matches.
pub fn classify(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tags: Vec<String> = KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map(|(tag, _)| tag.to_string())
        .collect();
    if tags.is_empty() {
        tags.push("General".to_string());
    }
    tags
}

fn sentiment_bucket(score: f64) -> &'static str {
    if score > 0.2 {
        "positive"
    } else if score < -0.2 {
        "negative"
    } else {
        "neutral"
    }
}

fn stub_posts(component: &str) -> Vec<SocialPostPreview> {
    vec![
        SocialPostPreview {
            post_id: "post-1".to_string(),
            text: format!("This {component} looks great, sharing it on TikTok"),
            sentiment: 0.8,
            url: None,
            source: Some("reddit".to_string()),
        },
        SocialPostPreview {
            post_id: "post-2".to_string(),
            text: format!("Not my style, our Figma kit handles the {component} better"),
            sentiment: -0.5,
            url: None,
            source: Some("twitter".to_string()),
        },
    ]
}

/// Aggregate stubbed posts into the insight payload for one spec.
pub fn build_insight(spec: &DesignSpec) -> InsightMessage {
    let posts = stub_posts(&spec.component);

    let mut histogram: BTreeMap<String, u32> = SENTIMENT_BUCKETS
        .iter()
        .map(|bucket| (bucket.to_string(), 0))
        .collect();
    let mut breakdown: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();

    for post in &posts {
        let bucket = sentiment_bucket(post.sentiment);
        *histogram.entry(bucket.to_string()).or_insert(0) += 1;
        for tag in classify(&post.text) {
            let per_tag = breakdown.entry(tag).or_insert_with(|| {
                SENTIMENT_BUCKETS
                    .iter()
                    .map(|b| (b.to_string(), 0))
                    .collect()
            });
            *per_tag.entry(bucket.to_string()).or_insert(0) += 1;
        }
    }

    InsightMessage {
        spec_id: spec.spec_id,
        sentiment_histogram: histogram,
        demographic_breakdown: breakdown,
        top_posts: posts,
        generated_at: Utc::now(),
    }
}

pub struct InsightMiner {
    bus: Arc<BusClient>,
}

impl InsightMiner {
    pub fn spawn(bus: Arc<BusClient>) -> JoinHandle<()> {
        let handler = Arc::new(Self { bus: bus.clone() });
        bus.subscribe(vec![DESIGN_SPECS_CHANNEL.to_string()], handler)
    }
}

#[async_trait::async_trait]
impl BusHandler for InsightMiner {
    async fn handle(&self, _channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        let spec: DesignSpec = match serde_json::from_slice(payload) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "Unparseable design spec payload");
                return Ok(());
            }
        };
        let insight = build_insight(&spec);
        self.bus.publish_json(INSIGHTS_CHANNEL, &insight).await?;
        info!(spec_id = %insight.spec_id, "Published insight");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn spec() -> DesignSpec {
        DesignSpec {
            spec_id: Uuid::new_v4(),
            component: "button".to_string(),
            theme_tokens: BTreeMap::new(),
            interaction: None,
            source_utts: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn classify_matches_keywords() {
        assert_eq!(classify("saw it on TikTok"), vec!["Gen Z".to_string()]);
        assert_eq!(
            classify("our react and figma setup"),
            vec!["Frontend Dev".to_string(), "Designer".to_string()]
        );
        assert_eq!(classify("nothing relevant"), vec!["General".to_string()]);
    }

    #[test]
    fn histogram_counts_every_bucket() {
        let insight = build_insight(&spec());
        assert_eq!(insight.sentiment_histogram.get("positive"), Some(&1));
        assert_eq!(insight.sentiment_histogram.get("negative"), Some(&1));
        assert_eq!(insight.sentiment_histogram.get("neutral"), Some(&0));
    }

    #[test]
    fn breakdown_follows_post_tags() {
        let insight = build_insight(&spec());
        let gen_z = insight.demographic_breakdown.get("Gen Z").unwrap();
        assert_eq!(gen_z.get("positive"), Some(&1));
        let designer = insight.demographic_breakdown.get("Designer").unwrap();
        assert_eq!(designer.get("negative"), Some(&1));
    }

    #[test]
    fn insight_references_the_spec() {
        let s = spec();
        let insight = build_insight(&s);
        assert_eq!(insight.spec_id, s.spec_id);
        assert_eq!(insight.top_posts.len(), 2);
    }
}
