//! Code generation from design specs.
//!
//! Template substitution only: buttons get a canned Tailwind button, every
//! other component a placeholder div. Consumes `design_specs`, publishes on
//! `components`.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{BusClient, BusHandler};
use crate::config::{COMPONENTS_CHANNEL, DESIGN_SPECS_CHANNEL};
use crate::models::{ComponentMessage, DesignSpec};

/// Render a spec into a component without any model call.
pub fn generate(spec: &DesignSpec) -> ComponentMessage {
    let (jsx, named_exports) = if spec.component.eq_ignore_ascii_case("button") {
        let classes = if spec.theme_tokens.is_empty() {
            "px-4 py-2 bg-blue-500 text-white rounded".to_string()
        } else {
            let mut parts = vec!["px-4".to_string(), "py-2".to_string()];
            if let Some(radius) = spec.theme_tokens.get("border_radius") {
                parts.push(format!("rounded-{radius}"));
            } else {
                parts.push("rounded".to_string());
            }
            parts.push("bg-blue-500".to_string());
            parts.push("text-white".to_string());
            parts.join(" ")
        };
        (
            format!("<button class='{classes}'>Click</button>"),
            vec!["MockButton".to_string()],
        )
    } else {
        (
            format!("<div>{}</div>", spec.component),
            vec!["MockComponent".to_string()],
        )
    };

    ComponentMessage {
        spec_id: spec.spec_id,
        jsx,
        tailwind: true,
        named_exports,
        lint_passed: true,
        generated_at: Utc::now(),
    }
}

pub struct CodeGenerator {
    bus: Arc<BusClient>,
}

impl CodeGenerator {
    pub fn spawn(bus: Arc<BusClient>) -> JoinHandle<()> {
        let handler = Arc::new(Self { bus: bus.clone() });
        bus.subscribe(vec![DESIGN_SPECS_CHANNEL.to_string()], handler)
    }
}

#[async_trait::async_trait]
impl BusHandler for CodeGenerator {
    async fn handle(&self, _channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        let spec: DesignSpec = match serde_json::from_slice(payload) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "Unparseable design spec payload");
                return Ok(());
            }
        };
        let component = generate(&spec);
        self.bus.publish_json(COMPONENTS_CHANNEL, &component).await?;
        info!(spec_id = %component.spec_id, "Published component");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn spec(component: &str, tokens: &[(&str, &str)]) -> DesignSpec {
        DesignSpec {
            spec_id: Uuid::new_v4(),
            component: component.to_string(),
            theme_tokens: tokens
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            interaction: None,
            source_utts: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn button_spec_yields_mock_button() {
        let component = generate(&spec("button", &[]));
        assert!(component.jsx.starts_with("<button"));
        assert_eq!(component.named_exports, vec!["MockButton".to_string()]);
        assert!(component.tailwind);
        assert!(component.lint_passed);
    }

    #[test]
    fn button_radius_token_shapes_the_class_list() {
        let component = generate(&spec("button", &[("border_radius", "full")]));
        assert!(component.jsx.contains("rounded-full"));
    }

    #[test]
    fn other_components_fall_back_to_div() {
        let component = generate(&spec("modal", &[]));
        assert_eq!(component.jsx, "<div>modal</div>");
        assert_eq!(component.named_exports, vec!["MockComponent".to_string()]);
    }
}
