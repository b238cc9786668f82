//! Brand/style property merging and Tailwind class generation.
//!
//! Merge precedence, lowest to highest: brand properties in request order,
//! style properties in request order, then the component-qualified style
//! (`"<component>_<style>"`) when the dictionary defines one. Later writers
//! win key-by-key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::loader::{Mappings, Props};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapRequest {
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub brand_refs: Vec<String>,
    #[serde(default)]
    pub component: Option<String>,
}

impl MapRequest {
    /// Lowercase and trim identifiers, dropping empties.
    fn normalized(&self) -> MapRequest {
        let clean = |items: &[String]| {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        MapRequest {
            styles: clean(&self.styles),
            brand_refs: clean(&self.brand_refs),
            component: self
                .component
                .as_deref()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResponse {
    pub theme_tokens: BTreeMap<String, String>,
    pub tailwind_classes: Vec<String>,
    pub source_styles: Vec<String>,
    pub source_brands: Vec<String>,
}

/// Join a request against the dictionary: merge property bags and derive
/// Tailwind classes. Unknown brands/styles are logged and contribute nothing.
pub fn map_request(mappings: &Mappings, request: &MapRequest) -> MapResponse {
    let request = request.normalized();

    let mut theme_tokens: BTreeMap<String, String> = BTreeMap::new();
    let mut source_brands = Vec::new();
    let mut source_styles = Vec::new();

    for brand in &request.brand_refs {
        match mappings.brands.get(brand) {
            Some(props) => {
                apply(&mut theme_tokens, props);
                source_brands.push(brand.clone());
            }
            None => warn!(brand, "Brand reference not found in mappings"),
        }
    }

    for style in &request.styles {
        match mappings.styles.get(style) {
            Some(props) => {
                apply(&mut theme_tokens, props);
                source_styles.push(style.clone());
            }
            None => warn!(style, "Style not found in mappings"),
        }
        if let Some(component) = &request.component {
            let qualified = format!("{component}_{style}");
            if let Some(props) = mappings.styles.get(&qualified) {
                apply(&mut theme_tokens, props);
                source_styles.push(qualified);
            }
        }
    }

    let tailwind_classes = tailwind_classes(mappings, &theme_tokens);

    MapResponse {
        theme_tokens,
        tailwind_classes,
        source_styles,
        source_brands,
    }
}

fn apply(tokens: &mut BTreeMap<String, String>, props: &Props) {
    for (key, value) in props {
        tokens.insert(key.clone(), value.clone());
    }
}

/// Derive Tailwind classes from merged tokens. A value present in the token
/// map wins; otherwise `border_radius` becomes `rounded-<v>`, `padding*`
/// values pass through verbatim, and `interaction` is split on whitespace.
/// Duplicates keep their first occurrence.
pub fn tailwind_classes(mappings: &Mappings, tokens: &BTreeMap<String, String>) -> Vec<String> {
    let mut classes: Vec<String> = Vec::new();

    for (key, value) in tokens {
        if key == "interaction" {
            continue; // appended below so its classes stay whole
        }
        if value == "true" || value == "false" {
            continue; // boolean flags carry no class of their own
        }
        if let Some(mapped) = mappings.tailwind_token_map.get(value) {
            classes.push(mapped.clone());
        } else if key == "border_radius" {
            classes.push(format!("rounded-{value}"));
        } else if key.starts_with("padding") {
            classes.push(value.clone());
        }
    }

    if let Some(interaction) = tokens.get("interaction") {
        classes.extend(interaction.split_whitespace().map(str::to_string));
    }

    dedup_first_seen(classes)
}

fn dedup_first_seen(classes: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    classes
        .into_iter()
        .filter(|class| seen.insert(class.clone()))
        .collect()
}
