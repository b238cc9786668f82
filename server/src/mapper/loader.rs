//! File-backed mappings dictionary with hot reload.
//!
//! The dictionary is loaded once at startup and swapped atomically whenever
//! the file's modification time advances. Readers clone an `Arc` snapshot
//! under a short read lock, so lookups never block a reload.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One brand's or style's property bag. Values are coerced to strings at
/// load time (`true`/`false` for booleans, decimal text for numbers).
pub type Props = BTreeMap<String, String>;

/// Parsed, key-normalized mappings dictionary.
#[derive(Debug, Default, Clone)]
pub struct Mappings {
    pub brands: HashMap<String, Props>,
    pub styles: HashMap<String, Props>,
    pub tailwind_token_map: HashMap<String, String>,
}

impl Mappings {
    pub fn is_empty(&self) -> bool {
        self.brands.is_empty() && self.styles.is_empty() && self.tailwind_token_map.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawMappings {
    #[serde(default)]
    brands: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    styles: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    tailwind_token_map: HashMap<String, String>,
}

struct LoaderState {
    mappings: Arc<Mappings>,
    last_modified: Option<SystemTime>,
}

pub struct MappingsLoader {
    path: PathBuf,
    state: RwLock<LoaderState>,
}

impl MappingsLoader {
    /// Create a loader and attempt the initial load. A missing or invalid
    /// file is logged and leaves the dictionary empty; the mapper then
    /// reports itself degraded rather than refusing to start.
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        let loader = Arc::new(Self {
            path: path.into(),
            state: RwLock::new(LoaderState {
                mappings: Arc::new(Mappings::default()),
                last_modified: None,
            }),
        });
        if let Err(e) = loader.reload() {
            warn!(path = %loader.path.display(), error = %e, "Initial mappings load failed");
        }
        loader
    }

    /// Reload if the file's modification time has advanced since the last
    /// successful load. Returns `true` when a reload actually happened.
    pub fn reload(&self) -> anyhow::Result<bool> {
        let modified = std::fs::metadata(&self.path)?.modified()?;
        {
            let state = self.state.read();
            if state.last_modified.is_some_and(|seen| modified <= seen) {
                debug!(path = %self.path.display(), "Mappings file unchanged");
                return Ok(false);
            }
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: RawMappings = serde_json::from_str(&raw)?;
        let mappings = normalize(parsed);
        info!(
            path = %self.path.display(),
            brands = mappings.brands.len(),
            styles = mappings.styles.len(),
            tokens = mappings.tailwind_token_map.len(),
            "Mappings loaded"
        );

        let mut state = self.state.write();
        state.mappings = Arc::new(mappings);
        state.last_modified = Some(modified);
        Ok(true)
    }

    /// Current dictionary snapshot. The lock is held only for the clone.
    pub fn snapshot(&self) -> Arc<Mappings> {
        self.state.read().mappings.clone()
    }

    pub fn brand_props(&self, brand_id: &str) -> Option<Props> {
        self.snapshot().brands.get(&brand_id.to_lowercase()).cloned()
    }

    pub fn style_props(&self, style_id: &str) -> Option<Props> {
        self.snapshot().styles.get(&style_id.to_lowercase()).cloned()
    }

    pub fn tailwind_class(&self, token: &str) -> Option<String> {
        self.snapshot().tailwind_token_map.get(token).cloned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawn the polling watcher that reloads when the file changes.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match loader.reload() {
                    Ok(true) => info!(path = %loader.path.display(), "Mappings hot-reloaded"),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(path = %loader.path.display(), error = %e, "Mappings reload failed")
                    }
                }
            }
        })
    }
}

fn normalize(raw: RawMappings) -> Mappings {
    Mappings {
        brands: normalize_bags(raw.brands, "brand"),
        styles: normalize_bags(raw.styles, "style"),
        tailwind_token_map: raw.tailwind_token_map,
    }
}

fn normalize_bags(
    bags: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    what: &str,
) -> HashMap<String, Props> {
    bags.into_iter()
        .map(|(id, bag)| {
            let mut props = Props::new();
            for (key, value) in bag {
                match coerce(&value) {
                    Some(text) => {
                        props.insert(key, text);
                    }
                    None => warn!(what, id, key, "Dropping non-scalar mapping property"),
                }
            }
            (id.to_lowercase(), props)
        })
        .collect()
}

fn coerce(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
