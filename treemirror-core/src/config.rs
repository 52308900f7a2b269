//! Configuration for treemirror

use crate::MirrorError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Treemirror Configuration

[hierarchy]
# Id of the collection root. Items pointing at it are shown at the top level.
# Leave empty when the collection has no root item.
root_id = ""

[cache]
# SQLite file holding cached content, relative to .treemirror/
path = "cache.db"

[refresh]
# Simultaneous content fetches during a bulk refresh
concurrency = 5
# Pause between batches (e.g., "250ms", "1s")
batch_pause = "250ms"

[search]
# Minimum Jaro-Winkler similarity for a fuzzy term match
fuzzy_threshold = 0.85
# Items scoring below this are dropped from results
min_score = 0.25
title_weight = 1.0
content_weight = 0.6
attribute_weight = 0.3
"#;

/// Treemirror configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default)]
    pub root_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_pause")]
    pub batch_pause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_content_weight")]
    pub content_weight: f64,
    #[serde(default = "default_attribute_weight")]
    pub attribute_weight: f64,
}

// Default value functions
fn default_cache_path() -> String {
    "cache.db".to_string()
}
fn default_concurrency() -> usize {
    5
}
fn default_batch_pause() -> String {
    "250ms".to_string()
}
fn default_fuzzy_threshold() -> f64 {
    0.85
}
fn default_min_score() -> f64 {
    0.25
}
fn default_title_weight() -> f64 {
    1.0
}
fn default_content_weight() -> f64 {
    0.6
}
fn default_attribute_weight() -> f64 {
    0.3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_pause: default_batch_pause(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            min_score: default_min_score(),
            title_weight: default_title_weight(),
            content_weight: default_content_weight(),
            attribute_weight: default_attribute_weight(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| MirrorError::ConfigParse(e.to_string()))
    }

    /// Collection-root sentinel, if one is configured
    pub fn root_sentinel(&self) -> Option<&str> {
        let root = self.hierarchy.root_id.trim();
        (!root.is_empty()).then_some(root)
    }

    /// Get the pause between refresh batches as Duration
    pub fn batch_pause(&self) -> Duration {
        parse_duration(&self.refresh.batch_pause).unwrap_or(Duration::from_millis(250))
    }

    /// Concurrency clamped to at least one fetch
    pub fn concurrency(&self) -> usize {
        self.refresh.concurrency.max(1)
    }
}

/// Parse duration string (e.g., "250ms", "30s", "1h")
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        return num_str.parse().ok().map(Duration::from_millis);
    }

    let (unit_start, _) = s.char_indices().last()?;
    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str.parse().ok()?;

    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return None,
    };
    num.checked_mul(scale).map(Duration::from_secs)
}
