//! Index configuration.
//!
//! Values come from defaults, optionally overlaid with environment variables
//! via [`IndexConfig::from_env`]. There is no CLI surface.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_REFRESH_INTERVAL: &str = "VAULT_SEARCH_REFRESH_INTERVAL";
pub const ENV_BATCH_SIZE: &str = "VAULT_SEARCH_BATCH_SIZE";
pub const ENV_AUTO_REFRESH: &str = "VAULT_SEARCH_AUTO_REFRESH";
pub const ENV_PERSISTENT: &str = "VAULT_SEARCH_PERSISTENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Age (seconds) after which a search schedules a background refresh
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Files ingested per batch during a refresh cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Let searches trigger background refreshes when the index is stale
    #[serde(default = "default_true")]
    pub auto_refresh: bool,

    /// Use the on-disk store; false forces the in-memory store
    #[serde(default = "default_true")]
    pub persistent: bool,

    /// Files larger than this are rejected at ingestion (default: 10MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default)]
    pub regex: RegexTuning,
}

/// Knobs for the regex search optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexTuning {
    #[serde(default = "default_max_matches_per_file")]
    pub max_matches_per_file: usize,

    /// Candidate files evaluated in parallel per batch
    #[serde(default = "default_parallel_width")]
    pub parallel_width: usize,

    /// Documents above this size are scanned in overlapping chunks
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Shortest literal prefix worth a full-text pre-filter
    #[serde(default = "default_min_prefix_len")]
    pub min_prefix_len: usize,
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_matches_per_file() -> usize {
    5
}

fn default_parallel_width() -> usize {
    10
}

fn default_chunk_threshold() -> usize {
    1024 * 1024 // 1MB
}

fn default_chunk_size() -> usize {
    512 * 1024
}

fn default_chunk_overlap() -> usize {
    1024
}

fn default_min_prefix_len() -> usize {
    3
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            batch_size: default_batch_size(),
            auto_refresh: true,
            persistent: true,
            max_file_size: default_max_file_size(),
            regex: RegexTuning::default(),
        }
    }
}

impl Default for RegexTuning {
    fn default() -> Self {
        Self {
            max_matches_per_file: default_max_matches_per_file(),
            parallel_width: default_parallel_width(),
            chunk_threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_prefix_len: default_min_prefix_len(),
        }
    }
}

impl IndexConfig {
    /// Defaults overlaid with `VAULT_SEARCH_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = parse_override::<u64>(&lookup, ENV_REFRESH_INTERVAL) {
            self.refresh_interval_secs = secs;
        }
        if let Some(size) = parse_override::<usize>(&lookup, ENV_BATCH_SIZE) {
            if size == 0 {
                log::warn!("[config] {} must be positive, keeping {}", ENV_BATCH_SIZE, self.batch_size);
            } else {
                self.batch_size = size;
            }
        }
        if let Some(flag) = parse_flag(&lookup, ENV_AUTO_REFRESH) {
            self.auto_refresh = flag;
        }
        if let Some(flag) = parse_flag(&lookup, ENV_PERSISTENT) {
            self.persistent = flag;
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn parse_override<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("[config] Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("[config] Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(config.auto_refresh);
        assert!(config.persistent);
        assert_eq!(config.regex.max_matches_per_file, 5);
        assert_eq!(config.regex.parallel_width, 10);
        assert_eq!(config.regex.min_prefix_len, 3);
    }

    #[test]
    fn test_overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            (ENV_REFRESH_INTERVAL, "60"),
            (ENV_BATCH_SIZE, "not-a-number"),
            (ENV_AUTO_REFRESH, "off"),
            (ENV_PERSISTENT, "maybe"),
        ]
        .into_iter()
        .collect();

        let config = IndexConfig::default().with_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.batch_size, 50);
        assert!(!config.auto_refresh);
        assert!(config.persistent);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: IndexConfig = serde_json::from_str(r#"{"batch_size": 10, "regex": {"chunk_size": 64}}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.regex.chunk_size, 64);
        assert_eq!(config.regex.chunk_overlap, 1024);
        assert_eq!(config.refresh_interval_secs, 300);
    }
}
