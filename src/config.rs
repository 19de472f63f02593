//! Node configuration file.
//!
//! ```yaml
//! store:
//!   kind: redis
//!   url: redis://cache:6379
//! invalidation:
//!   channel: tiercache:invalidate
//! janitor_interval_secs: 30
//! regions:
//!   - name: game
//!     defaults:
//!       max_size: 5000
//!       expire_after_write: 60
//!     caches:
//!       - name: players
//!         ttl: 300
//!         sync: asynchronous
//!         resolver: first_write_wins
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{
    duration_secs_opt, LocalCacheConfig, SyncStrategy, DEFAULT_INVALIDATION_CHANNEL,
};
use crate::error::{Error, Result};

/// Networked store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store; peers in other processes are not reachable
    #[default]
    Memory,
    /// Redis server (requires the `redis` feature)
    Redis,
}

/// Networked store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Connection URL; the `--store-url` flag overrides it
    pub url: String,
    pub pool_size: usize,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout_ms: 5000,
        }
    }
}

/// Invalidation bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub enabled: bool,
    pub channel: String,
    pub ignore_own_messages: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: DEFAULT_INVALIDATION_CHANNEL.to_string(),
            ignore_own_messages: true,
        }
    }
}

/// Conflict resolver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    LastWriteWins,
    FirstWriteWins,
}

/// One distributed cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache name; also its store namespace
    pub name: String,
    /// L2 entry lifetime in seconds
    #[serde(default, with = "duration_secs_opt")]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub sync: SyncStrategy,
    /// Keep an L1 tier for this cache
    #[serde(default = "default_true")]
    pub local: bool,
    /// L1 settings replacing the region defaults
    #[serde(default)]
    pub local_overrides: Option<LocalCacheConfig>,
    #[serde(default)]
    pub resolver: Option<ResolverKind>,
    /// LZ4-compress payloads of at least this many bytes
    #[serde(default)]
    pub compress_above: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// Group of caches sharing L1 defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    #[serde(default)]
    pub defaults: LocalCacheConfig,
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub store: StoreConfig,
    pub invalidation: BusConfig,
    /// Interval between expired-entry sweeps
    pub janitor_interval_secs: u64,
    pub regions: Vec<RegionConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            invalidation: BusConfig::default(),
            janitor_interval_secs: 30,
            regions: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Read and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: NodeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between expired-entry sweeps
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.janitor_interval_secs == 0 {
            return Err(Error::Config("janitor_interval_secs must be at least 1".into()));
        }
        if self.invalidation.enabled && self.invalidation.channel.is_empty() {
            return Err(Error::Config("invalidation channel must not be empty".into()));
        }
        if self.store.kind == StoreKind::Redis && self.store.url.is_empty() {
            return Err(Error::Config("redis store requires a url".into()));
        }

        let mut regions = HashSet::new();
        let mut caches = HashSet::new();
        for region in &self.regions {
            if !regions.insert(region.name.as_str()) {
                return Err(Error::Config(format!("duplicate region '{}'", region.name)));
            }
            region
                .defaults
                .validate()
                .map_err(|e| Error::Config(format!("region '{}': {}", region.name, e)))?;

            for cache in &region.caches {
                // Cache names are store namespaces, so they must be unique node-wide
                if !caches.insert(cache.name.as_str()) {
                    return Err(Error::Config(format!("duplicate cache '{}'", cache.name)));
                }
                if let Some(local) = &cache.local_overrides {
                    local
                        .validate()
                        .map_err(|e| Error::Config(format!("cache '{}': {}", cache.name, e)))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicyKind;
    use assert_matches::assert_matches;

    const SAMPLE: &str = r#"
store:
  kind: redis
  url: redis://cache:6379
invalidation:
  channel: game:invalidate
janitor_interval_secs: 15
regions:
  - name: game
    defaults:
      max_size: 5000
      expire_after_write: 1.5
      eviction: lfu
    caches:
      - name: players
        ttl: 300
        sync: asynchronous
        resolver: first_write_wins
      - name: guilds
        local: false
        compress_above: 1024
"#;

    #[test]
    fn test_parse_sample() {
        let config = NodeConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.store.kind, StoreKind::Redis);
        assert_eq!(config.store.pool_size, 10);
        assert_eq!(config.invalidation.channel, "game:invalidate");
        assert!(config.invalidation.ignore_own_messages);
        assert_eq!(config.janitor_interval(), Duration::from_secs(15));

        let region = &config.regions[0];
        assert_eq!(region.defaults.max_size, 5000);
        assert_eq!(
            region.defaults.expire_after_write,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(region.defaults.eviction, EvictionPolicyKind::Lfu);
        assert!(region.defaults.record_stats);

        let players = &region.caches[0];
        assert_eq!(players.ttl, Some(Duration::from_secs(300)));
        assert_eq!(players.sync, SyncStrategy::Asynchronous);
        assert_eq!(players.resolver, Some(ResolverKind::FirstWriteWins));
        assert!(players.local);

        let guilds = &region.caches[1];
        assert_eq!(guilds.ttl, None);
        assert!(!guilds.local);
        assert_eq!(guilds.compress_above, Some(1024));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = NodeConfig::from_yaml("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.store.kind, StoreKind::Memory);
    }

    #[test]
    fn test_duplicate_cache_rejected() {
        let yaml = r#"
regions:
  - name: a
    caches: [{ name: players }]
  - name: b
    caches: [{ name: players }]
"#;
        assert_matches!(NodeConfig::from_yaml(yaml), Err(Error::Config(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_matches!(
            NodeConfig::from_yaml("janitor_interval_secs: 0"),
            Err(Error::Config(_))
        );
        assert_matches!(
            NodeConfig::from_yaml("regions: [{ name: a, defaults: { max_size: 0 } }]"),
            Err(Error::Config(_))
        );
        assert_matches!(
            NodeConfig::from_yaml("regions: [{ name: a, defaults: { expire_after_write: -1 } }]"),
            Err(Error::Yaml(_))
        );
        assert_matches!(NodeConfig::from_yaml("store: [1, 2]"), Err(Error::Yaml(_)));
    }

    #[test]
    fn test_load_missing_file() {
        assert_matches!(
            NodeConfig::load("/nonexistent/tiercache.yaml"),
            Err(Error::Io(_))
        );
    }
}
