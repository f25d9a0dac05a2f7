use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::identity::DEFAULT_IDS_PER_SHARD;
use crate::naming::QualificationMode;

/// Engine configuration
///
/// Deserializable from JSON; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether SQL names the shard's schema
    pub qualification_mode: QualificationMode,

    /// Local-id capacity of each shard
    pub ids_per_shard: i64,

    /// Cache read results per shard
    pub query_cache_enabled: bool,

    /// LRU entries kept per shard
    pub query_cache_capacity: usize,

    /// Expiry of cached results
    pub query_cache_ttl_ms: Option<u64>,

    /// Per-shard query timeout
    pub query_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qualification_mode: QualificationMode::Unqualified,
            ids_per_shard: DEFAULT_IDS_PER_SHARD,
            query_cache_enabled: true,
            query_cache_capacity: 1024,
            query_cache_ttl_ms: None,
            query_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the qualification mode
    pub fn qualification_mode(mut self, mode: QualificationMode) -> Self {
        self.qualification_mode = mode;
        self
    }

    /// Set ids per shard
    pub fn ids_per_shard(mut self, ids: i64) -> Self {
        self.ids_per_shard = ids;
        self
    }

    /// Enable or disable the result cache
    pub fn query_cache(mut self, enabled: bool) -> Self {
        self.query_cache_enabled = enabled;
        self
    }

    pub fn query_cache_capacity(mut self, capacity: usize) -> Self {
        self.query_cache_capacity = capacity;
        self
    }

    pub fn query_cache_ttl(mut self, ttl: Duration) -> Self {
        self.query_cache_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Set query timeout
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.query_cache_ttl_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ids_per_shard < 2 {
            return Err("ids_per_shard must be >= 2".to_string());
        }

        if self.query_cache_enabled && self.query_cache_capacity == 0 {
            return Err("query_cache_capacity must be > 0".to_string());
        }

        if self.query_timeout_ms == Some(0) {
            return Err("query_timeout_ms must be > 0".to_string());
        }

        Ok(())
    }
}
