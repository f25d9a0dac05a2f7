use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result, ShardId};
use super::locator::ShardLocator;
use super::registry::{Shard, ShardRegistry};

/// One shard entry of a topology manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardEntry {
    pub id: ShardId,
    pub url: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryEntry {
    pub name: String,
    #[serde(default)]
    pub default_shard: Option<ShardId>,
}

/// Shard topology as provisioned, loaded once at startup.
///
/// ```json
/// {
///   "shards": [
///     { "id": 1, "url": "postgres://db1/app?schema=tenant_1", "default": true },
///     { "id": 2, "url": "postgres://db1/app?schema=tenant_2" }
///   ],
///   "categories": [ { "name": "unsharded", "default_shard": 1 } ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardManifest {
    #[serde(default)]
    pub shards: Vec<ShardEntry>,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
}

impl ShardManifest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DbError::Configuration(format!("invalid shard manifest: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DbError::Configuration(format!("cannot serialize shard manifest: {}", e)))
    }

    /// Checks the manifest is loadable as a whole: exactly one default shard
    /// and parseable locators.
    pub fn validate(&self) -> Result<()> {
        let defaults: Vec<ShardId> = self.shards.iter().filter(|s| s.default).map(|s| s.id).collect();
        match defaults.as_slice() {
            [] => return Err(DbError::NoDefaultShard),
            [_] => {}
            [existing, attempted, ..] => {
                return Err(DbError::MultipleDefaultShards {
                    existing: *existing,
                    attempted: *attempted,
                });
            }
        }
        for entry in &self.shards {
            ShardLocator::from_url(&entry.url).map_err(|e| {
                DbError::Configuration(format!("shard {}: {}", entry.id, e))
            })?;
        }
        Ok(())
    }
}

impl ShardRegistry {
    /// Builds a registry from a provisioned topology.
    pub fn from_manifest(manifest: &ShardManifest) -> Result<Self> {
        manifest.validate()?;

        let registry = Self::new();
        for entry in &manifest.shards {
            let locator = ShardLocator::from_url(&entry.url)
                .map_err(|e| DbError::Configuration(format!("shard {}: {}", entry.id, e)))?;
            let mut shard = Shard::new(entry.id, locator);
            if entry.default {
                shard = shard.as_default();
            }
            registry.register(shard)?;
        }
        for category in &manifest.categories {
            registry.register_category(&category.name, category.default_shard)?;
        }
        Ok(registry)
    }
}
