use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::{DbError, PRIMARY_CATEGORY, Result, ShardId};
use super::activation::ActivationContext;
use super::locator::ShardLocator;

/// An independently addressable partition of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    id: ShardId,
    locator: ShardLocator,
    #[serde(default)]
    is_default: bool,
}

impl Shard {
    pub fn new(id: impl Into<ShardId>, locator: ShardLocator) -> Self {
        Self {
            id: id.into(),
            locator,
            is_default: false,
        }
    }

    /// Marks this shard as the one unscoped queries run against.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn locator(&self) -> &ShardLocator {
        &self.locator
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn schema(&self) -> Option<&str> {
        self.locator.schema.as_deref()
    }

    /// The schema in schema-per-shard deployments, otherwise the database name.
    pub fn name(&self) -> &str {
        self.schema().unwrap_or(&self.locator.database)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    shards: BTreeMap<ShardId, Arc<Shard>>,
    default: Option<ShardId>,
    /// Declared key-space categories and the shard each falls back to.
    categories: HashMap<String, Option<ShardId>>,
}

impl RegistryState {
    fn resolve(&self, ctx: &ActivationContext, category: &str) -> Option<ShardId> {
        if let Some(active) = ctx.shard_for(category) {
            return Some(active);
        }
        if category == PRIMARY_CATEGORY {
            return self.default;
        }
        self.categories.get(category).copied().flatten()
    }
}

/// Process-wide set of known shards.
///
/// Populated at startup and read-mostly afterwards. Components receive a
/// [`RegistryHandle`] at construction rather than reaching for a global.
#[derive(Debug, Default)]
pub struct ShardRegistry {
    state: RwLock<RegistryState>,
}

pub type RegistryHandle = Arc<ShardRegistry>;

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_handle(self) -> RegistryHandle {
        Arc::new(self)
    }

    pub fn register(&self, shard: Shard) -> Result<Arc<Shard>> {
        if shard.id.0 <= 0 {
            return Err(DbError::InvalidShardId(shard.id.0));
        }

        let mut state = self.state.write()?;
        if state.shards.contains_key(&shard.id) {
            return Err(DbError::DuplicateShardId(shard.id));
        }
        if shard.is_default {
            if let Some(existing) = state.default {
                return Err(DbError::MultipleDefaultShards {
                    existing,
                    attempted: shard.id,
                });
            }
            state.default = Some(shard.id);
        }

        info!(
            "registered shard {} ({}){}",
            shard.id,
            shard.locator.to_url(),
            if shard.is_default { " as default" } else { "" }
        );
        let shard = Arc::new(shard);
        state.shards.insert(shard.id, Arc::clone(&shard));
        Ok(shard)
    }

    /// Declares a key-space category, optionally pinned to a fallback shard
    /// used when no shard of that category is active.
    pub fn register_category(&self, category: &str, default_shard: Option<ShardId>) -> Result<()> {
        if category.trim().is_empty() {
            return Err(DbError::Configuration("category name must not be empty".to_string()));
        }
        let mut state = self.state.write()?;
        if let Some(id) = default_shard {
            if !state.shards.contains_key(&id) {
                return Err(DbError::UnknownShard(id));
            }
        }
        debug!("registered category '{}' (fallback shard {:?})", category, default_shard);
        state.categories.insert(category.to_string(), default_shard);
        Ok(())
    }

    pub fn lookup(&self, id: ShardId) -> Result<Arc<Shard>> {
        self.state
            .read()?
            .shards
            .get(&id)
            .cloned()
            .ok_or(DbError::UnknownShard(id))
    }

    pub fn contains(&self, id: ShardId) -> bool {
        self.state
            .read()
            .map(|state| state.shards.contains_key(&id))
            .unwrap_or(false)
    }

    /// All shards ordered by id.
    pub fn all(&self) -> Result<Vec<Arc<Shard>>> {
        Ok(self.state.read()?.shards.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|state| state.shards.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_shard(&self) -> Result<Arc<Shard>> {
        let state = self.state.read()?;
        let id = state.default.ok_or(DbError::NoDefaultShard)?;
        state.shards.get(&id).cloned().ok_or(DbError::UnknownShard(id))
    }

    /// The shard queries of `category` run against in the current task.
    pub fn current(&self, category: &str) -> Result<Arc<Shard>> {
        self.current_in(&ActivationContext::current(), category)
    }

    pub fn try_current(&self, category: &str) -> Option<Arc<Shard>> {
        self.current(category).ok()
    }

    /// Resolves `category` against an explicit activation context.
    pub fn current_in(&self, ctx: &ActivationContext, category: &str) -> Result<Arc<Shard>> {
        let state = self.state.read()?;
        let id = match state.resolve(ctx, category) {
            Some(id) => id,
            None if category == PRIMARY_CATEGORY => return Err(DbError::NoDefaultShard),
            None => return Err(DbError::AmbiguousShardForCategory(category.to_string())),
        };
        state.shards.get(&id).cloned().ok_or(DbError::UnknownShard(id))
    }

    /// Runs `fut` with `shard` active for `category`; the previous shard is
    /// active again once it finishes, whatever the outcome.
    pub async fn activate<F, T>(&self, shard: ShardId, category: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.lookup(shard)?;
        ActivationContext::current()
            .with(category, shard)
            .scope(fut)
            .await
    }

    /// Blocking counterpart of [`activate`](Self::activate).
    pub fn activate_sync<F, T>(&self, shard: ShardId, category: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.lookup(shard)?;
        ActivationContext::current().with(category, shard).sync_scope(f)
    }
}
