use std::sync::Arc;

use crate::core::{GlobalId, ShardId};
use crate::shard::Shard;

/// How a [`ShardSet`] came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSource {
    /// Named by the caller. Never narrowed afterwards.
    Explicit,
    /// Derived from key predicates.
    Inferred,
    /// Nothing pinned the query; it runs on the current shard.
    Implicit,
}

/// Ordered, duplicate-free list of shards a query runs against.
#[derive(Debug, Clone)]
pub struct ShardSet {
    shards: Vec<Arc<Shard>>,
    source: ShardSource,
}

impl ShardSet {
    pub fn new(source: ShardSource) -> Self {
        Self {
            shards: Vec::new(),
            source,
        }
    }

    pub fn from_shards(shards: impl IntoIterator<Item = Arc<Shard>>, source: ShardSource) -> Self {
        let mut set = Self::new(source);
        for shard in shards {
            set.push(shard);
        }
        set
    }

    /// Appends `shard` unless it is already present.
    pub fn push(&mut self, shard: Arc<Shard>) -> bool {
        if self.contains(shard.id()) {
            return false;
        }
        self.shards.push(shard);
        true
    }

    pub fn contains(&self, id: ShardId) -> bool {
        self.shards.iter().any(|s| s.id() == id)
    }

    /// Moves `id` to the front, keeping the relative order of the rest.
    pub fn promote(&mut self, id: ShardId) {
        if let Some(pos) = self.shards.iter().position(|s| s.id() == id) {
            let shard = self.shards.remove(pos);
            self.shards.insert(0, shard);
        }
    }

    /// Restricts an inferred or implicit set to `keep`. Explicit sets are
    /// returned unchanged.
    pub fn narrow(mut self, keep: &[ShardId]) -> Self {
        if self.is_explicit() {
            return self;
        }
        self.shards.retain(|s| keep.contains(&s.id()));
        self
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn ids(&self) -> Vec<ShardId> {
        self.shards.iter().map(|s| s.id()).collect()
    }

    pub fn first(&self) -> Option<&Arc<Shard>> {
        self.shards.first()
    }

    pub fn source(&self) -> ShardSource {
        self.source
    }

    pub fn is_explicit(&self) -> bool {
        self.source == ShardSource::Explicit
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Shard>> {
        self.shards.iter()
    }
}

/// Where the caller wants a query to run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShardHint {
    /// Let the predicates decide, falling back to the current shard.
    #[default]
    Current,
    Shards(Vec<ShardId>),
    /// The home shards of these records.
    Records(Vec<GlobalId>),
    /// Every registered shard, default shard first.
    All,
}

impl ShardHint {
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Self::Current)
    }
}
