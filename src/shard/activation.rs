use std::future::Future;

use crate::core::ShardId;

tokio::task_local! {
    static ACTIVE_SHARDS: ActivationContext;
}

/// The shards activated for the running task, one per key-space category.
///
/// Immutable: activating a shard builds a new context (sharing structure with
/// the old one) and scopes it over a future or closure, so the previous
/// context comes back on every exit path, including errors, panics and
/// cancellation. Tasks spawned from inside a scope start with an empty context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationContext {
    active: im::HashMap<String, ShardId>,
}

impl ActivationContext {
    /// Snapshot of the context of the running task (empty outside any scope).
    pub fn current() -> Self {
        ACTIVE_SHARDS.try_with(|ctx| ctx.clone()).unwrap_or_default()
    }

    pub fn shard_for(&self, category: &str) -> Option<ShardId> {
        self.active.get(category).copied()
    }

    pub fn with(&self, category: &str, shard: ShardId) -> Self {
        Self {
            active: self.active.update(category.to_string(), shard),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        ACTIVE_SHARDS.scope(self, fut).await
    }

    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        ACTIVE_SHARDS.sync_scope(self, f)
    }
}
