use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use crate::cache::{QueryCache, StatementKind};
use crate::core::{Result, ShardId, Value};
use crate::result::QueryResult;
use crate::shard::Shard;
use super::ShardConnection;

/// Serves repeated reads from a shard-scoped [`QueryCache`] and drops a
/// shard's cached results whenever a write runs on it.
pub struct CachingConnection<C> {
    inner: C,
    cache: Arc<QueryCache>,
}

impl<C: ShardConnection> CachingConnection<C> {
    pub fn new(inner: C, cache: Arc<QueryCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    async fn run(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<(QueryResult, bool)> {
        let kind = StatementKind::classify(sql);

        if kind.is_write() {
            // Fires on success, failure and on cancellation mid-write (timeout):
            // the write may have committed either way.
            let _invalidate = InvalidateOnDrop {
                cache: &self.cache,
                shard: shard.id(),
            };
            return Ok((self.inner.execute(shard, sql, binds).await?, false));
        }

        if !kind.is_cacheable() || !self.cache.is_enabled() || self.inner.in_transaction() {
            debug!("bypassing query cache on shard {} ({:?})", shard.id(), kind);
            return Ok((self.inner.execute(shard, sql, binds).await?, false));
        }

        let fetched = self
            .cache
            .fetch(shard.id(), sql, binds, || self.inner.execute(shard, sql, binds))
            .await?;
        Ok((fetched.result, fetched.cached))
    }
}

/// Drops a shard's cached results when it goes out of scope.
struct InvalidateOnDrop<'a> {
    cache: &'a QueryCache,
    shard: ShardId,
}

impl Drop for InvalidateOnDrop<'_> {
    fn drop(&mut self) {
        self.cache.invalidate(self.shard);
    }
}

#[async_trait]
impl<C: ShardConnection> ShardConnection for CachingConnection<C> {
    async fn execute(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<QueryResult> {
        Ok(self.run(shard, sql, binds).await?.0)
    }

    async fn execute_cached(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<(QueryResult, bool)> {
        self.run(shard, sql, binds).await
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    async fn current_schema_search_path(&self, shard: &Shard) -> Result<Vec<String>> {
        self.inner.current_schema_search_path(shard).await
    }
}
