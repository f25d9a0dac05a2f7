pub mod caching;
pub mod config;

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::{Result, Value};
use crate::result::QueryResult;
use crate::shard::Shard;

pub use caching::CachingConnection;
pub use config::EngineConfig;

/// Database connection handle
///
/// The driver side of the engine: runs parameterized SQL (`$1`, `$2`, ...)
/// on one shard and returns its rows. Implemented once against whichever
/// pool or client the application uses.
#[async_trait]
pub trait ShardConnection: Send + Sync {
    async fn execute(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<QueryResult>;

    /// Like [`execute`](Self::execute), also reporting whether the rows were
    /// served from a cache. Uncached connections always say no.
    async fn execute_cached(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<(QueryResult, bool)> {
        Ok((self.execute(shard, sql, binds).await?, false))
    }

    /// Whether statements currently run inside an open transaction.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Schemas the shard's connection resolves bare names against.
    async fn current_schema_search_path(&self, shard: &Shard) -> Result<Vec<String>> {
        let result = self
            .execute(shard, "SELECT * FROM unnest(current_schemas(false))", &[])
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl<C: ShardConnection + ?Sized> ShardConnection for Arc<C> {
    async fn execute(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<QueryResult> {
        (**self).execute(shard, sql, binds).await
    }

    async fn execute_cached(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<(QueryResult, bool)> {
        (**self).execute_cached(shard, sql, binds).await
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    async fn current_schema_search_path(&self, shard: &Shard) -> Result<Vec<String>> {
        (**self).current_schema_search_path(shard).await
    }
}
