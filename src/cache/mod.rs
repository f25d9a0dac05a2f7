//! Shard-scoped result caching and the statement classification that drives
//! its invalidation.

pub mod query_cache;
pub mod statement_kind;

pub use query_cache::{CacheEntry, CacheFetch, CacheKey, CacheStats, QueryCache};
pub use statement_kind::StatementKind;
