// ============================================================================
// Shardwise Library
// ============================================================================

//! Multi-tenant sharding layer: globally unambiguous row ids, shard routing
//! from key predicates, and shard-scoped statement and result caching.
//!
//! # Routing a lookup by global id
//!
//! A global id carries its shard, so the query lands on that shard with the
//! id rewritten to the shard's local form.
//!
//! ```
//! use shardwise::{GlobalIdCodec, KeyColumn, QueryPredicate, RoutingRequest, ShardId};
//! use shardwise::{Shard, ShardLocator, ShardRegistry};
//! use shardwise::routing::ShardRouter;
//!
//! # fn main() -> shardwise::Result<()> {
//! let registry = ShardRegistry::new();
//! registry.register(Shard::new(1, ShardLocator::from_url("postgres://db1/app").unwrap()).as_default())?;
//! registry.register(Shard::new(2, ShardLocator::from_url("postgres://db2/app").unwrap()))?;
//!
//! let codec = GlobalIdCodec::default();
//! let router = ShardRouter::new(registry.into_handle(), codec);
//!
//! let user = codec.encode(ShardId(2), 42)?;
//! let plan = router.infer(
//!     &RoutingRequest::new().predicate(QueryPredicate::eq(KeyColumn::primary("id"), user)),
//! )?;
//! assert_eq!(plan.shard_set().ids(), vec![ShardId(2)]);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod connection;
pub mod core;
pub mod facade;
pub mod identity;
pub mod naming;
pub mod prelude;
pub mod result;
pub mod routing;
pub mod shard;
pub mod statement;

// Re-export main types for convenience
pub use crate::core::{DbError, GlobalId, LocalId, PRIMARY_CATEGORY, Result, Row, ShardId, Value};
pub use facade::ShardedEngine;
pub use result::QueryResult;

pub use cache::{CacheStats, QueryCache, StatementKind};
pub use connection::{CachingConnection, EngineConfig, ShardConnection};
pub use identity::{GlobalIdCodec, IdentifierValue};
pub use naming::{QualificationMode, QualifiedName, SchemaFilter, ShardIntrospector};
pub use routing::{KeyColumn, QueryPredicate, RoutingPlan, RoutingRequest, ShardHint, ShardSet, ShardSource};
pub use shard::{ActivationContext, RegistryHandle, Shard, ShardLocator, ShardManifest, ShardRegistry};
pub use statement::{BindMap, QueryShape, StatementCache};
