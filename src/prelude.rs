//! The types most applications need, for glob import.

pub use crate::connection::{EngineConfig, ShardConnection};
pub use crate::core::{DbError, GlobalId, Result, ShardId, Value};
pub use crate::facade::ShardedEngine;
pub use crate::routing::{KeyColumn, QueryPredicate, RoutingRequest, ShardHint};
pub use crate::shard::{Shard, ShardLocator, ShardRegistry};
pub use crate::statement::{BindMap, QueryShape};
