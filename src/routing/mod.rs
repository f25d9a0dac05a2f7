//! Shard inference: from key predicates and a caller hint to an ordered shard
//! set with the predicates rewritten for every target.

pub mod inference;
pub mod predicate;
pub mod shard_set;

pub use inference::{RoutedShard, RoutingPlan, RoutingRequest, ShardRouter};
pub use predicate::{BoundPredicate, KeyColumn, KeyKind, PredicateOperator, QueryPredicate};
pub use shard_set::{ShardHint, ShardSet, ShardSource};
