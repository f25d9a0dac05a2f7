use serde::{Deserialize, Serialize};
use std::fmt;

use super::Value;

pub type Row = Vec<Value>;

/// Row identifier that is only meaningful inside its home shard.
pub type LocalId = i64;

/// Category every model belongs to unless it declares its own key space.
pub const PRIMARY_CATEGORY: &str = "primary";

/// Stable numeric identifier of a shard.
///
/// Always positive: the range below one shard's id capacity is reserved for
/// local ids, so a shard numbered 0 could not be told apart from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub i64);

impl ShardId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ShardId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier that embeds its shard and is valid regardless of the active shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(pub i64);

impl GlobalId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<GlobalId> for Value {
    fn from(id: GlobalId) -> Self {
        Value::Integer(id.0)
    }
}
