use thiserror::Error;

use super::types::ShardId;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Shard {0} is already registered")]
    DuplicateShardId(ShardId),

    #[error("Shard {0} is not registered")]
    UnknownShard(ShardId),

    #[error("Shard {attempted} cannot be the default shard: shard {existing} already is")]
    MultipleDefaultShards { existing: ShardId, attempted: ShardId },

    #[error("No default shard has been registered")]
    NoDefaultShard,

    #[error("Invalid shard id {0}: shard ids must be positive")]
    InvalidShardId(i64),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot resolve a shard for category '{0}'")]
    AmbiguousShardForCategory(String),

    #[error("Local id {local} exceeds the capacity of shard {shard} ({capacity} ids per shard)")]
    LocalIdOutOfRange {
        shard: ShardId,
        local: i64,
        capacity: i64,
    },

    #[error("Query cache consistency error: {0}")]
    CacheConsistency(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Query on shard {shard} timed out after {millis}ms")]
    Timeout { shard: ShardId, millis: u64 },
}

impl DbError {
    /// Errors that indicate a broken deployment or a bug rather than a bad query.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateShardId(_)
                | Self::MultipleDefaultShards { .. }
                | Self::NoDefaultShard
                | Self::InvalidShardId(_)
                | Self::Configuration(_)
                | Self::LocalIdOutOfRange { .. }
                | Self::CacheConsistency(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<sqlparser::parser::ParserError> for DbError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::ParseError(err.to_string())
    }
}
