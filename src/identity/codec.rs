use crate::core::{DbError, GlobalId, LocalId, Result, ShardId, Value};
use super::IdentifierValue;

/// Number of local ids each shard owns. Decimal so that global ids stay
/// readable in logs: shard 3, row 42 is `30000000000042`.
pub const DEFAULT_IDS_PER_SHARD: i64 = 10_000_000_000_000;

/// Outcome of decoding an integer found in a key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedId {
    /// Below the smallest possible global id; relative to whichever shard reads it.
    Local(LocalId),
    Global { shard: ShardId, local: LocalId },
}

/// Bijection between `(shard, local id)` pairs and global ids.
///
/// `global = shard * ids_per_shard + local`, which keeps ids monotonic within
/// a shard and leaves every value below `ids_per_shard` free to mean "local".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalIdCodec {
    ids_per_shard: i64,
}

impl GlobalIdCodec {
    pub fn new(ids_per_shard: i64) -> Result<Self> {
        if ids_per_shard < 2 {
            return Err(DbError::Configuration(format!(
                "ids_per_shard must be >= 2, got {}",
                ids_per_shard
            )));
        }
        Ok(Self { ids_per_shard })
    }

    pub fn capacity(&self) -> i64 {
        self.ids_per_shard
    }

    /// Largest shard id whose global ids still fit in an `i64`.
    pub fn max_shard_id(&self) -> i64 {
        (i64::MAX - (self.ids_per_shard - 1)) / self.ids_per_shard
    }

    pub fn encode(&self, shard: ShardId, local: LocalId) -> Result<GlobalId> {
        if shard.0 <= 0 || shard.0 > self.max_shard_id() {
            return Err(DbError::InvalidShardId(shard.0));
        }
        if !(0..self.ids_per_shard).contains(&local) {
            return Err(DbError::LocalIdOutOfRange {
                shard,
                local,
                capacity: self.ids_per_shard,
            });
        }
        // Both factors were range-checked above.
        Ok(GlobalId(shard.0 * self.ids_per_shard + local))
    }

    pub fn decode(&self, id: i64) -> DecodedId {
        if id < self.ids_per_shard {
            return DecodedId::Local(id);
        }
        DecodedId::Global {
            shard: ShardId(id / self.ids_per_shard),
            local: id % self.ids_per_shard,
        }
    }

    /// Classifies a raw key value. `integral` says whether the column holds
    /// integer ids; values of other columns pass through as opaque.
    pub fn classify(&self, value: &Value, integral: bool) -> IdentifierValue {
        if !integral || value.is_null() {
            return IdentifierValue::Opaque(value.clone());
        }
        match value.integral_id() {
            Some(id) => match self.decode(id) {
                DecodedId::Local(local) => IdentifierValue::Local(local),
                DecodedId::Global { .. } => IdentifierValue::Global(GlobalId(id)),
            },
            None => IdentifierValue::Malformed(value.clone()),
        }
    }

    /// Expresses `value`, read relative to `from`, the way `to` must see it:
    /// the local form when the row lives on `to`, the global form otherwise.
    ///
    /// Opaque and malformed values are returned unchanged, as are local ids
    /// that cannot be encoded (negative or over capacity).
    pub fn relative(&self, value: &IdentifierValue, from: ShardId, to: ShardId) -> IdentifierValue {
        let (owner, local) = match value {
            IdentifierValue::Local(local) => (from, *local),
            IdentifierValue::Global(global) => match self.decode(global.0) {
                DecodedId::Global { shard, local } => (shard, local),
                DecodedId::Local(local) => (from, local),
            },
            IdentifierValue::Opaque(_) | IdentifierValue::Malformed(_) => return value.clone(),
        };

        if owner == to {
            return IdentifierValue::Local(local);
        }
        match self.encode(owner, local) {
            Ok(global) => IdentifierValue::Global(global),
            Err(_) => value.clone(),
        }
    }
}

impl Default for GlobalIdCodec {
    fn default() -> Self {
        Self {
            ids_per_shard: DEFAULT_IDS_PER_SHARD,
        }
    }
}
