//! Global row identity: the codec between local and global ids, and the
//! tagged values that flow through key predicates and bind parameters.

pub mod codec;

pub use codec::{DEFAULT_IDS_PER_SHARD, DecodedId, GlobalIdCodec};

use crate::core::{GlobalId, LocalId, Value};

/// A value found in a key column, classified by how it identifies a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentifierValue {
    Local(LocalId),
    Global(GlobalId),
    /// Non-integral key (e.g. a natural string key); never translated.
    Opaque(Value),
    /// Garbage in an integer key column. Never matches a row.
    Malformed(Value),
}

impl IdentifierValue {
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Local(_) | Self::Global(_))
    }

    /// The bind value to send to the database. Malformed input becomes NULL,
    /// which no equality or IN comparison can match.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Local(local) => Value::Integer(*local),
            Self::Global(global) => Value::Integer(global.0),
            Self::Opaque(value) => value.clone(),
            Self::Malformed(_) => Value::Null,
        }
    }
}
