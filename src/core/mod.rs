pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{GlobalId, LocalId, PRIMARY_CATEGORY, Row, ShardId};
pub use value::Value;
