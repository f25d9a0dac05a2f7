//! Reusable statement templates: parsed once, replayed on any shard.

pub mod bind_map;
pub mod cache;
pub mod template;

pub use bind_map::{BindMap, BindSlot};
pub use cache::StatementCache;
pub use template::{QueryShape, StatementTemplate, TemplateKey};
