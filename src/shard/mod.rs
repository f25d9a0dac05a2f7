//! Shard registry, task-scoped shard activation and topology loading.

pub mod activation;
pub mod locator;
pub mod manifest;
pub mod registry;

pub use activation::ActivationContext;
pub use locator::ShardLocator;
pub use manifest::{CategoryEntry, ShardEntry, ShardManifest};
pub use registry::{RegistryHandle, Shard, ShardRegistry};
