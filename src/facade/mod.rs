pub mod engine;

pub use engine::ShardedEngine;
