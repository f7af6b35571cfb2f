//! Storage backends for wallet persistence
//!
//! This module provides two backends behind [`KeyValueStore`]:
//! 1. JSON file (persistent, atomic batch writes)
//! 2. In-memory (tests and ephemeral contexts)

mod json_file;
mod memory;
mod traits;

pub use json_file::{default_data_dir, JsonFileStore};
pub use memory::MemoryStore;
pub use traits::{KeyValueStore, WriteOp};
