//! Storage trait definitions

use crate::error::Result;
use async_trait::async_trait;

/// A single staged mutation for [`KeyValueStore::write_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: Vec<u8> },
    Remove { key: String },
}

impl WriteOp {
    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        WriteOp::Set {
            key: key.into(),
            value,
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        WriteOp::Remove { key: key.into() }
    }
}

/// Persistent key-value store shared by the vault, accounts and sessions
///
/// Values are opaque bytes; encryption is the vault's job, not the store's.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value with the given key
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a value by key. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List all keys with a given prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Apply every operation or none of them
    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Clear all stored data
    async fn clear(&self) -> Result<()>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
