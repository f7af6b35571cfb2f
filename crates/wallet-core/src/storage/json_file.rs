//! JSON file storage backend
//!
//! Stores every entry in a single JSON document in the wallet's data
//! directory. Each mutation is staged against a copy of the in-memory map,
//! written to a temp file, and renamed over the old document before the cache
//! is swapped, so a crash mid-write leaves the previous document intact.

use async_trait::async_trait;
use base64::Engine;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::{KeyValueStore, WriteOp};
use crate::error::{Result, WalletError};

const STORE_FILE_NAME: &str = "store.json";
const STORE_FILE_VERSION: u32 = 1;

/// File format for persistent storage
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    /// Map of key -> base64 value
    entries: BTreeMap<String, String>,
}

/// Single-document JSON file storage backend
pub struct JsonFileStore {
    /// Directory for storage files
    storage_dir: PathBuf,
    /// In-memory copy of the document
    cache: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl JsonFileStore {
    /// Open (or create) the store in `storage_dir` and load any existing document
    pub async fn open(storage_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&storage_dir).await?;

        let store = Self {
            storage_dir,
            cache: RwLock::new(BTreeMap::new()),
        };
        store.load().await?;

        debug!("JSON file storage opened at: {:?}", store.storage_dir);
        Ok(store)
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn store_file_path(&self) -> PathBuf {
        self.storage_dir.join(STORE_FILE_NAME)
    }

    async fn load(&self) -> Result<()> {
        let path = self.store_file_path();

        if !tokio::fs::try_exists(&path).await? {
            debug!("No existing storage file found");
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&path).await?;
        let file: StoreFile = serde_json::from_str(&contents)?;

        if file.version != STORE_FILE_VERSION {
            return Err(WalletError::StorageError(format!(
                "Unsupported storage file version: {}",
                file.version
            )));
        }

        let mut entries = BTreeMap::new();
        for (key, encoded) in file.entries {
            let value = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| WalletError::StorageError(format!("Entry {}: {}", key, e)))?;
            entries.insert(key, value);
        }

        let mut cache = self.cache.write().await;
        *cache = entries;

        debug!("Loaded {} entries from storage", cache.len());
        Ok(())
    }

    /// Write `entries` to disk atomically using a temp file
    async fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let file = StoreFile {
            version: STORE_FILE_VERSION,
            entries: entries
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        base64::engine::general_purpose::STANDARD.encode(v),
                    )
                })
                .collect(),
        };

        let contents = serde_json::to_string_pretty(&file)?;
        let path = self.store_file_path();

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!("Saved {} entries to storage", entries.len());
        Ok(())
    }

    /// Stage `ops` on a copy of the cache, persist it, then swap it in
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut cache = self.cache.write().await;

        let mut staged = cache.clone();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    staged.insert(key, value);
                }
                WriteOp::Remove { key } => {
                    staged.remove(&key);
                }
            }
        }

        self.persist(&staged).await?;
        *cache = staged;
        Ok(())
    }
}

/// Default data directory for the wallet
pub fn default_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "symbia-labs", "extension-wallet")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| WalletError::StorageError("Could not determine data directory".to_string()))
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.apply(vec![WriteOp::set(key, value)]).await?;
        debug!("Stored key: {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if !self.cache.read().await.contains_key(key) {
            return Ok(());
        }

        self.apply(vec![WriteOp::remove(key)]).await?;
        debug!("Deleted key: {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.cache.read().await.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let cache = self.cache.read().await;

        Ok(cache
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let count = ops.len();
        self.apply(ops).await?;
        debug!("Applied batch of {} operations", count);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        let empty = BTreeMap::new();
        self.persist(&empty).await?;
        *cache = empty;

        debug!("Cleared all entries");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "JSON File Storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp_dir.path().to_path_buf()).await.unwrap();

        store.set("test-key", b"test-value".to_vec()).await.unwrap();

        assert_eq!(
            store.get("test-key").await.unwrap(),
            Some(b"test-value".to_vec())
        );
        assert_eq!(store.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = JsonFileStore::open(temp_dir.path().to_path_buf()).await.unwrap();
            store.set("persistent-key", vec![0, 159, 146, 150]).await.unwrap();
        }

        {
            let store = JsonFileStore::open(temp_dir.path().to_path_buf()).await.unwrap();
            assert_eq!(
                store.get("persistent-key").await.unwrap(),
                Some(vec![0, 159, 146, 150])
            );
        }
    }

    #[tokio::test]
    async fn test_batch_is_persisted_together() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = JsonFileStore::open(temp_dir.path().to_path_buf()).await.unwrap();
            store.set("a", b"1".to_vec()).await.unwrap();
            store
                .write_batch(vec![
                    WriteOp::set("b", b"2".to_vec()),
                    WriteOp::set("c", b"3".to_vec()),
                    WriteOp::remove("a"),
                ])
                .await
                .unwrap();
        }

        let store = JsonFileStore::open(temp_dir.path().to_path_buf()).await.unwrap();
        assert_eq!(
            store.list_keys("").await.unwrap(),
            vec!["b".to_string(), "c".to_string()]
        );
        assert!(!temp_dir.path().join("store.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp_dir.path().to_path_buf()).await.unwrap();

        store.set("key1", b"value1".to_vec()).await.unwrap();
        store.set("key2", b"value2".to_vec()).await.unwrap();

        store.remove("key1").await.unwrap();
        store.remove("key1").await.unwrap();
        assert!(!store.exists("key1").await.unwrap());

        store.clear().await.unwrap();
        assert!(store.list_keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("store.json"),
            r#"{"version": 99, "entries": {}}"#,
        )
        .unwrap();

        let result = JsonFileStore::open(temp_dir.path().to_path_buf()).await;
        assert!(matches!(result, Err(WalletError::StorageError(_))));
    }
}
