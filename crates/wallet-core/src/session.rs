//! dApp sessions: standing authorization grants per origin and network
//!
//! A session authorizes one origin to see and request signatures from a set
//! of addresses on one network. Sessions are keyed by `(origin, genesisHash)`
//! and never exist with an empty address set.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::signing::Address;
use crate::storage::{KeyValueStore, WriteOp};

/// Storage key prefix for sessions
const SESSION_PREFIX: &str = "session:";

/// Authorization grant from the user to one dApp origin on one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    /// Normalised origin of the dApp
    pub host: String,
    pub app_name: String,
    pub icon_url: Option<String>,
    pub authorized_addresses: IndexSet<Address>,
    pub genesis_hash: String,
    pub genesis_id: String,
    pub created_at: DateTime<Utc>,
    pub used_at: DateTime<Utc>,
}

impl Session {
    /// Create a session for an origin; the origin is normalised
    pub fn new(
        origin: &str,
        app_name: impl Into<String>,
        icon_url: Option<String>,
        genesis_hash: impl Into<String>,
        genesis_id: impl Into<String>,
        authorized_addresses: impl IntoIterator<Item = Address>,
    ) -> Result<Self> {
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            host: normalize_origin(origin)?,
            app_name: app_name.into(),
            icon_url,
            authorized_addresses: authorized_addresses.into_iter().collect(),
            genesis_hash: genesis_hash.into(),
            genesis_id: genesis_id.into(),
            created_at: now,
            used_at: now,
        })
    }

    pub fn authorizes(&self, address: &Address) -> bool {
        self.authorized_addresses.contains(address)
    }
}

/// Normalise an origin for use as session identity
///
/// Full URLs reduce to `scheme://host[:port]`. A bare host (what content
/// scripts report as `location.host`) is validated and lowercased.
pub fn normalize_origin(origin: &str) -> Result<String> {
    let origin = origin.trim();
    if origin.is_empty() {
        return Err(WalletError::InvalidInput("origin is empty".to_string()));
    }

    if origin.contains("://") {
        let url = Url::parse(origin)
            .map_err(|e| WalletError::InvalidInput(format!("invalid origin {}: {}", origin, e)))?;
        let serialized = url.origin().ascii_serialization();
        if serialized == "null" {
            return Err(WalletError::InvalidInput(format!(
                "origin {} has no host",
                origin
            )));
        }
        return Ok(serialized);
    }

    let url = Url::parse(&format!("https://{}", origin))
        .map_err(|e| WalletError::InvalidInput(format!("invalid host {}: {}", origin, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| WalletError::InvalidInput(format!("invalid host {}", origin)))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Result of revoking an address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevokeOutcome {
    /// Sessions that still authorize other addresses
    pub updated: Vec<Session>,
    /// Sessions deleted because nothing was left
    pub removed: Vec<Uuid>,
}

/// Persistent store of sessions
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    fn storage_key(host: &str, genesis_hash: &str) -> String {
        format!("{}{}#{}", SESSION_PREFIX, host, genesis_hash)
    }

    /// All sessions, oldest first
    pub async fn list(&self) -> Result<Vec<Session>> {
        let keys = self.storage.list_keys(SESSION_PREFIX).await?;
        let mut sessions = Vec::with_capacity(keys.len());

        for key in keys {
            if let Some(data) = self.storage.get(&key).await? {
                sessions.push(serde_json::from_slice::<Session>(&data)?);
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// The session for an origin on a network
    pub async fn get(&self, origin: &str, genesis_hash: &str) -> Result<Option<Session>> {
        let host = normalize_origin(origin)?;

        match self.storage.get(&Self::storage_key(&host, genesis_hash)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Every session an origin holds, across networks
    pub async fn find_by_origin(&self, origin: &str) -> Result<Vec<Session>> {
        let host = normalize_origin(origin)?;
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.host == host)
            .collect())
    }

    /// Union of the addresses an origin may use on any network
    pub async fn authorized_addresses_for_origin(&self, origin: &str) -> Result<IndexSet<Address>> {
        Ok(self
            .find_by_origin(origin)
            .await?
            .into_iter()
            .flat_map(|s| s.authorized_addresses)
            .collect())
    }

    /// Insert a session or merge it into the existing one
    ///
    /// On merge the authorized addresses are unioned and `usedAt` refreshed;
    /// identity and descriptive fields of the stored session are kept.
    pub async fn upsert(&self, session: Session) -> Result<Session> {
        let _guard = self.write_lock.lock().await;

        let host = normalize_origin(&session.host)?;
        let key = Self::storage_key(&host, &session.genesis_hash);

        let merged = match self.storage.get(&key).await? {
            Some(data) => {
                let mut existing: Session = serde_json::from_slice(&data)?;
                existing
                    .authorized_addresses
                    .extend(session.authorized_addresses);
                existing.used_at = Utc::now();
                debug!("Merged session {} for {}", existing.id, host);
                existing
            }
            None => {
                if session.authorized_addresses.is_empty() {
                    return Err(WalletError::InvalidInput(
                        "a session must authorize at least one address".to_string(),
                    ));
                }
                info!("Created session {} for {}", session.id, host);
                Session {
                    host,
                    used_at: Utc::now(),
                    ..session
                }
            }
        };

        self.storage.set(&key, serde_json::to_vec(&merged)?).await?;
        Ok(merged)
    }

    /// Remove an address from every session, deleting sessions left empty
    pub async fn revoke_address(&self, address: &Address) -> Result<RevokeOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut outcome = RevokeOutcome::default();
        let mut ops = Vec::new();

        for mut session in self.list().await? {
            if !session.authorized_addresses.shift_remove(address) {
                continue;
            }

            let key = Self::storage_key(&session.host, &session.genesis_hash);
            if session.authorized_addresses.is_empty() {
                ops.push(WriteOp::remove(key));
                outcome.removed.push(session.id);
            } else {
                ops.push(WriteOp::set(key, serde_json::to_vec(&session)?));
                outcome.updated.push(session);
            }
        }

        self.storage.write_batch(ops).await?;

        info!(
            "Revoked {}: {} sessions updated, {} removed",
            address,
            outcome.updated.len(),
            outcome.removed.len()
        );
        Ok(outcome)
    }

    /// Delete every session
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let ops = self
            .storage
            .list_keys(SESSION_PREFIX)
            .await?
            .into_iter()
            .map(WriteOp::remove)
            .collect();
        self.storage.write_batch(ops).await?;

        info!("Cleared all sessions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const GENESIS_HASH: &str = "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDexi9/cOUJOiI=";
    const OTHER_GENESIS_HASH: &str = "wGHE2Pwdvd7S12BL5FaOP20EGYesN73ktiC1qzkkit8=";

    fn address(seed: u8) -> Address {
        Address::from_public_key(&[seed; 32])
    }

    fn session(origin: &str, genesis_hash: &str, addresses: &[Address]) -> Session {
        Session::new(
            origin,
            "Test dApp",
            None,
            genesis_hash,
            "testnet-v1.0",
            addresses.iter().cloned(),
        )
        .unwrap()
    }

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_normalize_origin() {
        assert_eq!(normalize_origin("dapp.example").unwrap(), "dapp.example");
        assert_eq!(normalize_origin("DApp.Example:8080").unwrap(), "dapp.example:8080");
        assert_eq!(
            normalize_origin("https://dapp.example/path?q=1").unwrap(),
            "https://dapp.example"
        );
        assert!(normalize_origin("").is_err());
        assert!(normalize_origin("data:text/plain,hello://x").is_err());
    }

    #[tokio::test]
    async fn test_upsert_unions_addresses() {
        let store = store();

        let first = store
            .upsert(session("dapp.example", GENESIS_HASH, &[address(1)]))
            .await
            .unwrap();
        let merged = store
            .upsert(session("dapp.example", GENESIS_HASH, &[address(2)]))
            .await
            .unwrap();

        assert_eq!(merged.id, first.id);
        assert_eq!(
            merged.authorized_addresses.iter().cloned().collect::<Vec<_>>(),
            vec![address(1), address(2)]
        );
        assert!(merged.used_at >= first.used_at);
        assert_eq!(merged.created_at, first.created_at);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_per_network() {
        let store = store();

        store
            .upsert(session("dapp.example", GENESIS_HASH, &[address(1)]))
            .await
            .unwrap();
        store
            .upsert(session("dapp.example", OTHER_GENESIS_HASH, &[address(2)]))
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        assert!(store
            .get("dapp.example", OTHER_GENESIS_HASH)
            .await
            .unwrap()
            .unwrap()
            .authorizes(&address(2)));

        let all = store
            .authorized_addresses_for_origin("dapp.example")
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_new_session_requires_addresses() {
        let store = store();

        let result = store.upsert(session("dapp.example", GENESIS_HASH, &[])).await;
        assert!(matches!(result, Err(WalletError::InvalidInput(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoking_last_address_deletes_session() {
        let store = store();

        let doomed = store
            .upsert(session("dapp.example", GENESIS_HASH, &[address(1)]))
            .await
            .unwrap();
        store
            .upsert(session("other.example", GENESIS_HASH, &[address(1), address(2)]))
            .await
            .unwrap();
        let untouched = store
            .upsert(session("third.example", GENESIS_HASH, &[address(3)]))
            .await
            .unwrap();

        let outcome = store.revoke_address(&address(1)).await.unwrap();

        assert_eq!(outcome.removed, vec![doomed.id]);
        assert_eq!(outcome.updated.len(), 1);
        assert!(store.get("dapp.example", GENESIS_HASH).await.unwrap().is_none());

        let other = store.get("other.example", GENESIS_HASH).await.unwrap().unwrap();
        assert!(!other.authorizes(&address(1)));
        assert!(other.authorizes(&address(2)));

        let third = store.get("third.example", GENESIS_HASH).await.unwrap().unwrap();
        assert_eq!(third, untouched);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store();

        store
            .upsert(session("dapp.example", GENESIS_HASH, &[address(1)]))
            .await
            .unwrap();
        store
            .upsert(session("other.example", GENESIS_HASH, &[address(2)]))
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
