//! Account directory: public account metadata and cached balances

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{Account, AccountInformation};
use crate::error::Result;
use crate::network::{Network, NetworkClient};
use crate::signing::Address;
use crate::storage::{KeyValueStore, WriteOp};
use crate::vault::CredentialVault;

/// Storage key prefix for accounts
const ACCOUNT_PREFIX: &str = "account:";

/// Account manager
pub struct AccountDirectory {
    /// Storage backend
    storage: Arc<dyn KeyValueStore>,
    /// Vault whose records are removed along with their accounts
    vault: Arc<CredentialVault>,
    /// Source of chain state
    network_client: Arc<dyn NetworkClient>,
}

impl AccountDirectory {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        vault: Arc<CredentialVault>,
        network_client: Arc<dyn NetworkClient>,
    ) -> Self {
        Self {
            storage,
            vault,
            network_client,
        }
    }

    fn storage_key(id: Uuid) -> String {
        format!("{}{}", ACCOUNT_PREFIX, id)
    }

    /// List all accounts, oldest first
    pub async fn list(&self) -> Result<Vec<Account>> {
        let keys = self.storage.list_keys(ACCOUNT_PREFIX).await?;
        let mut accounts = Vec::with_capacity(keys.len());

        for key in keys {
            if let Some(data) = self.storage.get(&key).await? {
                accounts.push(serde_json::from_slice::<Account>(&data)?);
            }
        }

        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }

    /// Get an account by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        match self.storage.get(&Self::storage_key(id)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Get an account by hex public key
    pub async fn get_by_public_key(&self, public_key: &str) -> Result<Option<Account>> {
        let bytes = match hex::decode(public_key) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };
        self.get_by_id(Account::id_for_public_key(&bytes)).await
    }

    /// Get an account by address
    pub async fn get_by_address(&self, address: &Address) -> Result<Option<Account>> {
        self.get_by_id(Account::id_for_public_key(&address.public_key()))
            .await
    }

    /// Insert or replace an account. `createdAt` of an existing account is kept.
    pub async fn upsert(&self, mut account: Account) -> Result<Account> {
        if let Some(existing) = self.get_by_id(account.id).await? {
            account.created_at = existing.created_at;
        }
        account.updated_at = Utc::now();

        self.storage
            .set(&Self::storage_key(account.id), serde_json::to_vec(&account)?)
            .await?;

        debug!("Saved account: {}", account.id);
        Ok(account)
    }

    /// Remove an account and its private key
    ///
    /// The vault record goes first so a failure can never leave a key behind
    /// without an account that points at it.
    pub async fn remove(&self, id: Uuid) -> Result<Option<Account>> {
        let account = match self.get_by_id(id).await? {
            Some(account) => account,
            None => {
                debug!("Account {} does not exist, ignoring", id);
                return Ok(None);
            }
        };

        self.vault.remove_private_key(&account.public_key).await?;
        self.storage.remove(&Self::storage_key(id)).await?;

        info!("Removed account {} and its private key", id);
        Ok(Some(account))
    }

    /// Fetch fresh information for one account
    ///
    /// Never fails: on a fetch error the previously cached information (or
    /// the empty default) is returned unchanged.
    pub async fn refresh_information(&self, account: &Account, network: &Network) -> AccountInformation {
        let previous = account
            .information(&network.genesis_hash)
            .cloned()
            .unwrap_or_default();

        let address = match account.address() {
            Ok(address) => address,
            Err(e) => {
                warn!("Account {} has an unusable public key: {}", account.id, e);
                return previous;
            }
        };

        match self
            .network_client
            .fetch_account_information(&address, network)
            .await
        {
            Ok(information) => information,
            Err(e) => {
                warn!(
                    "Failed to refresh account {} on {}: {}",
                    address, network.genesis_id, e
                );
                previous
            }
        }
    }

    /// Refresh every account, spacing requests `delay` apart, and persist
    pub async fn refresh_all(&self, network: &Network, delay: Duration) -> Result<Vec<Account>> {
        let accounts = self.list().await?;

        debug!(
            "Updating account information for {} accounts on {}",
            accounts.len(),
            network.genesis_id
        );

        let refreshed = join_all(accounts.iter().enumerate().map(|(index, account)| async move {
            tokio::time::sleep(delay * index as u32).await;
            (account.id, self.refresh_information(account, network).await)
        }))
        .await;

        // Re-read each account so a rename during the refresh is not lost
        let mut ops = Vec::with_capacity(refreshed.len());
        let mut updated = Vec::with_capacity(refreshed.len());
        for (id, information) in refreshed {
            if let Some(mut current) = self.get_by_id(id).await? {
                current
                    .per_network_info
                    .insert(network.genesis_hash.clone(), information);
                current.updated_at = Utc::now();
                ops.push(WriteOp::set(
                    Self::storage_key(id),
                    serde_json::to_vec(&current)?,
                ));
                updated.push(current);
            }
        }

        self.storage.write_batch(ops).await?;
        Ok(updated)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::{KeyDerivationParams, SecretKey};
    use crate::error::WalletError;
    use crate::storage::MemoryStore;
    use crate::vault::PasswordTag;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Scripted node: known addresses get a balance, others fail
    #[derive(Default)]
    pub(crate) struct MockNetworkClient {
        pub balances: HashMap<String, u64>,
        pub calls: Mutex<Vec<(String, Instant)>>,
    }

    #[async_trait]
    impl NetworkClient for MockNetworkClient {
        async fn fetch_account_information(
            &self,
            address: &Address,
            _network: &Network,
        ) -> Result<AccountInformation> {
            self.calls
                .lock()
                .unwrap()
                .push((address.to_string(), Instant::now()));

            match self.balances.get(address.as_str()) {
                Some(balance) => Ok(AccountInformation {
                    atomic_balance: balance.to_string(),
                    min_atomic_balance: "100000".to_string(),
                    auth_address: None,
                    updated_at: Some(Utc::now()),
                }),
                None => Err(WalletError::NetworkError("429 Too Many Requests".to_string())),
            }
        }
    }

    async fn test_directory(client: MockNetworkClient) -> (AccountDirectory, Arc<CredentialVault>) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let vault = Arc::new(
            CredentialVault::new(store.clone(), PasswordTag::from_installation_id("test"))
                .with_params(KeyDerivationParams::minimum()),
        );
        vault.initialize("password").await.unwrap();

        let directory = AccountDirectory::new(store, vault.clone(), Arc::new(client));
        (directory, vault)
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let (directory, _) = test_directory(MockNetworkClient::default()).await;
        let account = Account::new(&[1u8; 32], Some("Main".to_string()));

        directory.upsert(account.clone()).await.unwrap();

        let by_id = directory.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(by_id.name.as_deref(), Some("Main"));

        let by_key = directory
            .get_by_public_key(&account.public_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, account.id);

        let by_address = directory
            .get_by_address(&account.address().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_address.id, account.id);

        assert_eq!(directory.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_created_at() {
        let (directory, _) = test_directory(MockNetworkClient::default()).await;
        let account = directory
            .upsert(Account::new(&[1u8; 32], None))
            .await
            .unwrap();

        let mut renamed = account.clone();
        renamed.name = Some("Renamed".to_string());
        renamed.created_at = Utc::now() + chrono::Duration::days(1);
        let saved = directory.upsert(renamed).await.unwrap();

        assert_eq!(saved.created_at, account.created_at);
        assert_eq!(saved.name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_remove_cascades_to_vault() {
        let (directory, vault) = test_directory(MockNetworkClient::default()).await;
        let account = Account::new(&[1u8; 32], None);

        vault
            .add_private_key(&account.public_key, SecretKey::new(vec![3u8; 32]), "password")
            .await
            .unwrap();
        directory.upsert(account.clone()).await.unwrap();

        let removed = directory.remove(account.id).await.unwrap();
        assert_eq!(removed.map(|a| a.id), Some(account.id));
        assert!(directory.get_by_id(account.id).await.unwrap().is_none());
        assert!(!vault.has_private_key(&account.public_key).await.unwrap());

        // Removing again is a no-op
        assert!(directory.remove(account.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_information() {
        let ok = Account::new(&[1u8; 32], None);
        let failing = Account::new(&[2u8; 32], None);

        let mut client = MockNetworkClient::default();
        client
            .balances
            .insert(ok.address().unwrap().to_string(), 5_000_000);
        let (directory, _) = test_directory(client).await;

        let network = Network::testnet();
        let cached = AccountInformation {
            atomic_balance: "42".to_string(),
            ..Default::default()
        };
        let mut failing = failing;
        failing
            .per_network_info
            .insert(network.genesis_hash.clone(), cached.clone());

        let fresh = directory.refresh_information(&ok, &network).await;
        assert_eq!(fresh.atomic_balance, "5000000");

        let kept = directory.refresh_information(&failing, &network).await;
        assert_eq!(kept, cached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_staggers_and_persists() {
        let accounts: Vec<Account> = (1..=3u8).map(|i| Account::new(&[i; 32], None)).collect();

        let mut client = MockNetworkClient::default();
        for account in &accounts[..2] {
            client
                .balances
                .insert(account.address().unwrap().to_string(), 1_000);
        }
        let client = Arc::new(client);

        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let vault = Arc::new(CredentialVault::new(
            store.clone(),
            PasswordTag::from_installation_id("test"),
        ));
        let directory = AccountDirectory::new(store, vault, client.clone());

        for account in &accounts {
            directory.upsert(account.clone()).await.unwrap();
        }

        let network = Network::mainnet();
        let started = Instant::now();
        let updated = directory
            .refresh_all(&network, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(updated.len(), 3);

        let mut offsets: Vec<u128> = client
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| at.duration_since(started).as_millis())
            .collect();
        offsets.sort();
        assert_eq!(offsets, vec![0, 100, 200]);

        for account in &accounts[..2] {
            let stored = directory.get_by_id(account.id).await.unwrap().unwrap();
            assert_eq!(
                stored.information(&network.genesis_hash).unwrap().atomic_balance,
                "1000"
            );
        }
        // The failed fetch falls back to the empty default
        let third = directory.get_by_id(accounts[2].id).await.unwrap().unwrap();
        assert_eq!(
            third.information(&network.genesis_hash).unwrap().atomic_balance,
            "0"
        );
    }
}
