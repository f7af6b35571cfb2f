//! Main wallet orchestration

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{Account, AccountDirectory, AccountRefresher};
use crate::crypto::SecretKey;
use crate::error::{Result, WalletError};
use crate::network::{AlgodClient, NetworkClient};
use crate::session::SessionStore;
use crate::settings::{Settings, SettingsManager};
use crate::signing::{Address, Ed25519Signer, Signer, SigningPayload};
use crate::storage::{default_data_dir, JsonFileStore, KeyValueStore};
use crate::vault::{CredentialVault, VaultHandle};

/// Wallet state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    /// No vault exists for this installation yet
    NotInitialized,
    /// Vault exists; every secret operation asks for the password
    Ready,
}

/// Main wallet struct that wires the components together
pub struct Wallet {
    /// Storage backend shared by every component
    storage: Arc<dyn KeyValueStore>,
    /// Encrypted private keys
    pub vault: Arc<CredentialVault>,
    /// Public account metadata
    pub accounts: Arc<AccountDirectory>,
    /// dApp authorizations
    pub sessions: Arc<SessionStore>,
    /// Settings manager (non-sensitive config)
    settings_manager: RwLock<SettingsManager>,
    signer: Arc<dyn Signer>,
}

impl Wallet {
    /// Open the wallet in the default data directory
    pub async fn open_default() -> Result<Self> {
        Self::open(default_data_dir()?).await
    }

    /// Open the wallet stored in `data_dir`
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        let storage = Arc::new(JsonFileStore::open(data_dir.clone()).await?);
        let settings_manager = SettingsManager::new(&data_dir);
        // Pin the installation id on first start
        settings_manager.save().await?;
        let network_client = Arc::new(AlgodClient::new()?);

        Ok(Self::with_components(
            storage,
            settings_manager,
            network_client,
            Arc::new(Ed25519Signer),
        ))
    }

    /// Assemble a wallet from explicit parts
    pub fn with_components(
        storage: Arc<dyn KeyValueStore>,
        settings_manager: SettingsManager,
        network_client: Arc<dyn NetworkClient>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let settings = settings_manager.get();
        debug!("Assembling wallet on {} storage", storage.backend_name());

        let vault = Arc::new(
            CredentialVault::new(storage.clone(), settings.password_tag())
                .with_params(settings.key_derivation),
        );
        let accounts = Arc::new(AccountDirectory::new(
            storage.clone(),
            vault.clone(),
            network_client,
        ));
        let sessions = Arc::new(SessionStore::new(storage.clone()));

        Self {
            storage,
            vault,
            accounts,
            sessions,
            settings_manager: RwLock::new(settings_manager),
            signer,
        }
    }

    /// Get the current wallet state
    pub async fn state(&self) -> Result<WalletState> {
        if self.vault.is_initialized().await? {
            Ok(WalletState::Ready)
        } else {
            Ok(WalletState::NotInitialized)
        }
    }

    /// Register: create the vault for this installation
    pub async fn initialize(&self, password: &str) -> Result<VaultHandle> {
        info!("Initializing new wallet");
        self.vault.initialize(password).await
    }

    pub async fn verify_password(&self, password: &str) -> Result<bool> {
        self.vault.verify_password(password).await
    }

    /// Store a private key and create its account
    pub async fn import_account(
        &self,
        private_key: SecretKey,
        name: Option<String>,
        password: &str,
    ) -> Result<Account> {
        let public_key = self.signer.public_key(&private_key)?;
        let public_key_hex = hex::encode(public_key);

        if self.accounts.get_by_public_key(&public_key_hex).await?.is_some() {
            return Err(WalletError::InvalidInput(format!(
                "account {} already exists",
                Address::from_public_key(&public_key)
            )));
        }

        self.vault
            .add_private_key(&public_key_hex, private_key, password)
            .await?;

        match self.accounts.upsert(Account::new(&public_key, name)).await {
            Ok(account) => {
                info!("Imported account {}", account.id);
                Ok(account)
            }
            Err(e) => {
                // No account may be left without a key, nor a key without an account
                if let Err(cleanup) = self.vault.remove_private_key(&public_key_hex).await {
                    warn!("Failed to roll back private key {}: {}", public_key_hex, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Generate a fresh key pair and store it as a new account
    pub async fn generate_account(&self, name: Option<String>, password: &str) -> Result<Account> {
        let private_key = self.signer.generate();
        self.import_account(private_key, name, password).await
    }

    /// Rename an account
    pub async fn rename_account(&self, id: Uuid, name: Option<String>) -> Result<Account> {
        let mut account = self
            .accounts
            .get_by_id(id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("account {}", id)))?;
        account.name = name;
        self.accounts.upsert(account).await
    }

    /// Remove an account, its private key, and every session grant for it
    pub async fn remove_account(&self, id: Uuid) -> Result<Option<Account>> {
        let removed = self.accounts.remove(id).await?;

        if let Some(account) = &removed {
            self.sessions.revoke_address(&account.address()?).await?;
        }
        Ok(removed)
    }

    /// Re-encrypt every private key under a new password
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        self.vault.change_password(old_password, new_password).await
    }

    /// Sign payloads with the key of one of the wallet's accounts
    pub async fn sign(
        &self,
        address: &Address,
        password: &str,
        payloads: &[SigningPayload<'_>],
    ) -> Result<Vec<Vec<u8>>> {
        if self.accounts.get_by_address(address).await?.is_none() {
            return Err(WalletError::NotFound(format!("account {}", address)));
        }

        self.vault
            .sign(&address.public_key_hex(), password, self.signer.as_ref(), payloads)
            .await
    }

    /// Start background balance refreshes for the selected network
    pub async fn start_refresher(&self) -> Result<AccountRefresher> {
        let settings = self.settings().await;
        let network = settings.selected_network().cloned().ok_or_else(|| {
            WalletError::InvalidInput(format!(
                "selected network {} is unknown or disabled",
                settings.selected_network_genesis_hash
            ))
        })?;

        Ok(AccountRefresher::start(
            self.accounts.clone(),
            network,
            settings.refresh_interval(),
            settings.node_request_delay(),
        ))
    }

    /// Snapshot of the current settings
    pub async fn settings(&self) -> Settings {
        self.settings_manager.read().await.get().clone()
    }

    /// Access the settings manager for updates
    pub fn settings_manager(&self) -> &RwLock<SettingsManager> {
        &self.settings_manager
    }

    /// Delete every vault, account and session record
    pub async fn reset(&self) -> Result<()> {
        self.storage.clear().await?;
        info!("Wallet reset complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyDerivationParams;
    use crate::session::Session;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    fn create_test_wallet(temp_dir: &TempDir) -> Wallet {
        let mut settings = SettingsManager::new(temp_dir.path());
        settings.get_mut().key_derivation = KeyDerivationParams::minimum();

        Wallet::with_components(
            Arc::new(MemoryStore::new()),
            settings,
            Arc::new(AlgodClient::new().unwrap()),
            Arc::new(Ed25519Signer),
        )
    }

    #[tokio::test]
    async fn test_wallet_initialize() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = create_test_wallet(&temp_dir);

        assert_eq!(wallet.state().await.unwrap(), WalletState::NotInitialized);

        wallet.initialize("test_password").await.unwrap();
        assert_eq!(wallet.state().await.unwrap(), WalletState::Ready);
        assert!(wallet.verify_password("test_password").await.unwrap());
        assert!(!wallet.verify_password("wrong").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_persists_to_disk() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut settings = SettingsManager::new(temp_dir.path());
            settings.get_mut().key_derivation = KeyDerivationParams::minimum();
            settings.save().await.unwrap();
        }

        let account = {
            let wallet = Wallet::open(temp_dir.path().to_path_buf()).await.unwrap();
            wallet.initialize("pw").await.unwrap();
            wallet.generate_account(Some("Main".to_string()), "pw").await.unwrap()
        };

        let wallet = Wallet::open(temp_dir.path().to_path_buf()).await.unwrap();
        assert_eq!(wallet.state().await.unwrap(), WalletState::Ready);
        let reopened = wallet.accounts.get_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(reopened.name.as_deref(), Some("Main"));
        assert!(wallet.vault.has_private_key(&account.public_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_and_sign() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = create_test_wallet(&temp_dir);
        wallet.initialize("pw").await.unwrap();

        let account = wallet
            .import_account(SecretKey::new(vec![9u8; 32]), None, "pw")
            .await
            .unwrap();
        let address = account.address().unwrap();

        let signatures = wallet
            .sign(&address, "pw", &[SigningPayload::Bytes(b"hello")])
            .await
            .unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].len(), 64);

        let wrong = wallet
            .sign(&address, "nope", &[SigningPayload::Bytes(b"hello")])
            .await;
        assert!(matches!(wrong, Err(WalletError::InvalidPassword)));

        // The same key cannot be imported twice
        let duplicate = wallet
            .import_account(SecretKey::new(vec![9u8; 32]), None, "pw")
            .await;
        assert!(matches!(duplicate, Err(WalletError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_import_with_wrong_password_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = create_test_wallet(&temp_dir);
        wallet.initialize("pw").await.unwrap();

        let result = wallet
            .import_account(SecretKey::new(vec![9u8; 32]), None, "wrong")
            .await;

        assert!(matches!(result, Err(WalletError::InvalidPassword)));
        assert!(wallet.accounts.list().await.unwrap().is_empty());
        assert!(wallet.vault.list_public_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_account_revokes_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = create_test_wallet(&temp_dir);
        wallet.initialize("pw").await.unwrap();

        let account = wallet.generate_account(None, "pw").await.unwrap();
        let address = account.address().unwrap();
        let session = Session::new(
            "dapp.example",
            "dApp",
            None,
            "wGHE2Pwdvd7S12BL5FaOP20EGYesN73ktiC1qzkkit8=",
            "mainnet-v1.0",
            [address.clone()],
        )
        .unwrap();
        wallet.sessions.upsert(session).await.unwrap();

        wallet.remove_account(account.id).await.unwrap();

        assert!(wallet.accounts.list().await.unwrap().is_empty());
        assert!(!wallet.vault.has_private_key(&account.public_key).await.unwrap());
        assert!(wallet.sessions.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_password() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = create_test_wallet(&temp_dir);
        wallet.initialize("old_password").await.unwrap();
        let account = wallet.generate_account(None, "old_password").await.unwrap();

        wallet
            .change_password("old_password", "new_password")
            .await
            .unwrap();

        assert!(!wallet.verify_password("old_password").await.unwrap());
        let signatures = wallet
            .sign(
                &account.address().unwrap(),
                "new_password",
                &[SigningPayload::Transaction(b"txn")],
            )
            .await
            .unwrap();
        assert_eq!(signatures.len(), 1);
    }

    #[tokio::test]
    async fn test_reset() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = create_test_wallet(&temp_dir);
        wallet.initialize("pw").await.unwrap();
        wallet.generate_account(None, "pw").await.unwrap();

        wallet.reset().await.unwrap();

        assert_eq!(wallet.state().await.unwrap(), WalletState::NotInitialized);
        assert!(wallet.accounts.list().await.unwrap().is_empty());
    }
}
