//! # wallet-core
//!
//! Core of the extension wallet including:
//! - Argon2id key derivation and AES-256-GCM sealed private keys
//! - Key-value storage with atomic batch writes
//! - Account directory with staggered balance refresh
//! - dApp sessions keyed by origin and network
//! - Private keys held in zeroize-on-drop buffers

pub mod account;
pub mod crypto;
pub mod error;
pub mod network;
pub mod session;
pub mod settings;
pub mod signing;
pub mod storage;
pub mod vault;
mod wallet;

pub use account::{Account, AccountDirectory, AccountInformation, AccountRefresher};
pub use crypto::{derive_key, generate_salt, KeyDerivationParams, MasterKey, SecretKey};
pub use error::{Result, WalletError};
pub use network::{AlgodClient, Network, NetworkClient};
pub use session::{normalize_origin, RevokeOutcome, Session, SessionStore};
pub use settings::{AdvancedSettings, Settings, SettingsManager};
pub use signing::{Address, Ed25519Signer, Signer, SigningPayload};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, WriteOp};
pub use vault::{CredentialVault, PasswordTag, VaultHandle};
pub use wallet::{Wallet, WalletState};
