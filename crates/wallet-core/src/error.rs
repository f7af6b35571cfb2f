//! Error types for wallet-core

use thiserror::Error;

/// Result type alias for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Wallet error types
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("A vault already exists for password tag {0}")]
    AlreadyInitialized(String),

    #[error("No vault exists for password tag {0} - initialize it first")]
    NotInitialized(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Record is corrupted or has been tampered with: {0}")]
    CorruptedRecord(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),

    #[error("Signing failed: {0}")]
    SigningError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskError(String),
}

impl WalletError {
    /// Errors the user can recover from by re-entering a password
    pub fn is_credential_error(&self) -> bool {
        matches!(self, WalletError::InvalidPassword)
    }
}

impl From<tokio::task::JoinError> for WalletError {
    fn from(e: tokio::task::JoinError) -> Self {
        WalletError::TaskError(e.to_string())
    }
}
