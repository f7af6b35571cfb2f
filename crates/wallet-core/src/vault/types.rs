//! Vault record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{base64_bytes, EncryptedData, KeyDerivationParams};

/// Namespace isolating which installation's vault a password unlocks
///
/// Derived from the installation identity; not a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordTag(String);

impl PasswordTag {
    pub fn from_installation_id(installation_id: impl Into<String>) -> Self {
        Self(installation_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PasswordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Singleton per password tag: salt, params and the password verification marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMetadata {
    pub password_tag: PasswordTag,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    pub derivation_params: KeyDerivationParams,
    /// Known plaintext encrypted under the derived key
    pub verification: EncryptedData,
    pub created_at: DateTime<Utc>,
}

/// Encrypted private key, keyed by its hex public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyRecord {
    pub public_key: String,
    /// Ciphertext with the auth tag appended
    #[serde(with = "base64_bytes")]
    pub encrypted_private_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub initialization_vector: Vec<u8>,
    /// Salt the encrypting key was derived with
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    pub derivation_params: KeyDerivationParams,
    pub created_at: DateTime<Utc>,
}

impl PrivateKeyRecord {
    pub(crate) fn encrypted(&self) -> EncryptedData {
        EncryptedData {
            iv: self.initialization_vector.clone(),
            ciphertext: self.encrypted_private_key.clone(),
        }
    }
}

/// Returned by a successful vault initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultHandle {
    pub password_tag: PasswordTag,
    pub created_at: DateTime<Utc>,
}
