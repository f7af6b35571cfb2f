//! Account type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, WalletError};
use crate::signing::{Address, PUBLIC_KEY_LENGTH};

/// Cached chain state for one account on one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInformation {
    /// Balance in base units, kept as a string to avoid precision loss
    pub atomic_balance: String,
    /// Minimum balance in base units
    pub min_atomic_balance: String,
    /// Rekeyed signing address, if any
    pub auth_address: Option<Address>,
    /// When this information was last fetched
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for AccountInformation {
    fn default() -> Self {
        Self {
            atomic_balance: "0".to_string(),
            min_atomic_balance: "0".to_string(),
            auth_address: None,
            updated_at: None,
        }
    }
}

/// Public account metadata (safe to display)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable identifier derived from the public key
    pub id: Uuid,

    /// Hex encoded public key
    pub public_key: String,

    /// User-friendly name
    pub name: Option<String>,

    /// Cached information keyed by network genesis hash
    #[serde(default)]
    pub per_network_info: HashMap<String, AccountInformation>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account for a public key
    pub fn new(public_key: &[u8; PUBLIC_KEY_LENGTH], name: Option<String>) -> Self {
        let now = Utc::now();

        Self {
            id: Self::id_for_public_key(public_key),
            public_key: hex::encode(public_key),
            name,
            per_network_info: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name-based UUID so the same key always maps to the same id
    pub fn id_for_public_key(public_key: &[u8]) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, public_key)
    }

    /// Raw public key bytes
    pub fn public_key_bytes(&self) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
        let bytes = hex::decode(&self.public_key)
            .map_err(|e| WalletError::InvalidInput(format!("account public key: {}", e)))?;
        bytes.as_slice().try_into().map_err(|_| {
            WalletError::InvalidInput(format!(
                "account public key must be {} bytes",
                PUBLIC_KEY_LENGTH
            ))
        })
    }

    /// The human-readable address
    pub fn address(&self) -> Result<Address> {
        Ok(Address::from_public_key(&self.public_key_bytes()?))
    }

    /// Cached information for a network, if any was fetched
    pub fn information(&self, genesis_hash: &str) -> Option<&AccountInformation> {
        self.per_network_info.get(genesis_hash)
    }
}
