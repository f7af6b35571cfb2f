//! Networks and the node client used to refresh account information

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::account::AccountInformation;
use crate::error::{Result, WalletError};
use crate::signing::Address;

/// A network the wallet can talk to, identified by its genesis hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub genesis_hash: String,
    pub genesis_id: String,
    /// Base URL of the node's REST API
    pub algod_url: String,
    /// Test networks are hidden unless enabled in the advanced settings
    #[serde(default)]
    pub is_test_network: bool,
}

impl Network {
    pub fn mainnet() -> Self {
        Self {
            genesis_hash: "wGHE2Pwdvd7S12BL5FaOP20EGYesN73ktiC1qzkkit8=".to_string(),
            genesis_id: "mainnet-v1.0".to_string(),
            algod_url: "https://mainnet-api.algonode.cloud".to_string(),
            is_test_network: false,
        }
    }

    pub fn testnet() -> Self {
        Self {
            genesis_hash: "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDexi9/cOUJOiI=".to_string(),
            genesis_id: "testnet-v1.0".to_string(),
            algod_url: "https://testnet-api.algonode.cloud".to_string(),
            is_test_network: true,
        }
    }

    pub fn betanet() -> Self {
        Self {
            genesis_hash: "mFgazF+2uRS1tMiL9dsj01hJGySEmPN28B/TjjvpVW0=".to_string(),
            genesis_id: "betanet-v1.0".to_string(),
            algod_url: "https://betanet-api.algonode.cloud".to_string(),
            is_test_network: true,
        }
    }

    /// Every network the wallet ships with
    pub fn defaults() -> Vec<Self> {
        vec![Self::mainnet(), Self::testnet(), Self::betanet()]
    }
}

/// Source of chain state for account balances
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn fetch_account_information(
        &self,
        address: &Address,
        network: &Network,
    ) -> Result<AccountInformation>;
}

#[derive(Debug, Deserialize)]
struct AlgodAccountResponse {
    amount: u64,
    #[serde(rename = "min-balance", default)]
    min_balance: u64,
    #[serde(rename = "auth-addr")]
    auth_addr: Option<String>,
}

/// HTTP client for a node's `/v2/accounts/{address}` endpoint
pub struct AlgodClient {
    http: reqwest::Client,
}

impl AlgodClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WalletError::NetworkError(e.to_string()))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl NetworkClient for AlgodClient {
    async fn fetch_account_information(
        &self,
        address: &Address,
        network: &Network,
    ) -> Result<AccountInformation> {
        let url = format!(
            "{}/v2/accounts/{}?exclude=all",
            network.algod_url.trim_end_matches('/'),
            address
        );

        debug!("Fetching account information from {}", url);

        let response: AlgodAccountResponse = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WalletError::NetworkError(e.to_string()))?
            .json()
            .await
            .map_err(|e| WalletError::NetworkError(e.to_string()))?;

        let auth_address = match response.auth_addr {
            Some(addr) => Some(Address::parse(&addr)?),
            None => None,
        };

        Ok(AccountInformation {
            atomic_balance: response.amount.to_string(),
            min_atomic_balance: response.min_balance.to_string(),
            auth_address,
            updated_at: Some(chrono::Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_networks_are_distinct() {
        let networks = Network::defaults();
        assert_eq!(networks.len(), 3);
        assert!(!networks[0].is_test_network);
        assert_ne!(networks[0].genesis_hash, networks[1].genesis_hash);
    }

    #[test]
    fn test_algod_response_parsing() {
        let json = r#"{"address":"X","amount":1500000,"min-balance":100000,"round":1}"#;
        let parsed: AlgodAccountResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.amount, 1_500_000);
        assert_eq!(parsed.min_balance, 100_000);
        assert!(parsed.auth_addr.is_none());
    }
}
