//! Application settings management
//!
//! Stores non-sensitive configuration in a plain JSON file.
//! Settings are readable before the vault is initialized.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::crypto::KeyDerivationParams;
use crate::error::{Result, WalletError};
use crate::network::Network;
use crate::vault::PasswordTag;

/// Feature switches hidden behind the advanced settings page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedSettings {
    /// Show TestNet and accept requests for it
    pub allow_testnet: bool,
    /// Show BetaNet and accept requests for it
    pub allow_betanet: bool,
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settings file version
    pub version: u32,
    /// Identity of this installation; scopes the vault password tag
    pub installation_id: String,
    /// Seconds a dApp request may wait for a decision
    pub request_timeout_secs: u64,
    /// Delay between consecutive node requests during a refresh
    pub node_request_delay_ms: u64,
    /// Seconds between background balance refreshes
    pub refresh_interval_secs: u64,
    /// Argon2id parameters for newly derived keys
    pub key_derivation: KeyDerivationParams,
    pub networks: Vec<Network>,
    pub selected_network_genesis_hash: String,
    pub advanced: AdvancedSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    /// Create default settings with a fresh installation id
    pub fn new() -> Self {
        Self {
            version: 1,
            installation_id: Uuid::new_v4().to_string(),
            request_timeout_secs: 300,
            node_request_delay_ms: 100,
            refresh_interval_secs: 60,
            key_derivation: KeyDerivationParams::default(),
            selected_network_genesis_hash: Network::mainnet().genesis_hash,
            networks: Network::defaults(),
            advanced: AdvancedSettings::default(),
        }
    }

    pub fn password_tag(&self) -> PasswordTag {
        PasswordTag::from_installation_id(self.installation_id.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn node_request_delay(&self) -> Duration {
        Duration::from_millis(self.node_request_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Networks the user has enabled
    pub fn enabled_networks(&self) -> Vec<&Network> {
        let testnet = Network::testnet().genesis_hash;
        let betanet = Network::betanet().genesis_hash;

        self.networks
            .iter()
            .filter(|n| {
                if n.genesis_hash == testnet {
                    self.advanced.allow_testnet
                } else if n.genesis_hash == betanet {
                    self.advanced.allow_betanet
                } else {
                    true
                }
            })
            .collect()
    }

    /// Look up an enabled network by genesis hash
    pub fn network(&self, genesis_hash: &str) -> Option<&Network> {
        self.enabled_networks()
            .into_iter()
            .find(|n| n.genesis_hash == genesis_hash)
    }

    /// The network balances are refreshed against
    pub fn selected_network(&self) -> Option<&Network> {
        self.network(&self.selected_network_genesis_hash)
    }
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Load settings from `storage_dir`, falling back to defaults
    pub fn new(storage_dir: &Path) -> Self {
        let settings_file = storage_dir.join("settings.json");
        let settings = Self::load_from_file(&settings_file).unwrap_or_else(|e| {
            debug!("Unreadable settings file, using defaults: {}", e);
            Settings::new()
        });

        Self {
            settings_file,
            settings,
        }
    }

    /// Load settings from file
    fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(Settings::new());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.settings)?;

        if let Some(parent) = self.settings_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.settings_file).await?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Get mutable settings
    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Update settings and save
    pub async fn update(&mut self, settings: Settings) -> Result<()> {
        self.settings = settings;
        self.save().await
    }

    /// Select the network used for balance refreshes
    pub async fn select_network(&mut self, genesis_hash: &str) -> Result<()> {
        if self.settings.network(genesis_hash).is_none() {
            return Err(WalletError::InvalidInput(format!(
                "unknown or disabled network {}",
                genesis_hash
            )));
        }
        self.settings.selected_network_genesis_hash = genesis_hash.to_string();
        self.save().await
    }

    /// Replace the advanced flags and save
    pub async fn update_advanced(&mut self, advanced: AdvancedSettings) -> Result<()> {
        self.settings.advanced = advanced;
        self.save().await
    }

    /// Reset settings to defaults and delete settings file
    ///
    /// A new installation id is generated, so the old vault tag no longer
    /// resolves.
    pub async fn reset(&mut self) -> Result<()> {
        self.settings = Settings::new();

        if self.settings_file.exists() {
            tokio::fs::remove_file(&self.settings_file)
                .await
                .map_err(|e| WalletError::StorageError(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settings_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path());

        let settings = manager.get();
        assert_eq!(settings.node_request_delay(), Duration::from_millis(100));
        assert!(!settings.advanced.allow_testnet);
        assert_eq!(
            settings.selected_network().map(|n| n.genesis_id.as_str()),
            Some("mainnet-v1.0")
        );
        assert!(!settings.installation_id.is_empty());
    }

    #[tokio::test]
    async fn test_settings_persistence() {
        let temp_dir = TempDir::new().unwrap();

        let installation_id = {
            let mut manager = SettingsManager::new(temp_dir.path());
            manager.get_mut().request_timeout_secs = 30;
            manager.get_mut().advanced.allow_testnet = true;
            manager.save().await.unwrap();
            manager.get().installation_id.clone()
        };

        {
            let manager = SettingsManager::new(temp_dir.path());
            assert_eq!(manager.get().request_timeout(), Duration::from_secs(30));
            assert!(manager.get().advanced.allow_testnet);
            assert_eq!(manager.get().installation_id, installation_id);
        }
    }

    #[tokio::test]
    async fn test_test_networks_are_gated() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = SettingsManager::new(temp_dir.path());
        let testnet = Network::testnet().genesis_hash;

        assert!(manager.get().network(&testnet).is_none());
        assert!(manager.select_network(&testnet).await.is_err());

        manager
            .update_advanced(AdvancedSettings {
                allow_testnet: true,
                allow_betanet: false,
            })
            .await
            .unwrap();
        manager.select_network(&testnet).await.unwrap();

        assert_eq!(
            manager.get().selected_network().map(|n| n.genesis_id.as_str()),
            Some("testnet-v1.0")
        );
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("settings.json"),
            r#"{"version":1,"installationId":"abc"}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(temp_dir.path());
        assert_eq!(manager.get().installation_id, "abc");
        assert_eq!(manager.get().networks.len(), 3);
    }
}
