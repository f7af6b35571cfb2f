//! Password-based key derivation using Argon2id

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::MasterKey;
use crate::error::{Result, WalletError};

/// Length of a freshly generated salt in bytes
pub const SALT_LENGTH: usize = 16;

/// Lowest memory cost accepted, in KiB (8 MiB)
pub const MIN_MEMORY_COST: u32 = 8192;
/// Lowest iteration count accepted
pub const MIN_TIME_COST: u32 = 1;
/// Lowest parallelism accepted
pub const MIN_PARALLELISM: u32 = 1;
/// Shortest salt accepted, in bytes
pub const MIN_SALT_LENGTH: usize = 8;

/// Parameters for Argon2id key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// The cheapest parameters the floors allow. Only suitable for tests.
    pub fn minimum() -> Self {
        Self {
            memory_cost: MIN_MEMORY_COST,
            time_cost: MIN_TIME_COST,
            parallelism: MIN_PARALLELISM,
        }
    }

    /// Reject parameters below the hardcoded floors
    pub fn validate(&self) -> Result<()> {
        if self.memory_cost < MIN_MEMORY_COST {
            return Err(WalletError::KeyDerivationError(format!(
                "memory cost {} KiB is below the minimum of {} KiB",
                self.memory_cost, MIN_MEMORY_COST
            )));
        }
        if self.time_cost < MIN_TIME_COST {
            return Err(WalletError::KeyDerivationError(format!(
                "time cost {} is below the minimum of {}",
                self.time_cost, MIN_TIME_COST
            )));
        }
        if self.parallelism < MIN_PARALLELISM {
            return Err(WalletError::KeyDerivationError(format!(
                "parallelism {} is below the minimum of {}",
                self.parallelism, MIN_PARALLELISM
            )));
        }
        Ok(())
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit master key from a password using Argon2id
///
/// This is deliberately slow. Call it from a blocking context
/// (`tokio::task::spawn_blocking`) when running inside the arbiter.
pub fn derive_key(password: &str, salt: &[u8], params: &KeyDerivationParams) -> Result<MasterKey> {
    params.validate()?;

    if salt.len() < MIN_SALT_LENGTH {
        return Err(WalletError::KeyDerivationError(format!(
            "salt of {} bytes is below the minimum of {} bytes",
            salt.len(),
            MIN_SALT_LENGTH
        )));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32), // Output length: 32 bytes = 256 bits
    )
    .map_err(|e| WalletError::KeyDerivationError(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| WalletError::KeyDerivationError(e.to_string()))?;

    let key = MasterKey::new(key_bytes);
    key_bytes.zeroize();

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KeyDerivationParams {
        KeyDerivationParams::minimum()
    }

    #[test]
    fn test_generate_salt() {
        let salt1 = generate_salt();
        let salt2 = generate_salt();

        assert_eq!(salt1.len(), SALT_LENGTH);
        assert_ne!(salt1, salt2);
    }

    #[test]
    fn test_derive_key_deterministic() {
        let salt = generate_salt();

        let key1 = derive_key("test-password-123", &salt, &fast()).unwrap();
        let key2 = derive_key("test-password-123", &salt, &fast()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_passwords() {
        let salt = generate_salt();

        let key1 = derive_key("password1", &salt, &fast()).unwrap();
        let key2 = derive_key("password2", &salt, &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salts() {
        let key1 = derive_key("test-password", &generate_salt(), &fast()).unwrap();
        let key2 = derive_key("test-password", &generate_salt(), &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_params_below_floor_rejected() {
        let salt = generate_salt();

        let low_memory = KeyDerivationParams {
            memory_cost: 1024,
            ..fast()
        };
        assert!(matches!(
            derive_key("pw", &salt, &low_memory),
            Err(WalletError::KeyDerivationError(_))
        ));

        let zero_time = KeyDerivationParams {
            time_cost: 0,
            ..fast()
        };
        assert!(zero_time.validate().is_err());

        let zero_lanes = KeyDerivationParams {
            parallelism: 0,
            ..fast()
        };
        assert!(zero_lanes.validate().is_err());
    }

    #[test]
    fn test_short_salt_rejected() {
        assert!(derive_key("pw", &[1, 2, 3], &fast()).is_err());
    }

    #[test]
    fn test_default_params_pass_validation() {
        assert!(KeyDerivationParams::default().validate().is_ok());
    }
}
