//! Cryptographic primitives for secure key storage
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption
//! - Argon2id key derivation from passwords
//! - Secure memory handling with zeroize

mod encryption;
mod key_derivation;
mod secure_memory;

pub use encryption::{decrypt, encrypt, EncryptedData, IV_LENGTH, TAG_LENGTH};
pub use key_derivation::{
    derive_key, generate_salt, KeyDerivationParams, MIN_MEMORY_COST, MIN_PARALLELISM,
    MIN_SALT_LENGTH, MIN_TIME_COST, SALT_LENGTH,
};
pub use secure_memory::{MasterKey, SecretKey};

/// Serde adapter storing byte buffers as standard base64 strings
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
