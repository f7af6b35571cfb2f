//! AES-256-GCM authenticated encryption
//!
//! Every ciphertext carries its own random 96-bit IV. The 128-bit auth tag is
//! kept appended to the ciphertext, and callers bind context (public key,
//! password tag) through the associated data so a ciphertext cannot be moved
//! to another record.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::MasterKey;
use crate::error::{Result, WalletError};

/// IV length for GCM
pub const IV_LENGTH: usize = 12;
/// Auth tag length appended to every ciphertext
pub const TAG_LENGTH: usize = 16;

/// Encrypted data with its IV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    /// Initialization vector (12 bytes for GCM)
    #[serde(with = "super::base64_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext with the auth tag appended
    #[serde(with = "super::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Encrypt plaintext using AES-256-GCM with a fresh random IV
pub fn encrypt(plaintext: &[u8], aad: &[u8], key: &MasterKey) -> Result<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| WalletError::EncryptionError(e.to_string()))?;

    let mut iv = vec![0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| WalletError::EncryptionError(e.to_string()))?;

    Ok(EncryptedData { iv, ciphertext })
}

/// Decrypt and authenticate ciphertext using AES-256-GCM
///
/// Fails with `DecryptionError` on a wrong key, wrong associated data, or any
/// tampering with the IV or ciphertext.
pub fn decrypt(encrypted: &EncryptedData, aad: &[u8], key: &MasterKey) -> Result<Vec<u8>> {
    if encrypted.iv.len() != IV_LENGTH {
        return Err(WalletError::DecryptionError(format!(
            "Invalid IV length: expected {}, got {}",
            IV_LENGTH,
            encrypted.iv.len()
        )));
    }
    if encrypted.ciphertext.len() < TAG_LENGTH {
        return Err(WalletError::DecryptionError(
            "Ciphertext too short".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| WalletError::DecryptionError(e.to_string()))?;

    let nonce = Nonce::from_slice(&encrypted.iv);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted.ciphertext.as_slice(),
                aad,
            },
        )
        .map_err(|e| WalletError::DecryptionError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::{derive_key, generate_salt, KeyDerivationParams};

    fn test_key() -> MasterKey {
        let salt = generate_salt();
        derive_key("test-password", &salt, &KeyDerivationParams::minimum()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"Hello, World!";

        let encrypted = encrypt(plaintext, b"ctx", &key).unwrap();
        let decrypted = decrypt(&encrypted, b"ctx", &key).unwrap();

        assert_eq!(decrypted, plaintext);
        assert_eq!(encrypted.ciphertext.len(), plaintext.len() + TAG_LENGTH);
    }

    #[test]
    fn test_different_ivs_produce_different_ciphertext() {
        let key = test_key();
        let plaintext = b"same plaintext";

        let encrypted1 = encrypt(plaintext, b"", &key).unwrap();
        let encrypted2 = encrypt(plaintext, b"", &key).unwrap();

        assert_ne!(encrypted1.iv, encrypted2.iv);
        assert_ne!(encrypted1.ciphertext, encrypted2.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let key1 = test_key();
        let key2 = test_key(); // Different key due to different salt

        let encrypted = encrypt(b"secret data", b"", &key1).unwrap();

        assert!(decrypt(&encrypted, b"", &key2).is_err());
    }

    #[test]
    fn test_wrong_associated_data_fails_decryption() {
        let key = test_key();

        let encrypted = encrypt(b"secret data", b"record-a", &key).unwrap();

        assert!(decrypt(&encrypted, b"record-b", &key).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails_decryption() {
        let key = test_key();

        let mut encrypted = encrypt(b"secret data", b"", &key).unwrap();
        encrypted.ciphertext[0] ^= 0xFF;

        assert!(decrypt(&encrypted, b"", &key).is_err());
    }

    #[test]
    fn test_tampered_auth_tag_fails_decryption() {
        let key = test_key();

        let mut encrypted = encrypt(b"secret data", b"", &key).unwrap();
        let last = encrypted.ciphertext.len() - 1;
        encrypted.ciphertext[last] ^= 0xFF;

        assert!(decrypt(&encrypted, b"", &key).is_err());
    }

    #[test]
    fn test_malformed_iv_rejected() {
        let key = test_key();

        let mut encrypted = encrypt(b"secret data", b"", &key).unwrap();
        encrypted.iv.truncate(4);

        assert!(matches!(
            decrypt(&encrypted, b"", &key),
            Err(WalletError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_serializes_as_base64() {
        let key = test_key();
        let encrypted = encrypt(b"abc", b"", &key).unwrap();

        let json = serde_json::to_value(&encrypted).unwrap();
        assert!(json["iv"].is_string());
        assert!(json["ciphertext"].is_string());

        let parsed: EncryptedData = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, encrypted);
    }
}
