//! Signing primitive used inside the vault's decrypt-sign-discard window

use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use super::address::PUBLIC_KEY_LENGTH;
use crate::crypto::SecretKey;
use crate::error::{Result, WalletError};

/// Domain prefix for arbitrary data, so signed bytes can never be a transaction
pub const BYTES_PREFIX: &[u8] = b"MX";
/// Domain prefix for transactions
pub const TRANSACTION_PREFIX: &[u8] = b"TX";

/// What a signature is being produced over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningPayload<'a> {
    /// Arbitrary dApp-supplied data
    Bytes(&'a [u8]),
    /// A chain-encoded transaction
    Transaction(&'a [u8]),
}

/// Cryptographic signing library seam
///
/// Transaction encoding is the implementation's concern; the vault only hands
/// it secret material for the duration of one call.
pub trait Signer: Send + Sync {
    /// Produce a fresh private key
    fn generate(&self) -> SecretKey;

    /// Derive the public key for a private key
    fn public_key(&self, secret: &SecretKey) -> Result<[u8; PUBLIC_KEY_LENGTH]>;

    /// Sign a payload, returning the encoded signature (or signed transaction)
    fn sign(&self, secret: &SecretKey, payload: SigningPayload<'_>) -> Result<Vec<u8>>;
}

/// Ed25519 over 32-byte seeds
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Signer;

impl Ed25519Signer {
    fn signing_key(secret: &SecretKey) -> Result<SigningKey> {
        let mut seed: [u8; 32] = secret.expose().try_into().map_err(|_| {
            WalletError::SigningError(format!(
                "private key must be 32 bytes, got {}",
                secret.len()
            ))
        })?;
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(key)
    }
}

impl Signer for Ed25519Signer {
    fn generate(&self) -> SecretKey {
        let key = SigningKey::generate(&mut OsRng);
        SecretKey::from_slice(key.as_bytes())
    }

    fn public_key(&self, secret: &SecretKey) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
        Ok(Self::signing_key(secret)?.verifying_key().to_bytes())
    }

    fn sign(&self, secret: &SecretKey, payload: SigningPayload<'_>) -> Result<Vec<u8>> {
        let key = Self::signing_key(secret)?;

        let (prefix, data) = match payload {
            SigningPayload::Bytes(data) => (BYTES_PREFIX, data),
            SigningPayload::Transaction(data) => (TRANSACTION_PREFIX, data),
        };

        let mut message = Vec::with_capacity(prefix.len() + data.len());
        message.extend_from_slice(prefix);
        message.extend_from_slice(data);

        Ok(key.sign(&message).to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn test_signature_verifies_with_prefix() {
        let signer = Ed25519Signer;
        let secret = signer.generate();
        let public_key = signer.public_key(&secret).unwrap();

        let signature = signer
            .sign(&secret, SigningPayload::Bytes(b"hello"))
            .unwrap();

        let verifying_key = VerifyingKey::from_bytes(&public_key).unwrap();
        let signature = Signature::from_slice(&signature).unwrap();
        assert!(verifying_key.verify(b"MXhello", &signature).is_ok());
        assert!(verifying_key.verify(b"TXhello", &signature).is_err());
    }

    #[test]
    fn test_transaction_uses_distinct_domain() {
        let signer = Ed25519Signer;
        let secret = SecretKey::new(vec![3u8; 32]);

        let as_bytes = signer.sign(&secret, SigningPayload::Bytes(b"x")).unwrap();
        let as_txn = signer
            .sign(&secret, SigningPayload::Transaction(b"x"))
            .unwrap();

        assert_ne!(as_bytes, as_txn);
        assert_eq!(as_txn.len(), 64);
    }

    #[test]
    fn test_wrong_length_secret_rejected() {
        let secret = SecretKey::new(vec![1u8; 16]);
        assert!(matches!(
            Ed25519Signer.public_key(&secret),
            Err(WalletError::SigningError(_))
        ));
    }
}
