//! Human-readable account addresses
//!
//! An address is the unpadded RFC 4648 base32 encoding of the 32-byte public
//! key followed by a 4-byte checksum (the last four bytes of its
//! SHA-512/256 digest).

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WalletError};

pub const PUBLIC_KEY_LENGTH: usize = 32;
const CHECKSUM_LENGTH: usize = 4;
/// 36 bytes of base32 without padding
pub const ADDRESS_LENGTH: usize = 58;

/// A validated account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Encode a public key as an address
    pub fn from_public_key(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> Self {
        let mut bytes = Vec::with_capacity(PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH);
        bytes.extend_from_slice(public_key);
        bytes.extend_from_slice(&checksum(public_key));
        Self(BASE32_NOPAD.encode(&bytes))
    }

    /// Encode a public key given as a byte slice
    pub fn from_public_key_slice(public_key: &[u8]) -> Result<Self> {
        let public_key: [u8; PUBLIC_KEY_LENGTH] = public_key.try_into().map_err(|_| {
            WalletError::InvalidAddress(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                public_key.len()
            ))
        })?;
        Ok(Self::from_public_key(&public_key))
    }

    /// Parse and validate an address string
    pub fn parse(address: &str) -> Result<Self> {
        if address.len() != ADDRESS_LENGTH {
            return Err(WalletError::InvalidAddress(format!(
                "expected {} characters, got {}",
                ADDRESS_LENGTH,
                address.len()
            )));
        }

        let bytes = BASE32_NOPAD
            .decode(address.as_bytes())
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;

        let (public_key, sum) = bytes.split_at(PUBLIC_KEY_LENGTH);
        let public_key: [u8; PUBLIC_KEY_LENGTH] = public_key
            .try_into()
            .map_err(|_| WalletError::InvalidAddress("truncated public key".to_string()))?;

        if checksum(&public_key) != sum {
            return Err(WalletError::InvalidAddress(format!(
                "checksum mismatch for {}",
                address
            )));
        }

        Ok(Self(address.to_string()))
    }

    /// The public key this address encodes
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
        // The string was validated on construction
        if let Ok(bytes) = BASE32_NOPAD.decode(self.0.as_bytes()) {
            public_key.copy_from_slice(&bytes[..PUBLIC_KEY_LENGTH]);
        }
        public_key
    }

    /// Hex form of the public key, as used for vault record keys
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn checksum(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> [u8; CHECKSUM_LENGTH] {
    let digest = Sha512_256::digest(public_key);
    let mut sum = [0u8; CHECKSUM_LENGTH];
    sum.copy_from_slice(&digest[digest.len() - CHECKSUM_LENGTH..]);
    sum
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_key_address() {
        // Well-known address of the all-zero public key
        let address = Address::from_public_key(&[0u8; 32]);
        assert_eq!(
            address.as_str(),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ"
        );
    }

    #[test]
    fn test_parse_recovers_public_key() {
        let public_key = [42u8; 32];
        let address = Address::from_public_key(&public_key);

        let parsed = Address::parse(address.as_str()).unwrap();
        assert_eq!(parsed.public_key(), public_key);
        assert_eq!(parsed.public_key_hex(), hex::encode(public_key));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let address = Address::from_public_key(&[42u8; 32]).to_string();
        let mut chars: Vec<char> = address.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        assert!(matches!(
            Address::parse(&tampered),
            Err(WalletError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(Address::parse("ABC").is_err());
        assert!(Address::parse("").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let good = Address::from_public_key(&[1u8; 32]);
        let json = serde_json::to_string(&good).unwrap();
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, good);

        assert!(serde_json::from_str::<Address>("\"not-an-address\"").is_err());
    }
}
