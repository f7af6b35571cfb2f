//! Addresses and the signing primitive

mod address;
mod signer;

pub use address::{Address, ADDRESS_LENGTH, PUBLIC_KEY_LENGTH};
pub use signer::{Ed25519Signer, Signer, SigningPayload, BYTES_PREFIX, TRANSACTION_PREFIX};
