//! Credential vault for private keys

mod manager;
mod types;

pub use manager::CredentialVault;
pub use types::*;
