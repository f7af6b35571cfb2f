//! Credential vault: password-protected private keys at rest
//!
//! The vault is the only place raw key material is ever decrypted. Every
//! operation that needs the password re-derives the key, checks it against
//! the stored verification marker, and drops (zeroizes) both the key and any
//! decrypted secret before returning.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::types::{PasswordTag, PrivateKeyRecord, VaultHandle, VaultMetadata};
use crate::crypto::{
    decrypt, derive_key, encrypt, generate_salt, KeyDerivationParams, MasterKey, SecretKey,
};
use crate::error::{Result, WalletError};
use crate::signing::{Signer, SigningPayload};
use crate::storage::{KeyValueStore, WriteOp};

/// Storage key prefix for vault metadata
const METADATA_PREFIX: &str = "vault:";
/// Storage key prefix for private key records
const PRIVATE_KEY_PREFIX: &str = "private_key:";
/// Known plaintext sealed in the metadata to check passwords against
const VERIFICATION_PLAINTEXT: &[u8] = b"extension-wallet-verification";

/// Encrypted-at-rest private key store for one password tag
pub struct CredentialVault {
    /// Storage backend
    storage: Arc<dyn KeyValueStore>,
    /// Installation namespace
    password_tag: PasswordTag,
    /// Parameters used when sealing a new vault or a new password
    params: KeyDerivationParams,
    /// Serializes mutations so a password change never races a write
    write_lock: Mutex<()>,
}

impl CredentialVault {
    /// Create a vault with the default derivation parameters
    pub fn new(storage: Arc<dyn KeyValueStore>, password_tag: PasswordTag) -> Self {
        Self {
            storage,
            password_tag,
            params: KeyDerivationParams::default(),
            write_lock: Mutex::new(()),
        }
    }

    /// Override the derivation parameters for new vaults and password changes
    pub fn with_params(mut self, params: KeyDerivationParams) -> Self {
        self.params = params;
        self
    }

    pub fn password_tag(&self) -> &PasswordTag {
        &self.password_tag
    }

    fn metadata_key(&self) -> String {
        format!("{}{}", METADATA_PREFIX, self.password_tag)
    }

    /// Prefix shared by every record sealed under this password tag
    fn record_prefix(&self) -> String {
        format!("{}{}:", PRIVATE_KEY_PREFIX, self.password_tag)
    }

    fn record_key(&self, public_key: &str) -> String {
        format!("{}{}", self.record_prefix(), public_key)
    }

    /// Binds a record's ciphertext to its public key and this installation
    fn record_aad(&self, public_key: &str) -> Vec<u8> {
        format!("{}:{}", self.password_tag, public_key).into_bytes()
    }

    fn verification_aad(&self) -> Vec<u8> {
        format!("{}:verification", self.password_tag).into_bytes()
    }

    /// Check if a vault exists for this password tag
    pub async fn is_initialized(&self) -> Result<bool> {
        self.storage.exists(&self.metadata_key()).await
    }

    /// Create the vault, sealing a verification marker under the password
    pub async fn initialize(&self, password: &str) -> Result<VaultHandle> {
        let _guard = self.write_lock.lock().await;

        if self.is_initialized().await? {
            return Err(WalletError::AlreadyInitialized(
                self.password_tag.to_string(),
            ));
        }

        info!("Initializing vault for password tag {}", self.password_tag);

        let salt = generate_salt();
        let key = derive(password, &salt, self.params).await?;
        let verification = encrypt(VERIFICATION_PLAINTEXT, &self.verification_aad(), &key)?;

        let metadata = VaultMetadata {
            password_tag: self.password_tag.clone(),
            salt,
            derivation_params: self.params,
            verification,
            created_at: Utc::now(),
        };

        self.storage
            .set(&self.metadata_key(), serde_json::to_vec(&metadata)?)
            .await?;

        info!("Vault initialized successfully");
        Ok(VaultHandle {
            password_tag: metadata.password_tag,
            created_at: metadata.created_at,
        })
    }

    async fn load_metadata(&self) -> Result<VaultMetadata> {
        let data = self
            .storage
            .get(&self.metadata_key())
            .await?
            .ok_or_else(|| WalletError::NotInitialized(self.password_tag.to_string()))?;

        serde_json::from_slice(&data)
            .map_err(|e| WalletError::CorruptedRecord(format!("vault metadata: {}", e)))
    }

    /// Derive the key for `password` and check it against the marker
    async fn unlock(&self, password: &str) -> Result<(VaultMetadata, MasterKey)> {
        let metadata = self.load_metadata().await?;
        let key = derive(password, &metadata.salt, metadata.derivation_params).await?;

        // AEAD tag verification is constant time, and both outcomes pay for
        // the full derivation above
        if decrypt(&metadata.verification, &self.verification_aad(), &key).is_err() {
            debug!("Password verification failed");
            return Err(WalletError::InvalidPassword);
        }

        Ok((metadata, key))
    }

    /// Check a password without touching any private key record
    pub async fn verify_password(&self, password: &str) -> Result<bool> {
        match self.unlock(password).await {
            Ok(_) => Ok(true),
            Err(WalletError::InvalidPassword) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Encrypt and persist a private key
    ///
    /// `private_key` is consumed and zeroized before this returns.
    pub async fn add_private_key(
        &self,
        public_key: &str,
        private_key: SecretKey,
        password: &str,
    ) -> Result<()> {
        let public_key = normalize_public_key(public_key)?;
        let _guard = self.write_lock.lock().await;

        let (metadata, key) = self.unlock(password).await?;
        let encrypted = encrypt(private_key.expose(), &self.record_aad(&public_key), &key)?;
        drop(private_key);

        let record = PrivateKeyRecord {
            public_key: public_key.clone(),
            encrypted_private_key: encrypted.ciphertext,
            initialization_vector: encrypted.iv,
            salt: metadata.salt,
            derivation_params: metadata.derivation_params,
            created_at: Utc::now(),
        };

        self.storage
            .set(&self.record_key(&public_key), serde_json::to_vec(&record)?)
            .await?;

        info!("Added private key for public key {}", public_key);
        Ok(())
    }

    async fn load_record(&self, public_key: &str) -> Result<Option<PrivateKeyRecord>> {
        match self.storage.get(&self.record_key(public_key)).await? {
            Some(data) => Ok(Some(parse_record(public_key, &data)?)),
            None => Ok(None),
        }
    }

    /// Decrypt one record with the already-verified key
    async fn open_record(
        &self,
        record: &PrivateKeyRecord,
        metadata: &VaultMetadata,
        key: &MasterKey,
        password: &str,
    ) -> Result<SecretKey> {
        let aad = self.record_aad(&record.public_key);

        let plaintext = if record.salt == metadata.salt
            && record.derivation_params == metadata.derivation_params
        {
            decrypt(&record.encrypted(), &aad, key)
        } else {
            // Sealed under a salt other than the vault's current one
            let record_key = derive(password, &record.salt, record.derivation_params).await?;
            decrypt(&record.encrypted(), &aad, &record_key)
        };

        match plaintext {
            Ok(bytes) => Ok(SecretKey::new(bytes)),
            Err(e) => {
                warn!("Private key record {} failed to decrypt", record.public_key);
                Err(WalletError::CorruptedRecord(format!(
                    "private key {}: {}",
                    record.public_key, e
                )))
            }
        }
    }

    /// Decrypt a private key. The caller must drop it as soon as possible.
    pub async fn get_private_key(&self, public_key: &str, password: &str) -> Result<SecretKey> {
        let public_key = normalize_public_key(public_key)?;

        let (metadata, key) = self.unlock(password).await?;
        let record = self
            .load_record(&public_key)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("private key {}", public_key)))?;

        let secret = self.open_record(&record, &metadata, &key, password).await?;
        debug!("Decrypted private key for {}", public_key);
        Ok(secret)
    }

    /// Run `f` with the decrypted key; the key is wiped when `f` returns
    pub async fn with_private_key<T, F>(&self, public_key: &str, password: &str, f: F) -> Result<T>
    where
        F: FnOnce(&SecretKey) -> Result<T>,
    {
        let secret = self.get_private_key(public_key, password).await?;
        let result = f(&secret);
        drop(secret);
        result
    }

    /// Decrypt, sign every payload, discard
    ///
    /// Fails with `CorruptedRecord` if the decrypted key does not belong to
    /// `public_key`.
    pub async fn sign(
        &self,
        public_key: &str,
        password: &str,
        signer: &dyn Signer,
        payloads: &[SigningPayload<'_>],
    ) -> Result<Vec<Vec<u8>>> {
        let expected = normalize_public_key(public_key)?;

        self.with_private_key(&expected, password, |secret| {
            if hex::encode(signer.public_key(secret)?) != expected {
                return Err(WalletError::CorruptedRecord(format!(
                    "private key {} does not match its public key",
                    expected
                )));
            }

            payloads
                .iter()
                .map(|payload| signer.sign(secret, *payload))
                .collect()
        })
        .await
    }

    /// Delete a private key record. Removing a missing key is a no-op.
    pub async fn remove_private_key(&self, public_key: &str) -> Result<()> {
        let public_key = normalize_public_key(public_key)?;
        let _guard = self.write_lock.lock().await;

        self.storage.remove(&self.record_key(&public_key)).await?;

        info!("Removed private key for public key {}", public_key);
        Ok(())
    }

    /// Check if a record exists for a public key
    pub async fn has_private_key(&self, public_key: &str) -> Result<bool> {
        let public_key = normalize_public_key(public_key)?;
        self.storage.exists(&self.record_key(&public_key)).await
    }

    /// Hex public keys of every stored record
    pub async fn list_public_keys(&self) -> Result<Vec<String>> {
        let prefix = self.record_prefix();
        let keys = self.storage.list_keys(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string))
            // A tag that extends this one with ':' shares the prefix
            .filter(|public_key| !public_key.contains(':'))
            .collect())
    }

    /// Re-encrypt every record under a key derived from `new_password`
    ///
    /// All new ciphertexts are staged first and written in a single batch; if
    /// any record fails to decrypt under the old password nothing is written.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let (metadata, old_key) = self.unlock(old_password).await?;

        let new_salt = generate_salt();
        let new_params = self.params;
        let new_key = derive(new_password, &new_salt, new_params).await?;

        let prefix = self.record_prefix();
        let mut ops = Vec::new();
        for storage_key in self.storage.list_keys(&prefix).await? {
            let public_key = match storage_key.strip_prefix(prefix.as_str()) {
                Some(public_key) if !public_key.contains(':') => public_key.to_string(),
                _ => continue,
            };

            let data = match self.storage.get(&storage_key).await? {
                Some(data) => data,
                None => continue,
            };
            let record = parse_record(&public_key, &data)?;

            let secret = self
                .open_record(&record, &metadata, &old_key, old_password)
                .await?;
            let aad = self.record_aad(&record.public_key);
            let encrypted = encrypt(secret.expose(), &aad, &new_key)?;
            drop(secret);

            let updated = PrivateKeyRecord {
                encrypted_private_key: encrypted.ciphertext,
                initialization_vector: encrypted.iv,
                salt: new_salt.clone(),
                derivation_params: new_params,
                ..record
            };
            ops.push(WriteOp::set(storage_key, serde_json::to_vec(&updated)?));
        }

        let record_count = ops.len();
        let verification = encrypt(VERIFICATION_PLAINTEXT, &self.verification_aad(), &new_key)?;
        let new_metadata = VaultMetadata {
            salt: new_salt,
            derivation_params: new_params,
            verification,
            ..metadata
        };
        ops.push(WriteOp::set(
            self.metadata_key(),
            serde_json::to_vec(&new_metadata)?,
        ));

        self.storage.write_batch(ops).await?;

        info!(
            "Password changed successfully, re-encrypted {} private keys",
            record_count
        );
        Ok(())
    }
}

/// Run Argon2id off the async executor
async fn derive(password: &str, salt: &[u8], params: KeyDerivationParams) -> Result<MasterKey> {
    let password = Zeroizing::new(password.to_string());
    let salt = salt.to_vec();

    tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params)).await?
}

fn parse_record(public_key: &str, data: &[u8]) -> Result<PrivateKeyRecord> {
    serde_json::from_slice(data)
        .map_err(|e| WalletError::CorruptedRecord(format!("private key {}: {}", public_key, e)))
}

/// Lowercase hex, exactly 32 bytes
fn normalize_public_key(public_key: &str) -> Result<String> {
    let bytes = hex::decode(public_key)
        .map_err(|e| WalletError::InvalidInput(format!("public key is not hex: {}", e)))?;

    if bytes.len() != 32 {
        return Err(WalletError::InvalidInput(format!(
            "public key must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    Ok(hex::encode(bytes))
}
