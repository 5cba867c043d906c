//! # Secure Store
//!
//! Keyed blob store that holds envelopes and backups between sessions.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SECURE STORE                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  veil.wallet.<device_id>     Envelope JSON (already encrypted)          │
//! │  veil.backup.mnemonic        MnemonicBackup JSON (already encrypted)    │
//! │                                                                         │
//! │  SecureStore::with_encryption(key) adds a second AES-256-GCM layer,     │
//! │  with the entry name as associated data so entries cannot be swapped.   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The in-memory backend serves tests, the CLI session and hosts that plug
//! in their own persistence by copying entries out.

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::crypto::{open, seal, EncryptionKey};
use crate::error::{Error, Result};
use crate::storage::backup::MnemonicBackup;
use crate::storage::codec::Envelope;

/// Entry names
pub mod keys {
    /// Prefix of per-device wallet envelopes
    pub const WALLET_PREFIX: &str = "veil.wallet.";

    /// The mnemonic backup
    pub const MNEMONIC_BACKUP: &str = "veil.backup.mnemonic";

    /// Entry holding the envelope of `device_id`
    pub fn wallet(device_id: &str) -> String {
        format!("{}{}", WALLET_PREFIX, device_id)
    }
}

/// In-memory keyed store with optional at-rest encryption
pub struct SecureStore {
    memory: RwLock<HashMap<String, Vec<u8>>>,
    encryption_key: Option<EncryptionKey>,
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("entries", &self.memory.read().len())
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

impl SecureStore {
    /// Create a plain store
    pub fn new() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: None,
        }
    }

    /// Create a store that encrypts every entry with `key`
    pub fn with_encryption(key: [u8; 32]) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: Some(EncryptionKey::from_bytes(key)),
        }
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let data = match self.encryption_key {
            Some(ref enc_key) => seal(enc_key, value, key.as_bytes())?,
            None => value.to_vec(),
        };

        self.memory.write().insert(key.to_string(), data);
        Ok(())
    }

    /// Read the entry under `key`
    pub fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let data = match self.memory.read().get(key) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };

        let plaintext = match self.encryption_key {
            Some(ref enc_key) => open(enc_key, &data, key.as_bytes())?,
            None => data,
        };

        Ok(Some(Zeroizing::new(plaintext)))
    }

    /// Remove the entry under `key`; `true` if it existed
    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.memory.write().remove(key).is_some())
    }

    /// Check whether `key` has an entry
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.memory.read().contains_key(key))
    }

    /// Entry names starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .memory
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn store_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = Zeroizing::new(serde_json::to_vec(value)?);
        self.store(key, &json)
    }

    fn retrieve_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.retrieve(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::StorageCorrupted(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Persist the envelope under its device's entry
pub fn save_envelope(store: &SecureStore, envelope: &Envelope) -> Result<()> {
    store.store_json(&keys::wallet(&envelope.device_id), envelope)
}

/// Load the envelope stored for `device_id`
pub fn load_envelope(store: &SecureStore, device_id: &str) -> Result<Envelope> {
    store
        .retrieve_json(&keys::wallet(device_id))?
        .ok_or_else(|| Error::StorageNotFound(format!("no wallet stored for {}", device_id)))
}

/// Device ids that have an envelope in `store`
pub fn stored_devices(store: &SecureStore) -> Vec<String> {
    store
        .keys_with_prefix(keys::WALLET_PREFIX)
        .into_iter()
        .map(|k| k[keys::WALLET_PREFIX.len()..].to_string())
        .collect()
}

/// Persist the mnemonic backup
pub fn save_backup(store: &SecureStore, backup: &MnemonicBackup) -> Result<()> {
    store.store_json(keys::MNEMONIC_BACKUP, backup)
}

/// Load the mnemonic backup
pub fn load_backup(store: &SecureStore) -> Result<MnemonicBackup> {
    store
        .retrieve_json(keys::MNEMONIC_BACKUP)?
        .ok_or_else(|| Error::StorageNotFound("no mnemonic backup stored".into()))
}

/// Delete everything stored for `device_id`
pub fn delete_device_data(store: &SecureStore, device_id: &str) -> Result<bool> {
    store.delete(&keys::wallet(device_id))
}

// ============================================================================
// TESTS
// ============================================================================
