//! # Mnemonic Backup
//!
//! Password-protected copy of the recovery phrase.
//!
//! Same construction as wallet envelopes, with its own salt and a much
//! higher work factor (600 000 PBKDF2 iterations): the phrase unlocks every
//! device of the identity, so it gets the strongest stretching.
//!
//! ```json
//! {
//!   "type": "mnemonic_backup",
//!   "version": 1,
//!   "salt": "<base64, 32 bytes>",
//!   "data": "<base64, nonce ‖ ciphertext ‖ tag>",
//!   "createdAt": 1700000000000
//! }
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::kdf::{generate_salt, stretch_key, KdfParams, SALT_SIZE};
use crate::crypto::{open, seal, EncryptionKey};
use crate::error::{Error, Result};
use crate::identity::RecoveryPhrase;

/// Value of [`MnemonicBackup::backup_type`]
pub const BACKUP_TYPE: &str = "mnemonic_backup";

/// Backup format written by this version
pub const BACKUP_VERSION: u32 = 1;

/// Associated data binding the ciphertext to its purpose
const BACKUP_AAD: &[u8] = b"mnemonic_backup";

/// An encrypted recovery phrase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MnemonicBackup {
    /// Always `"mnemonic_backup"`
    #[serde(rename = "type")]
    pub backup_type: String,
    /// Format version
    pub version: u32,
    /// PBKDF2 salt, base64
    pub salt: String,
    /// nonce ‖ ciphertext ‖ tag, base64
    pub data: String,
    /// Creation time (ms)
    pub created_at: i64,
    /// Work factor, when not the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
}

impl MnemonicBackup {
    /// Encode as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::StorageCorrupted(format!("Backup is not valid JSON: {}", e)))
    }
}

/// Encrypt `mnemonic` under `password`
pub fn create_mnemonic_backup(mnemonic: &RecoveryPhrase, password: &str) -> Result<MnemonicBackup> {
    create_mnemonic_backup_with(mnemonic, password, KdfParams::backup())
}

/// [`create_mnemonic_backup`] with an explicit work factor
pub fn create_mnemonic_backup_with(
    mnemonic: &RecoveryPhrase,
    password: &str,
    params: KdfParams,
) -> Result<MnemonicBackup> {
    if password.is_empty() {
        return Err(Error::InvalidKey("Backup password must not be empty".into()));
    }

    let kdf = (params != KdfParams::backup()).then_some(params);
    let salt = generate_salt();
    let key = EncryptionKey::from_bytes(stretch_key(password.as_bytes(), &salt, params)?);
    let phrase = Zeroizing::new(mnemonic.phrase());
    let aad = KdfParams::associated_data(kdf, BACKUP_AAD);
    let data = seal(&key, phrase.as_bytes(), &aad)?;

    tracing::info!("Created mnemonic backup");

    Ok(MnemonicBackup {
        backup_type: BACKUP_TYPE.to_string(),
        version: BACKUP_VERSION,
        salt: BASE64.encode(salt),
        data: BASE64.encode(data),
        created_at: crate::time::now_timestamp_millis(),
        kdf,
    })
}

/// Decrypt a backup
///
/// A wrong password and a tampered backup both fail with `DecryptionFailed`.
/// A stored work factor outside the accepted range is `StorageCorrupted`.
pub fn restore_mnemonic_backup(backup: &MnemonicBackup, password: &str) -> Result<RecoveryPhrase> {
    if backup.backup_type != BACKUP_TYPE {
        return Err(Error::StorageCorrupted(format!(
            "Not a mnemonic backup: '{}'",
            backup.backup_type
        )));
    }
    if backup.version != BACKUP_VERSION {
        return Err(Error::UnsupportedStorageVersion(backup.version));
    }

    let salt = BASE64
        .decode(&backup.salt)
        .map_err(|e| Error::StorageCorrupted(format!("salt: {}", e)))?;
    if salt.len() != SALT_SIZE {
        return Err(Error::StorageCorrupted("salt has the wrong length".into()));
    }
    let data = BASE64
        .decode(&backup.data)
        .map_err(|e| Error::StorageCorrupted(format!("data: {}", e)))?;

    let params = backup.kdf.unwrap_or_else(KdfParams::backup);
    params
        .check()
        .map_err(|e| Error::StorageCorrupted(format!("kdf: {}", e)))?;

    let key = EncryptionKey::from_bytes(stretch_key(password.as_bytes(), &salt, params)?);
    let aad = KdfParams::associated_data(backup.kdf, BACKUP_AAD);
    let plaintext = Zeroizing::new(open(&key, &data, &aad)?);

    let phrase = std::str::from_utf8(&plaintext)
        .map_err(|_| Error::StorageCorrupted("backup does not hold text".into()))?;

    let mnemonic = RecoveryPhrase::from_phrase(phrase)?;
    tracing::info!("Restored mnemonic from backup");
    Ok(mnemonic)
}
