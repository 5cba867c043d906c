//! # Wallet Envelopes
//!
//! A wallet at rest is an [`Envelope`]: the sanitized wallet as JSON, sealed
//! with AES-256-GCM under a key stretched from the device's auth key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        STORE / RETRIEVE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  store_wallet(wallet, device_id, auth_key)                              │
//! │    wallet.sanitized_for(device_id)     no mnemonic, no foreign keys     │
//! │    salt  = 32 random bytes             fresh per write                  │
//! │    key   = PBKDF2-SHA256(auth_key, salt, 100 000)                       │
//! │    blob  = AES-256-GCM(key, json, aad = device_id [‖ kdf])              │
//! │                                                                         │
//! │  retrieve_wallet(envelope, device_id, auth_key)                         │
//! │    version == 2          else UnsupportedStorageVersion                 │
//! │    deviceId == device_id else DeviceMismatch                            │
//! │    kdf within bounds     else StorageCorrupted                          │
//! │    open blob             else DecryptionFailed (no partial output)      │
//! │    re-check sanitization and address                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//!
//! ```json
//! {
//!   "version": 2,
//!   "deviceId": "0b0f…",
//!   "salt": "<base64, 32 bytes>",
//!   "ciphertext": "<base64, nonce ‖ ciphertext ‖ tag>",
//!   "timestamp": 1700000000000
//! }
//! ```
//!
//! A non-default work factor is recorded in an extra `kdf` field and bound
//! into the associated data. Readers refuse a stored count outside
//! [`MIN_ITERATIONS`](crate::crypto::kdf::MIN_ITERATIONS)`..=`[`MAX_ITERATIONS`](crate::crypto::kdf::MAX_ITERATIONS)
//! before running PBKDF2.
//!
//! ## Security
//!
//! The auth key is supplied by the caller (see
//! [`AuthKeyOracle`](crate::network::AuthKeyOracle)); this module never
//! derives one. PBKDF2 at 100 000 iterations is slow on purpose. Use the
//! `_async` variants from async code.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::kdf::{generate_salt, stretch_key, KdfParams, SALT_SIZE};
use crate::crypto::{open, seal, EncryptionKey};
use crate::error::{Error, Result};
use crate::wallet::Wallet;

/// Envelope format written by this version
pub const STORAGE_VERSION: u32 = 2;

/// Secret supplied by the platform to unlock a device's storage
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthKey(Vec<u8>);

impl AuthKey {
    /// Wrap raw key material
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw key material
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey([REDACTED; {}])", self.0.len())
    }
}

/// An encrypted wallet as stored on one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Format version
    pub version: u32,
    /// Device the envelope is bound to
    pub device_id: String,
    /// PBKDF2 salt, base64
    pub salt: String,
    /// nonce ‖ ciphertext ‖ tag, base64
    pub ciphertext: String,
    /// Write time (ms)
    pub timestamp: i64,
    /// Work factor, when not the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
}

impl Envelope {
    /// Encode as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::StorageCorrupted(format!("Envelope is not valid JSON: {}", e)))
    }

    /// Work factor used to write this envelope
    pub fn kdf_params(&self) -> KdfParams {
        self.kdf.unwrap_or_else(KdfParams::storage)
    }
}

/// Encrypt `wallet` for storage on `device_id`
pub fn store_wallet(wallet: &Wallet, device_id: &str, auth_key: &AuthKey) -> Result<Envelope> {
    store_wallet_with(wallet, device_id, auth_key, KdfParams::storage())
}

/// [`store_wallet`] with an explicit work factor
pub fn store_wallet_with(
    wallet: &Wallet,
    device_id: &str,
    auth_key: &AuthKey,
    params: KdfParams,
) -> Result<Envelope> {
    if !wallet.devices().contains(device_id) {
        return Err(Error::DeviceNotFound(device_id.to_string()));
    }

    let sanitized = wallet.sanitized_for(device_id);
    let mut plaintext = serde_json::to_vec(&sanitized)?;

    let kdf = (params != KdfParams::storage()).then_some(params);
    let salt = generate_salt();
    let key = EncryptionKey::from_bytes(stretch_key(auth_key.as_bytes(), &salt, params)?);
    let aad = KdfParams::associated_data(kdf, device_id.as_bytes());
    let sealed = seal(&key, &plaintext, &aad);
    plaintext.zeroize();
    let sealed = sealed?;

    tracing::info!(
        "Stored wallet {} for device {}",
        wallet.address(),
        device_id
    );

    Ok(Envelope {
        version: STORAGE_VERSION,
        device_id: device_id.to_string(),
        salt: BASE64.encode(salt),
        ciphertext: BASE64.encode(sealed),
        timestamp: crate::time::now_timestamp_millis(),
        kdf,
    })
}

/// Decrypt an envelope written for `device_id`
pub fn retrieve_wallet(envelope: &Envelope, device_id: &str, auth_key: &AuthKey) -> Result<Wallet> {
    if envelope.version != STORAGE_VERSION {
        return Err(Error::UnsupportedStorageVersion(envelope.version));
    }

    if envelope.device_id != device_id {
        return Err(Error::DeviceMismatch {
            expected: device_id.to_string(),
            found: envelope.device_id.clone(),
        });
    }

    let salt = BASE64
        .decode(&envelope.salt)
        .map_err(|e| Error::StorageCorrupted(format!("salt: {}", e)))?;
    if salt.len() != SALT_SIZE {
        return Err(Error::StorageCorrupted(format!(
            "salt is {} bytes, expected {}",
            salt.len(),
            SALT_SIZE
        )));
    }
    let sealed = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| Error::StorageCorrupted(format!("ciphertext: {}", e)))?;

    let params = envelope.kdf_params();
    params
        .check()
        .map_err(|e| Error::StorageCorrupted(format!("kdf: {}", e)))?;

    let key = EncryptionKey::from_bytes(stretch_key(auth_key.as_bytes(), &salt, params)?);
    let aad = KdfParams::associated_data(envelope.kdf, device_id.as_bytes());
    let mut plaintext = open(&key, &sealed, &aad)?;

    let decoded = serde_json::from_slice::<Wallet>(&plaintext);
    plaintext.zeroize();
    let wallet =
        decoded.map_err(|e| Error::StorageCorrupted(format!("wallet payload: {}", e)))?;

    wallet.verify_address()?;
    wallet.check_sanitized_for(device_id)?;

    tracing::debug!("Retrieved wallet {} for device {}", wallet.address(), device_id);
    Ok(wallet)
}

/// [`store_wallet_with`] on the blocking thread pool
pub async fn store_wallet_async(
    wallet: Wallet,
    device_id: String,
    auth_key: AuthKey,
    params: KdfParams,
) -> Result<Envelope> {
    tokio::task::spawn_blocking(move || store_wallet_with(&wallet, &device_id, &auth_key, params))
        .await
        .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
}

/// [`retrieve_wallet`] on the blocking thread pool
pub async fn retrieve_wallet_async(
    envelope: Envelope,
    device_id: String,
    auth_key: AuthKey,
) -> Result<Wallet> {
    tokio::task::spawn_blocking(move || retrieve_wallet(&envelope, &device_id, &auth_key))
        .await
        .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
}

// ============================================================================
// TESTS
// ============================================================================
