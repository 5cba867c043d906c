//! # Veil Core
//!
//! Multi-device self-sovereign identity: one recovery phrase, many devices,
//! each with its own derived keys, an encrypted local copy of the wallet, and
//! merge-based convergence between copies.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         VEIL CORE MODULES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────────────────┐   │
//! │  │  Identity   │──►│  Crypto/HD  │──►│           Devices            │   │
//! │  │             │   │             │   │                              │   │
//! │  │ - BIP39     │   │ - SLIP-0010 │   │ - Registry (state machine)   │   │
//! │  │ - did:key   │   │ - Ed25519   │   │ - Pairing (single use)       │   │
//! │  │ - Profile   │   │ - X25519    │   │ - Revocation                 │   │
//! │  └─────────────┘   └─────────────┘   └──────────────┬───────────────┘   │
//! │                                                     │                   │
//! │                             ┌───────────────────────┴──────┐            │
//! │                             ▼                              ▼            │
//! │                    ┌─────────────────┐           ┌─────────────────┐    │
//! │                    │     Storage     │           │      Sync       │    │
//! │                    │                 │           │                 │    │
//! │                    │ - Envelopes     │           │ - LWW devices   │    │
//! │                    │ - Backups       │           │ - HLC registers │    │
//! │                    │ - Migration     │           │                 │    │
//! │                    └─────────────────┘           └─────────────────┘    │
//! │                                                                         │
//! │  Network: Transport / AuthKeyOracle traits, implemented by the host     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error type and taxonomy for the entire library
//! - [`crypto`] - Keys, HD derivation, encryption, signing
//! - [`identity`] - Recovery phrase, address, profile, create/restore
//! - [`devices`] - Device records, pairing, revocation
//! - [`wallet`] - The aggregate every device holds a copy of
//! - [`storage`] - Encrypted envelopes, mnemonic backups, migrations
//! - [`sync`] - Merging two copies of a wallet
//! - [`network`] - External capabilities (transport, auth key oracle)
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Recovery phrase                                                        │
//! │  ───────────────                                                        │
//! │  Only thing that can derive keys for new devices. Held in memory by     │
//! │  the authorizing device, never written to a wallet envelope. Backed     │
//! │  up only under a password with 600 000 PBKDF2 iterations.               │
//! │                                                                         │
//! │  Device keys                                                            │
//! │  ───────────                                                            │
//! │  One hardened SLIP-0010 path per device id. A device's envelope holds   │
//! │  its own key only; revocation destroys it.                              │
//! │                                                                         │
//! │  Pairing                                                                │
//! │  ───────                                                                │
//! │  Five-minute, single-use requests. The new device's secret travels      │
//! │  sealed to its ephemeral X25519 key.                                    │
//! │                                                                         │
//! │  At rest                                                                │
//! │  ───────                                                                │
//! │  AES-256-GCM, key stretched from a platform-supplied auth key, bound    │
//! │  to the device id.                                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod crypto;
pub mod devices;
pub mod error;
pub mod identity;
pub mod network;
pub mod storage;
pub mod sync;
/// Clock helpers.
pub mod time;
pub mod wallet;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use crypto::kdf::KdfParams;
pub use crypto::{KeyPair, PublicKey};
pub use devices::pairing::{
    authorize_device, generate_pairing_request, DeviceCredentials, DeviceGrant, PairingLedger,
    PairingProtocol, PairingSession, QrPayload,
};
pub use devices::revocation::{revoke_device, RevocationReason};
pub use devices::{Device, DeviceDescriptor, DeviceStatus, DeviceType, Permission};
pub use error::{Error, ErrorKind, Result};
pub use identity::{
    create_new_identity, restore_identity, Did, NewIdentity, Profile, ProfileUpdate,
    RecoveryPhrase,
};
pub use storage::{
    create_mnemonic_backup, migrate_storage, restore_mnemonic_backup, retrieve_wallet,
    store_wallet, AuthKey, Envelope, MnemonicBackup,
};
pub use sync::{merge, MergeReport};
pub use wallet::{SecurityPolicy, Wallet};

// ============================================================================
// CORE INSTANCE
// ============================================================================

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use devices::pairing::DEFAULT_PAIRING_TTL_MS;
use storage::SecureStore;

/// Global Veil Core instance
static CORE_INSTANCE: OnceCell<Arc<RwLock<VeilCore>>> = OnceCell::new();

/// Configuration for a Veil Core instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Policy given to newly created or restored wallets
    pub default_policy: SecurityPolicy,
    /// Lifetime of pairing requests (ms)
    pub pairing_ttl_ms: i64,
    /// Work factor for wallet envelopes
    pub storage_kdf: KdfParams,
    /// Work factor for mnemonic backups
    pub backup_kdf: KdfParams,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_policy: SecurityPolicy::default(),
            pairing_ttl_ms: DEFAULT_PAIRING_TTL_MS,
            storage_kdf: KdfParams::storage(),
            backup_kdf: KdfParams::backup(),
        }
    }
}

impl CoreConfig {
    /// Reject settings no operation could run with
    pub fn validate(&self) -> Result<()> {
        self.default_policy.validate()?;

        if self.pairing_ttl_ms <= 0 {
            return Err(Error::InvalidPolicy("pairing_ttl_ms must be positive".into()));
        }
        for params in [self.storage_kdf, self.backup_kdf] {
            params
                .check()
                .map_err(|e| Error::InvalidPolicy(e.to_string()))?;
        }
        if self.backup_kdf.iterations <= self.storage_kdf.iterations {
            return Err(Error::InvalidPolicy(
                "backup_kdf must use more iterations than storage_kdf".into(),
            ));
        }
        Ok(())
    }
}

/// Entry point tying configuration, the pairing ledger and storage together
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        VEIL CORE LIFECYCLE                              │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. VeilCore::initialize(config)    process-wide instance               │
/// │     or VeilCore::new(config)        independent instance                │
/// │                                                                         │
/// │  2. create_new_identity / restore_identity                              │
/// │       or load_wallet(device_id, auth_key)                               │
/// │                                                                         │
/// │  3. generate_pairing_request / authorize_device / revoke_device         │
/// │     merge copies received from other devices                            │
/// │                                                                         │
/// │  4. persist_wallet(wallet, device_id, auth_key)                         │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug)]
pub struct VeilCore {
    config: CoreConfig,
    pairing: PairingProtocol,
    store: SecureStore,
}

impl VeilCore {
    /// Build an independent instance
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let pairing = PairingProtocol::new(Arc::new(PairingLedger::new()))
            .with_ttl_ms(config.pairing_ttl_ms);

        Ok(Self {
            config,
            pairing,
            store: SecureStore::new(),
        })
    }

    /// Install the process-wide instance
    ///
    /// This should be called once at application startup.
    ///
    /// ## Example
    ///
    /// ```ignore
    /// use veil_core::{VeilCore, CoreConfig};
    ///
    /// VeilCore::initialize(CoreConfig::default())?;
    /// let core = VeilCore::instance()?;
    /// ```
    pub fn initialize(config: CoreConfig) -> Result<()> {
        tracing::info!("Initializing Veil Core v{}", version());

        let core = Self::new(config)?;
        CORE_INSTANCE
            .set(Arc::new(RwLock::new(core)))
            .map_err(|_| Error::AlreadyInitialized)?;

        tracing::info!("Veil Core initialized successfully");
        Ok(())
    }

    /// Get the process-wide instance
    pub fn instance() -> Result<Arc<RwLock<VeilCore>>> {
        CORE_INSTANCE.get().cloned().ok_or(Error::NotInitialized)
    }

    /// Check if the process-wide instance exists
    pub fn is_initialized() -> bool {
        CORE_INSTANCE.get().is_some()
    }

    /// Active configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Pairing protocol sharing this instance's ledger
    pub fn pairing(&self) -> &PairingProtocol {
        &self.pairing
    }

    /// Local entry store
    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// Create an identity for this device under the default policy
    pub fn create_new_identity(&self, device: &DeviceDescriptor) -> Result<NewIdentity> {
        identity::create_new_identity_with(device, self.config.default_policy)
    }

    /// Restore an identity on this device under the default policy
    pub fn restore_identity(
        &self,
        mnemonic: &RecoveryPhrase,
        device: &DeviceDescriptor,
    ) -> Result<Wallet> {
        identity::restore_identity_with(mnemonic, device, self.config.default_policy)
    }

    // ------------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------------

    /// Start pairing this device with an existing wallet
    pub fn generate_pairing_request(
        &self,
        name: &str,
        device_type: DeviceType,
    ) -> Result<PairingSession> {
        self.pairing
            .generate_pairing_request(&DeviceDescriptor::new(name, device_type))
    }

    /// Add the device behind `qr_payload` to `wallet`
    pub fn authorize_device(
        &self,
        wallet: &mut Wallet,
        qr_payload: &QrPayload,
        authorizer_id: &str,
    ) -> Result<Device> {
        self.pairing.authorize_device(wallet, qr_payload, authorizer_id)
    }

    /// Seal the new device's secret after authorizing it
    pub fn seal_grant(&self, wallet: &mut Wallet, qr_payload: &QrPayload) -> Result<DeviceGrant> {
        self.pairing.seal_grant(wallet, qr_payload)
    }

    /// Retire a device; `false` if nothing changed
    pub fn revoke_device(
        &self,
        wallet: &mut Wallet,
        target_id: &str,
        revoker_id: &str,
        reason: RevocationReason,
    ) -> bool {
        devices::revocation::revoke_device(wallet, target_id, revoker_id, reason)
    }

    // ------------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------------

    /// Encrypt a wallet for `device_id`
    pub fn store_wallet(
        &self,
        wallet: &Wallet,
        device_id: &str,
        auth_key: &AuthKey,
    ) -> Result<Envelope> {
        storage::codec::store_wallet_with(wallet, device_id, auth_key, self.config.storage_kdf)
    }

    /// Decrypt a wallet envelope
    pub fn retrieve_wallet(
        &self,
        envelope: &Envelope,
        device_id: &str,
        auth_key: &AuthKey,
    ) -> Result<Wallet> {
        storage::retrieve_wallet(envelope, device_id, auth_key)
    }

    /// Encrypt and keep the wallet in this instance's store
    pub fn persist_wallet(
        &self,
        wallet: &Wallet,
        device_id: &str,
        auth_key: &AuthKey,
    ) -> Result<Envelope> {
        let envelope = self.store_wallet(wallet, device_id, auth_key)?;
        storage::save_envelope(&self.store, &envelope)?;
        Ok(envelope)
    }

    /// Load and decrypt the wallet kept for `device_id`
    pub fn load_wallet(&self, device_id: &str, auth_key: &AuthKey) -> Result<Wallet> {
        let envelope = storage::load_envelope(&self.store, device_id)?;
        self.retrieve_wallet(&envelope, device_id, auth_key)
    }

    /// Rewrite a stored blob between format versions
    pub fn migrate_storage(&self, blob: &str, from: u32, to: u32) -> Result<Envelope> {
        storage::migrate_storage(blob, from, to)
    }

    /// Encrypt the recovery phrase under a password
    pub fn create_mnemonic_backup(
        &self,
        mnemonic: &RecoveryPhrase,
        password: &str,
    ) -> Result<MnemonicBackup> {
        storage::backup::create_mnemonic_backup_with(mnemonic, password, self.config.backup_kdf)
    }

    /// Decrypt a mnemonic backup
    pub fn restore_mnemonic_backup(
        &self,
        backup: &MnemonicBackup,
        password: &str,
    ) -> Result<RecoveryPhrase> {
        storage::restore_mnemonic_backup(backup, password)
    }

    // ------------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------------

    /// Merge a copy received from another device into the local one
    pub fn merge(&self, local: &Wallet, remote: &Wallet) -> Result<Wallet> {
        sync::merge(local, remote)
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Veil Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CoreConfig {
        CoreConfig {
            storage_kdf: KdfParams { iterations: 1_000 },
            backup_kdf: KdfParams { iterations: 2_000 },
            ..CoreConfig::default()
        }
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.pairing_ttl_ms, 300_000);
        assert_eq!(config.storage_kdf.iterations, 100_000);
        assert_eq!(config.backup_kdf.iterations, 600_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_json_defaults() {
        let config: CoreConfig = serde_json::from_str(r#"{"pairingTtlMs": 60000}"#).unwrap();
        assert_eq!(config.pairing_ttl_ms, 60_000);
        assert_eq!(config.default_policy, SecurityPolicy::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoreConfig {
            pairing_ttl_ms: 0,
            ..CoreConfig::default()
        };
        assert!(VeilCore::new(config).is_err());
    }

    #[test]
    fn test_kdf_settings_validated() {
        let weaker_backup = CoreConfig {
            storage_kdf: KdfParams { iterations: 2_000 },
            backup_kdf: KdfParams { iterations: 2_000 },
            ..CoreConfig::default()
        };
        assert!(matches!(weaker_backup.validate(), Err(Error::InvalidPolicy(_))));

        let unbounded = CoreConfig {
            backup_kdf: KdfParams { iterations: u32::MAX },
            ..CoreConfig::default()
        };
        assert!(matches!(unbounded.validate(), Err(Error::InvalidPolicy(_))));

        assert!(fast_config().validate().is_ok());
    }

    #[test]
    fn test_instance_lifecycle() {
        VeilCore::initialize(fast_config()).unwrap();
        assert!(VeilCore::is_initialized());
        assert!(matches!(
            VeilCore::initialize(fast_config()),
            Err(Error::AlreadyInitialized)
        ));

        let core = VeilCore::instance().unwrap();
        assert_eq!(core.read().config().pairing_ttl_ms, DEFAULT_PAIRING_TTL_MS);
    }

    #[test]
    fn test_facade_flow() {
        let core = VeilCore::new(fast_config()).unwrap();
        let identity = core.create_new_identity(&DeviceDescriptor::default()).unwrap();
        let mut wallet = identity.wallet;
        let master = identity.master_device.id;

        let session = core.generate_pairing_request("Laptop", DeviceType::Desktop).unwrap();
        core.authorize_device(&mut wallet, &session.qr_payload, &master).unwrap();
        assert_eq!(wallet.devices().active_count(), 2);

        let auth = AuthKey::new(b"k".to_vec());
        core.persist_wallet(&wallet, &master, &auth).unwrap();
        let loaded = core.load_wallet(&master, &auth).unwrap();
        assert_eq!(loaded.devices().len(), 2);

        let backup = core.create_mnemonic_backup(&identity.mnemonic, "pw").unwrap();
        assert_eq!(backup.kdf, Some(KdfParams { iterations: 2_000 }));
        let phrase = core.restore_mnemonic_backup(&backup, "pw").unwrap();
        assert_eq!(phrase.phrase(), identity.mnemonic.phrase());

        assert!(core.revoke_device(
            &mut wallet,
            &session.device_id,
            &master,
            RevocationReason::Revoked
        ));
        let merged = core.merge(&loaded, &wallet).unwrap();
        assert_eq!(merged.devices().active_count(), 1);
    }
}
