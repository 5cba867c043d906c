//! # Wallet
//!
//! The aggregate root. One wallet is one identity; each device holds its
//! own copy and copies converge through [`crate::sync::merge`].
//!
//! ```text
//! Wallet
//! ├── address              did:key of the master public key (set once)
//! ├── master_public_key    m/44'/7337'/0' (set once)
//! ├── mnemonic             in memory only, never serialized
//! ├── devices              DeviceRegistry: id → Device
//! ├── security_policy      Lww<SecurityPolicy>
//! ├── profile              Lww<Profile>
//! ├── clock                Hlc for the two registers
//! └── created_at
//! ```

use serde::{Deserialize, Serialize};

use crate::crypto::{hd, PublicKey};
use crate::devices::{Device, DeviceDescriptor, DeviceRegistry, Permission};
use crate::error::{Error, Result};
use crate::identity::{Did, Profile, ProfileUpdate, RecoveryPhrase, Seed};
use crate::sync::clock::{Hlc, Lww};

/// Default cap on active devices
pub const DEFAULT_MAX_DEVICES: u32 = 5;

/// Default session timeout (15 minutes)
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 15 * 60;

/// Wallet-wide security settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Maximum number of simultaneously active devices
    pub max_devices: u32,
    /// Idle time after which a session must re-authenticate
    pub session_timeout_secs: u64,
    /// Whether unlocking requires a biometric-derived auth key
    pub require_biometric: bool,
}

impl SecurityPolicy {
    /// Reject settings that can never be satisfied
    pub fn validate(&self) -> Result<()> {
        if self.max_devices == 0 {
            return Err(Error::InvalidPolicy("max_devices must be at least 1".into()));
        }
        if self.session_timeout_secs == 0 {
            return Err(Error::InvalidPolicy(
                "session_timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_devices: DEFAULT_MAX_DEVICES,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            require_biometric: true,
        }
    }
}

/// One identity and its devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub(crate) address: Did,
    pub(crate) master_public_key: PublicKey,
    #[serde(skip)]
    pub(crate) mnemonic: Option<RecoveryPhrase>,
    pub(crate) devices: DeviceRegistry,
    pub(crate) security_policy: Lww<SecurityPolicy>,
    pub(crate) profile: Lww<Profile>,
    #[serde(default)]
    pub(crate) clock: Hlc,
    pub(crate) created_at: i64,
}

impl Wallet {
    /// Build a wallet with one fresh, fully privileged device
    ///
    /// Returns the wallet and a copy of that device's record.
    pub(crate) fn bootstrap(
        mnemonic: RecoveryPhrase,
        descriptor: &DeviceDescriptor,
        policy: SecurityPolicy,
    ) -> Result<(Self, Device)> {
        policy.validate()?;

        let seed = mnemonic.to_seed();
        let master_public_key = hd::derive_master_key(&seed)?.keypair()?.public_keys();
        let address = Did::from_public_key(&master_public_key.signing);

        let now = crate::time::now_timestamp_millis();
        let device_id = uuid::Uuid::new_v4().to_string();
        let derived = hd::derive_device_key(&seed, &device_id)?;
        let device = Device::from_derived(
            device_id.clone(),
            descriptor,
            derived,
            device_id,
            Permission::all(),
            now,
        )?;

        let mut devices = DeviceRegistry::default();
        devices.insert(device.clone())?;

        let wallet = Self {
            address,
            master_public_key,
            mnemonic: Some(mnemonic),
            devices,
            security_policy: Lww::initial(policy),
            profile: Lww::initial(Profile::default()),
            clock: Hlc::default(),
            created_at: now,
        };

        Ok((wallet, device))
    }

    /// Stable identifier of the identity
    pub fn address(&self) -> &Did {
        &self.address
    }

    /// Master public key
    pub fn master_public_key(&self) -> &PublicKey {
        &self.master_public_key
    }

    /// Recovery phrase, when this copy holds it
    pub fn mnemonic(&self) -> Option<&RecoveryPhrase> {
        self.mnemonic.as_ref()
    }

    /// Read access to the devices
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Registry handle; its public surface only allows [`DeviceRegistry::touch`]
    pub fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    /// Current security policy
    pub fn security_policy(&self) -> &SecurityPolicy {
        self.security_policy.get()
    }

    /// Security policy with its write stamp
    pub fn security_policy_register(&self) -> &Lww<SecurityPolicy> {
        &self.security_policy
    }

    /// Current profile
    pub fn profile(&self) -> &Profile {
        self.profile.get()
    }

    /// Profile with its write stamp
    pub fn profile_register(&self) -> &Lww<Profile> {
        &self.profile
    }

    /// Clock state
    pub fn clock(&self) -> &Hlc {
        &self.clock
    }

    /// Creation time (ms)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Re-attach the recovery phrase to a copy loaded from storage
    ///
    /// Fails unless the phrase derives this wallet's master key.
    pub fn attach_mnemonic(&mut self, mnemonic: RecoveryPhrase) -> Result<()> {
        let master = hd::derive_master_key(&mnemonic.to_seed())?
            .keypair()?
            .public_keys();

        if master != self.master_public_key {
            return Err(Error::InvalidRecoveryPhrase(
                "phrase does not belong to this wallet".into(),
            ));
        }

        self.mnemonic = Some(mnemonic);
        Ok(())
    }

    /// Seed for deriving device keys
    pub(crate) fn seed(&self) -> Result<Seed> {
        self.mnemonic
            .as_ref()
            .map(RecoveryPhrase::to_seed)
            .ok_or(Error::MnemonicUnavailable)
    }

    /// Apply a profile change made on `actor_id`
    pub fn update_profile(&mut self, actor_id: &str, update: ProfileUpdate) -> Result<()> {
        self.devices.require_capable(actor_id, Permission::EditProfile)?;

        let mut profile = self.profile.get().clone();
        profile.apply_update(update)?;

        let stamp = self.clock.tick(actor_id);
        self.profile.set(profile, stamp);
        self.devices.touch(actor_id)?;

        tracing::info!("Profile updated by {}", actor_id);
        Ok(())
    }

    /// Replace the security policy, acting as `actor_id`
    ///
    /// A cap below the current number of active devices is rejected.
    pub fn update_security_policy(&mut self, actor_id: &str, policy: SecurityPolicy) -> Result<()> {
        self.devices.require_capable(actor_id, Permission::ManageDevices)?;
        policy.validate()?;

        let active = self.devices.active_count();
        if (policy.max_devices as usize) < active {
            return Err(Error::InvalidPolicy(format!(
                "max_devices {} is below the {} active devices",
                policy.max_devices, active
            )));
        }

        let stamp = self.clock.tick(actor_id);
        self.security_policy.set(policy, stamp);
        self.devices.touch(actor_id)?;

        tracing::info!("Security policy updated by {}", actor_id);
        Ok(())
    }

    /// Check the address still encodes the master key
    pub fn verify_address(&self) -> Result<()> {
        if self.address.matches_key(&self.master_public_key.signing) {
            Ok(())
        } else {
            Err(Error::StorageCorrupted(
                "address does not match master public key".into(),
            ))
        }
    }

    /// Copy fit for `device_id`'s storage: no mnemonic, no foreign secrets
    pub fn sanitized_for(&self, device_id: &str) -> Wallet {
        let mut copy = self.clone();
        copy.mnemonic = None;
        for device in copy.devices.iter_mut() {
            if device.id != device_id || device.status.is_terminal() {
                device.private_key = None;
            }
        }
        copy
    }

    /// Copy fit for sending to other devices: no secrets at all
    pub fn public_snapshot(&self) -> Wallet {
        let mut copy = self.clone();
        copy.mnemonic = None;
        for device in copy.devices.iter_mut() {
            device.private_key = None;
        }
        copy
    }

    /// Reject a copy that carries secrets `device_id` must not hold
    pub(crate) fn check_sanitized_for(&self, device_id: &str) -> Result<()> {
        if self.mnemonic.is_some() {
            return Err(Error::StorageCorrupted("stored wallet carries a mnemonic".into()));
        }

        for device in self.devices.iter() {
            if device.has_private_key() && (device.id != device_id || device.status.is_terminal()) {
                return Err(Error::StorageCorrupted(format!(
                    "stored wallet carries a private key for {}",
                    device.id
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceStatus;

    fn new_wallet() -> (Wallet, Device) {
        Wallet::bootstrap(
            RecoveryPhrase::generate().unwrap(),
            &DeviceDescriptor::default(),
            SecurityPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_bootstrap() {
        let (wallet, device) = new_wallet();

        assert_eq!(wallet.devices().len(), 1);
        assert_eq!(wallet.devices().active_count(), 1);
        assert_eq!(device.authorized_by, device.id);
        assert!(device.has_private_key());
        assert!(device.derivation_path.starts_with("m/44'/7337'/1'/"));
        assert!(wallet.mnemonic().is_some());
        assert!(wallet.verify_address().is_ok());
        assert_eq!(wallet.security_policy().max_devices, 5);
    }

    #[test]
    fn test_mnemonic_never_serialized() {
        let (wallet, _) = new_wallet();
        let phrase = wallet.mnemonic().unwrap().phrase();

        let json = serde_json::to_string(&wallet).unwrap();
        assert!(!json.contains(&phrase));
        assert!(!json.contains("mnemonic"));

        let restored: Wallet = serde_json::from_str(&json).unwrap();
        assert!(restored.mnemonic().is_none());
        assert_eq!(restored.address(), wallet.address());
    }

    #[test]
    fn test_sanitized_for_strips_foreign_keys() {
        let (mut wallet, device) = new_wallet();
        let other = crate::devices::tests::sample_device("other", DeviceStatus::Active, 1);
        wallet.devices.insert(other).unwrap();

        let copy = wallet.sanitized_for(&device.id);
        assert!(copy.mnemonic().is_none());
        assert!(copy.devices().get(&device.id).unwrap().has_private_key());
        assert!(!copy.devices().get("other").unwrap().has_private_key());
        assert!(copy.check_sanitized_for(&device.id).is_ok());
        assert!(wallet.check_sanitized_for(&device.id).is_err());

        let public = wallet.public_snapshot();
        assert!(public.devices().iter().all(|d| !d.has_private_key()));
    }

    #[test]
    fn test_attach_mnemonic() {
        let (wallet, _) = new_wallet();
        let phrase = wallet.mnemonic().unwrap().clone();

        let mut stored = wallet.sanitized_for("nobody");
        assert!(matches!(stored.seed(), Err(Error::MnemonicUnavailable)));

        assert!(stored
            .attach_mnemonic(RecoveryPhrase::generate().unwrap())
            .is_err());
        stored.attach_mnemonic(phrase).unwrap();
        assert!(stored.seed().is_ok());
    }

    #[test]
    fn test_update_profile_stamps_register() {
        let (mut wallet, device) = new_wallet();
        assert_eq!(wallet.profile_register().stamp().wall_ms, 0);

        wallet
            .update_profile(&device.id, ProfileUpdate::DisplayName("Alice".into()))
            .unwrap();

        assert_eq!(wallet.profile().display_name, "Alice");
        assert_eq!(wallet.profile_register().stamp().node, device.id);
        assert!(wallet.profile_register().stamp().wall_ms > 0);
    }

    #[test]
    fn test_update_profile_requires_active_device() {
        let (mut wallet, _) = new_wallet();
        let revoked = crate::devices::tests::sample_device("gone", DeviceStatus::Revoked, 1);
        wallet.devices.insert(revoked).unwrap();

        let err = wallet
            .update_profile("gone", ProfileUpdate::DisplayName("Mallory".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_policy_cannot_drop_below_active_count() {
        let (mut wallet, device) = new_wallet();
        let other = crate::devices::tests::sample_device("other", DeviceStatus::Active, 1);
        wallet.devices.insert(other).unwrap();

        let tight = SecurityPolicy {
            max_devices: 1,
            ..SecurityPolicy::default()
        };
        let err = wallet.update_security_policy(&device.id, tight).unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy(_)));

        let ok = SecurityPolicy {
            max_devices: 2,
            ..SecurityPolicy::default()
        };
        wallet.update_security_policy(&device.id, ok).unwrap();
        assert_eq!(wallet.security_policy().max_devices, 2);
    }

    #[test]
    fn test_zero_device_policy_rejected() {
        let policy = SecurityPolicy {
            max_devices: 0,
            ..SecurityPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
