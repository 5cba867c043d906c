//! # Identity Module
//!
//! Creating and restoring an identity.
//!
//! ## Identity Creation Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     IDENTITY CREATION FLOW                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. RecoveryPhrase::generate()        12 words, 128-bit entropy         │
//! │  2. phrase.to_seed()                  64-byte BIP39 seed                │
//! │  3. hd::derive_master_key(seed)       master keypair → address          │
//! │  4. new UUID for this device                                            │
//! │  5. hd::derive_device_key(seed, id)   device keypair                    │
//! │  6. Wallet { address, devices: {id: active, all permissions} }          │
//! │                                                                         │
//! │  The phrase is handed back exactly once; it stays in the in-memory      │
//! │  wallet but never reaches storage.                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Restoring runs steps 2-6 on a phrase the user typed back in. The address
//! and master key come out identical; the device is new.

mod did;
mod profile;
mod recovery;

pub use did::{Did, DID_KEY_PREFIX};
pub use profile::{Profile, ProfileUpdate};
pub use recovery::{RecoveryPhrase, Seed, WORD_COUNT};

use crate::devices::{Device, DeviceDescriptor};
use crate::error::Result;
use crate::wallet::{SecurityPolicy, Wallet};

/// Everything produced when a new identity is created
#[derive(Debug)]
pub struct NewIdentity {
    /// The recovery phrase; show it to the user once
    pub mnemonic: RecoveryPhrase,
    /// The wallet, holding the phrase in memory
    pub wallet: Wallet,
    /// The first device, authorized by itself
    pub master_device: Device,
}

/// Create an identity with default device name and policy
pub fn create_new_identity() -> Result<NewIdentity> {
    create_new_identity_with(&DeviceDescriptor::default(), SecurityPolicy::default())
}

/// Create an identity for a named device under `policy`
pub fn create_new_identity_with(
    device: &DeviceDescriptor,
    policy: SecurityPolicy,
) -> Result<NewIdentity> {
    let mnemonic = RecoveryPhrase::generate()?;
    let (wallet, master_device) = Wallet::bootstrap(mnemonic.clone(), device, policy)?;

    tracing::info!(
        "Created identity {} with device {}",
        wallet.address(),
        master_device.id
    );

    Ok(NewIdentity {
        mnemonic,
        wallet,
        master_device,
    })
}

/// Restore an identity on a fresh device with default name and policy
pub fn restore_identity(mnemonic: &RecoveryPhrase) -> Result<Wallet> {
    restore_identity_with(mnemonic, &DeviceDescriptor::default(), SecurityPolicy::default())
}

/// Restore an identity on a fresh device
///
/// The result has the original address and master key and exactly one
/// active device. Other devices reappear once this copy merges with a
/// surviving one.
pub fn restore_identity_with(
    mnemonic: &RecoveryPhrase,
    device: &DeviceDescriptor,
    policy: SecurityPolicy,
) -> Result<Wallet> {
    let (wallet, restored_device) = Wallet::bootstrap(mnemonic.clone(), device, policy)?;

    tracing::info!(
        "Restored identity {} on new device {}",
        wallet.address(),
        restored_device.id
    );

    Ok(wallet)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceType, Permission};

    #[test]
    fn test_create_new_identity() {
        let identity = create_new_identity().unwrap();

        assert_eq!(identity.mnemonic.words().len(), 12);
        assert_eq!(identity.wallet.devices().active_count(), 1);
        assert_eq!(identity.wallet.security_policy().max_devices, 5);
        assert!(identity.wallet.address().as_str().starts_with(DID_KEY_PREFIX));

        let master = &identity.master_device;
        assert_eq!(master.authorized_by, master.id);
        assert_eq!(master.permissions, Permission::all());
        assert!(identity.wallet.devices().get(&master.id).is_some());
    }

    #[test]
    fn test_restore_identity_keeps_address() {
        let identity = create_new_identity().unwrap();
        let restored = restore_identity(&identity.mnemonic).unwrap();

        assert_eq!(restored.address(), identity.wallet.address());
        assert_eq!(restored.master_public_key(), identity.wallet.master_public_key());

        // A new device, not the old one
        assert_eq!(restored.devices().active_count(), 1);
        assert!(restored.devices().get(&identity.master_device.id).is_none());
    }

    #[test]
    fn test_restore_with_descriptor() {
        let identity = create_new_identity().unwrap();
        let restored = restore_identity_with(
            &identity.mnemonic,
            &DeviceDescriptor::new("Laptop", DeviceType::Desktop),
            SecurityPolicy::default(),
        )
        .unwrap();

        let device = restored.devices().active_devices()[0].clone();
        assert_eq!(device.name, "Laptop");
        assert_eq!(device.device_type, DeviceType::Desktop);
    }

    #[test]
    fn test_distinct_identities_distinct_addresses() {
        let a = create_new_identity().unwrap();
        let b = create_new_identity().unwrap();
        assert_ne!(a.wallet.address(), b.wallet.address());
    }
}
