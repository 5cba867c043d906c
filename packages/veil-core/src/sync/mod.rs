//! # Sync
//!
//! Reconciles two copies of the same wallet.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MERGE RULES                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  address / master key   must be equal, else WalletMismatch              │
//! │                                                                         │
//! │  devices (per id, union of both sides)                                  │
//! │    1. terminal beats non-terminal                                       │
//! │    2. greater last_active                                               │
//! │    3. higher status rank                                                │
//! │    4. local                                                             │
//! │    winner sets name, status, last_active, permissions                   │
//! │    keys, path, created_at, authorized_by: always local                  │
//! │    different public keys for one id: WalletMismatch                     │
//! │    private key: local copy's, if non-terminal and matching              │
//! │                                                                         │
//! │  profile / security_policy   greater HLC stamp (see [`clock`])          │
//! │  clock                       max of both                                │
//! │  mnemonic                    local                                      │
//! │  created_at                  earliest                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Merging never fails because of a device cap; a merged wallet can briefly
//! hold more active devices than its policy allows (two authorizers adding
//! devices offline). [`MergeReport::over_capacity`] flags it.

pub mod clock;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::devices::Device;
use crate::error::{Error, Result};
use crate::wallet::Wallet;

/// What a merge changed in the local copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Devices only the remote side knew
    pub added: Vec<String>,
    /// Devices whose remote record replaced the local one
    pub updated: Vec<String>,
    /// Devices that became terminal through the merge
    pub retired: Vec<String>,
    /// Whether the profile came from the remote side
    pub profile_changed: bool,
    /// Whether the security policy came from the remote side
    pub policy_changed: bool,
    /// Active devices exceed `max_devices` after the merge
    pub over_capacity: bool,
}

impl MergeReport {
    /// `true` if the merge left the local copy as it was
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && !self.profile_changed
            && !self.policy_changed
    }
}

/// Merge a remote copy into the local one
pub fn merge(local: &Wallet, remote: &Wallet) -> Result<Wallet> {
    merge_with_report(local, remote).map(|(wallet, _)| wallet)
}

/// [`merge`], also describing what changed
pub fn merge_with_report(local: &Wallet, remote: &Wallet) -> Result<(Wallet, MergeReport)> {
    if local.address() != remote.address() {
        return Err(Error::WalletMismatch(format!(
            "cannot merge {} into {}",
            remote.address(),
            local.address()
        )));
    }
    if local.master_public_key() != remote.master_public_key() {
        return Err(Error::WalletMismatch("master public keys differ".into()));
    }

    let mut merged = local.clone();
    let mut report = MergeReport::default();

    let ids: BTreeSet<String> = local
        .devices()
        .ids()
        .chain(remote.devices().ids())
        .cloned()
        .collect();

    for id in ids {
        let ours = local.devices().get(&id);
        let theirs = remote.devices().get(&id);

        let record = match (ours, theirs) {
            (Some(ours), Some(theirs)) => {
                let remote_wins = prefer_remote(ours, theirs);
                if remote_wins {
                    report.updated.push(id.clone());
                    if theirs.status.is_terminal() && !ours.status.is_terminal() {
                        report.retired.push(id.clone());
                    }
                }
                reconcile(ours, theirs, remote_wins)?
            }
            (Some(ours), None) => with_local_secret(ours, Some(ours))?,
            (None, Some(theirs)) => {
                report.added.push(id.clone());
                with_local_secret(theirs, None)?
            }
            (None, None) => continue,
        };

        merged.devices.put(record);
    }

    let profile = local.profile.merge(&remote.profile);
    report.profile_changed = profile.stamp() != local.profile.stamp();
    merged.profile = profile;

    let policy = local.security_policy.merge(&remote.security_policy);
    report.policy_changed = policy.stamp() != local.security_policy.stamp();
    merged.security_policy = policy;

    merged.clock.merge(&remote.clock);
    merged.created_at = local.created_at.min(remote.created_at);

    let max = merged.security_policy().max_devices;
    report.over_capacity = merged.devices.active_count() > max as usize;
    if report.over_capacity {
        tracing::warn!(
            "Merged wallet {} has {} active devices, policy allows {}",
            merged.address(),
            merged.devices.active_count(),
            max
        );
    }

    if !report.is_noop() {
        tracing::info!(
            "Merged wallet {}: {} added, {} updated, {} retired",
            merged.address(),
            report.added.len(),
            report.updated.len(),
            report.retired.len()
        );
    }

    Ok((merged, report))
}

/// Whether the remote record wins over the local one
fn prefer_remote(ours: &Device, theirs: &Device) -> bool {
    match (ours.status.is_terminal(), theirs.status.is_terminal()) {
        (false, true) => return true,
        (true, false) => return false,
        _ => {}
    }

    match theirs.last_active.cmp(&ours.last_active) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => theirs.status.rank() > ours.status.rank(),
    }
}

/// One record for a device both copies know
///
/// Identity fields (keys, path, creation time, authorizer) always come from
/// the local record; only the mutable fields follow the winner.
fn reconcile(ours: &Device, theirs: &Device, remote_wins: bool) -> Result<Device> {
    if ours.public_key != theirs.public_key {
        return Err(Error::WalletMismatch(format!(
            "copies disagree on the keys of device {}",
            ours.id
        )));
    }

    let mut record = ours.public_projection();
    if remote_wins {
        record.name = theirs.name.clone();
        record.status = theirs.status;
        record.last_active = theirs.last_active;
        record.permissions = theirs.permissions.clone();
    }

    with_local_secret(&record, Some(ours))
}

/// Copy of `record` carrying the local secret, if it may carry one at all
fn with_local_secret(record: &Device, local: Option<&Device>) -> Result<Device> {
    let mut out = record.public_projection();
    if out.status.is_terminal() {
        return Ok(out);
    }

    if let Some(secret) = local.and_then(|d| d.private_key.as_ref()) {
        if secret.keypair()?.public_keys() == out.public_key {
            out.private_key = Some(secret.clone());
        } else {
            tracing::warn!("Dropping local secret of {}: it does not match the record", out.id);
        }
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pairing::{generate_pairing_request, PairingProtocol};
    use crate::devices::revocation::{revoke_device, RevocationReason};
    use crate::devices::tests::sample_device;
    use crate::devices::{DeviceStatus, DeviceType};
    use crate::error::ErrorKind;
    use crate::identity::{create_new_identity, ProfileUpdate};
    use crate::wallet::SecurityPolicy;

    fn identity() -> (Wallet, String) {
        let identity = create_new_identity().unwrap();
        (identity.wallet, identity.master_device.id)
    }

    fn device_ids(wallet: &Wallet) -> Vec<(String, DeviceStatus, i64)> {
        wallet
            .devices()
            .iter()
            .map(|d| (d.id.clone(), d.status, d.last_active))
            .collect()
    }

    #[test]
    fn test_rejects_other_identity() {
        let (a, _) = identity();
        let (b, _) = identity();
        let err = merge(&a, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_union_of_devices() {
        let (mut local, _) = identity();
        let mut remote = local.public_snapshot();

        local.devices.insert(sample_device("a", DeviceStatus::Active, 10)).unwrap();
        remote.devices.insert(sample_device("b", DeviceStatus::Active, 10)).unwrap();

        let (merged, report) = merge_with_report(&local, &remote).unwrap();
        assert_eq!(merged.devices().len(), 3);
        assert_eq!(report.added, vec!["b".to_string()]);

        // Secrets are never adopted from the remote side
        assert!(merged.devices().get("a").unwrap().has_private_key());
        assert!(!merged.devices().get("b").unwrap().has_private_key());
    }

    #[test]
    fn test_newer_entry_wins() {
        let (mut local, _) = identity();
        let mut remote = local.public_snapshot();

        local.devices.insert(sample_device("a", DeviceStatus::Active, 10)).unwrap();
        let mut newer = sample_device("a", DeviceStatus::Active, 20);
        newer.name = "Renamed".into();
        remote.devices.insert(newer).unwrap();

        let merged = merge(&local, &remote).unwrap();
        let device = merged.devices().get("a").unwrap();
        assert_eq!(device.name, "Renamed");
        assert_eq!(device.last_active, 20);
        // Still active, so the local secret is kept
        assert!(device.has_private_key());
    }

    #[test]
    fn test_identity_fields_stay_local() {
        let (mut local, _) = identity();
        let mut remote = local.public_snapshot();

        let ours = sample_device("a", DeviceStatus::Active, 10);
        let mut theirs = ours.public_projection();
        theirs.name = "Renamed".into();
        theirs.last_active = 99;
        theirs.authorized_by = "someone-else".into();
        theirs.derivation_path = "m/44'/7337'/1'/1'".into();
        theirs.created_at = 1;
        local.devices.insert(ours.clone()).unwrap();
        remote.devices.insert(theirs).unwrap();

        let merged = merge(&local, &remote).unwrap();
        let device = merged.devices().get("a").unwrap();
        assert_eq!(device.name, "Renamed");
        assert_eq!(device.last_active, 99);
        assert_eq!(device.authorized_by, ours.authorized_by);
        assert_eq!(device.derivation_path, ours.derivation_path);
        assert_eq!(device.created_at, ours.created_at);

        let secret = device.private_key.as_ref().unwrap();
        assert_eq!(secret.keypair().unwrap().public_keys(), device.public_key);
    }

    #[test]
    fn test_conflicting_keys_rejected() {
        let (local, master) = identity();
        let mut remote = local.public_snapshot();

        let mut impostor = sample_device("other", DeviceStatus::Active, i64::MAX - 1);
        impostor.id = master.clone();
        impostor.private_key = None;
        impostor.authorized_by = "someone-else".into();
        remote.devices.put(impostor);

        let err = merge(&local, &remote).unwrap_err();
        assert!(matches!(err, Error::WalletMismatch(_)));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_mismatched_local_secret_dropped() {
        let (mut local, _) = identity();
        let mut device = sample_device("a", DeviceStatus::Active, 10);
        device.private_key = sample_device("z", DeviceStatus::Active, 10).private_key;
        local.devices.put(device);

        let merged = merge(&local, &local.public_snapshot()).unwrap();
        assert!(!merged.devices().get("a").unwrap().has_private_key());
    }

    #[test]
    fn test_terminal_never_resurrected() {
        let (mut local, _) = identity();
        let mut remote = local.public_snapshot();

        local.devices.insert(sample_device("a", DeviceStatus::Revoked, 10)).unwrap();
        remote.devices.insert(sample_device("a", DeviceStatus::Active, 99)).unwrap();

        let merged = merge(&local, &remote).unwrap();
        assert_eq!(merged.devices().get("a").unwrap().status, DeviceStatus::Revoked);

        let merged = merge(&remote, &local).unwrap();
        let device = merged.devices().get("a").unwrap();
        assert_eq!(device.status, DeviceStatus::Revoked);
        assert!(!device.has_private_key());
    }

    #[test]
    fn test_tie_breaks_on_rank() {
        let (mut local, _) = identity();
        let mut remote = local.public_snapshot();

        local.devices.insert(sample_device("a", DeviceStatus::Lost, 10)).unwrap();
        remote.devices.insert(sample_device("a", DeviceStatus::Compromised, 10)).unwrap();

        let merged = merge(&local, &remote).unwrap();
        assert_eq!(merged.devices().get("a").unwrap().status, DeviceStatus::Compromised);
    }

    #[test]
    fn test_device_merge_commutative() {
        let (mut left, _) = identity();
        let mut right = left.public_snapshot();

        left.devices.insert(sample_device("a", DeviceStatus::Active, 5)).unwrap();
        left.devices.insert(sample_device("b", DeviceStatus::Active, 30)).unwrap();
        left.devices.insert(sample_device("c", DeviceStatus::Lost, 7)).unwrap();
        right.devices.insert(sample_device("a", DeviceStatus::Revoked, 4)).unwrap();
        right.devices.insert(sample_device("b", DeviceStatus::Active, 31)).unwrap();
        right.devices.insert(sample_device("d", DeviceStatus::Active, 1)).unwrap();

        let lr = merge(&left, &right).unwrap();
        let rl = merge(&right, &left).unwrap();
        assert_eq!(device_ids(&lr), device_ids(&rl));
    }

    #[test]
    fn test_merge_idempotent() {
        let (wallet, _) = identity();
        let (merged, report) = merge_with_report(&wallet, &wallet).unwrap();
        assert!(report.is_noop());
        assert_eq!(device_ids(&merged), device_ids(&wallet));
    }

    #[test]
    fn test_revocation_propagates() {
        let (mut wallet, master) = identity();
        let session = generate_pairing_request("Laptop", DeviceType::Desktop).unwrap();
        let laptop = PairingProtocol::default()
            .authorize_device(&mut wallet, &session.qr_payload, &master)
            .unwrap();

        let laptop_copy = wallet.sanitized_for(&laptop.id);
        assert!(revoke_device(&mut wallet, &laptop.id, &master, RevocationReason::Compromised));

        let (merged, report) = merge_with_report(&laptop_copy, &wallet.public_snapshot()).unwrap();
        let device = merged.devices().get(&laptop.id).unwrap();
        assert_eq!(device.status, DeviceStatus::Compromised);
        assert!(!device.has_private_key());
        assert_eq!(report.retired, vec![laptop.id.clone()]);
    }

    #[test]
    fn test_profile_lww_with_skewed_clock() {
        let (mut a, id_a) = identity();
        let mut b = a.clone();
        b.devices.insert(sample_device("b", DeviceStatus::Active, 1)).unwrap();

        // A edits with a clock far ahead
        let stamp = a.clock.tick_at(&id_a, i64::MAX / 2);
        let mut profile = a.profile().clone();
        profile.apply_update(ProfileUpdate::DisplayName("From A".into())).unwrap();
        a.profile.set(profile, stamp);

        // B sees A's edit, then edits with its own (slower) clock
        b = merge(&b, &a).unwrap();
        assert_eq!(b.profile().display_name, "From A");
        b.update_profile("b", ProfileUpdate::DisplayName("From B".into())).unwrap();

        let merged = merge(&a, &b).unwrap();
        assert_eq!(merged.profile().display_name, "From B");
        let merged = merge(&b, &a).unwrap();
        assert_eq!(merged.profile().display_name, "From B");
    }

    #[test]
    fn test_policy_register_merges() {
        let (mut a, master) = identity();
        let b = a.clone();

        let policy = SecurityPolicy {
            max_devices: 3,
            ..SecurityPolicy::default()
        };
        a.update_security_policy(&master, policy).unwrap();

        let (merged, report) = merge_with_report(&b, &a).unwrap();
        assert!(report.policy_changed);
        assert_eq!(merged.security_policy().max_devices, 3);
        assert!(merged.clock().wall_ms() >= a.clock().wall_ms());
    }

    #[test]
    fn test_over_capacity_flagged() {
        let (mut local, master) = identity();
        let tight = SecurityPolicy {
            max_devices: 2,
            ..SecurityPolicy::default()
        };
        local.update_security_policy(&master, tight).unwrap();

        let mut remote = local.public_snapshot();
        local.devices.insert(sample_device("a", DeviceStatus::Active, 1)).unwrap();
        remote.devices.insert(sample_device("b", DeviceStatus::Active, 1)).unwrap();

        let (merged, report) = merge_with_report(&local, &remote).unwrap();
        assert!(report.over_capacity);
        assert_eq!(merged.devices().active_count(), 3);
    }

    #[test]
    fn test_local_mnemonic_kept() {
        let (local, _) = identity();
        let remote = local.public_snapshot();
        let merged = merge(&local, &remote).unwrap();
        assert!(merged.mnemonic().is_some());

        let merged = merge(&remote, &local).unwrap();
        assert!(merged.mnemonic().is_none());
    }
}
