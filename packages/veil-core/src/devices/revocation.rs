//! # Device Revocation
//!
//! Moves an active device to one of the terminal states and destroys the
//! key material this copy of the wallet holds for it.
//!
//! Revocation is a no-op, not an error, when its preconditions fail; callers
//! get `false` back and a warning is logged. The record itself stays in the
//! registry so that a later merge can never bring the device back.
//!
//! ## Last Device
//!
//! A device may revoke itself only when it is the last active device of the
//! wallet. After that, only the recovery phrase can bring the identity back
//! (see [`crate::identity::restore_identity`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::devices::DeviceStatus;
use crate::error::{Error, Result};
use crate::wallet::Wallet;

/// Why a device is being retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationReason {
    /// Retired by the user
    Revoked,
    /// Reported lost
    Lost,
    /// Reported compromised
    Compromised,
}

impl RevocationReason {
    /// The terminal status this reason leads to
    pub fn status(&self) -> DeviceStatus {
        match self {
            RevocationReason::Revoked => DeviceStatus::Revoked,
            RevocationReason::Lost => DeviceStatus::Lost,
            RevocationReason::Compromised => DeviceStatus::Compromised,
        }
    }
}

impl From<RevocationReason> for DeviceStatus {
    fn from(reason: RevocationReason) -> Self {
        reason.status()
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "revoked" => Ok(RevocationReason::Revoked),
            "lost" => Ok(RevocationReason::Lost),
            "compromised" => Ok(RevocationReason::Compromised),
            other => Err(Error::InvalidRevocationReason(other.to_string())),
        }
    }
}

/// Retire `target_id`, acting as `revoker_id`
///
/// Returns `true` if the device changed state.
pub fn revoke_device(
    wallet: &mut Wallet,
    target_id: &str,
    revoker_id: &str,
    reason: RevocationReason,
) -> bool {
    revoke_device_at(
        wallet,
        target_id,
        revoker_id,
        reason,
        crate::time::now_timestamp_millis(),
    )
}

/// [`revoke_device`] with an explicit clock reading
pub fn revoke_device_at(
    wallet: &mut Wallet,
    target_id: &str,
    revoker_id: &str,
    reason: RevocationReason,
    now_ms: i64,
) -> bool {
    if let Err(rejection) = check_preconditions(wallet, target_id, revoker_id) {
        tracing::warn!(
            "Revocation of {} by {} rejected: {}",
            target_id,
            revoker_id,
            rejection
        );
        return false;
    }

    let Some(target) = wallet.devices.get_mut(target_id) else {
        return false;
    };

    target.status = reason.status();
    if let Some(mut secret) = target.private_key.take() {
        secret.zeroize();
    }
    // The status change must win a last-write-wins merge against any
    // copy that still shows the device active.
    target.last_active = now_ms.max(target.last_active.saturating_add(1));

    if target_id != revoker_id {
        if let Err(e) = wallet.devices.touch_at(revoker_id, now_ms) {
            tracing::warn!("Could not refresh revoker {}: {}", revoker_id, e);
        }
    }

    tracing::info!("Device {} is now {} (by {})", target_id, reason, revoker_id);
    true
}

fn check_preconditions(wallet: &Wallet, target_id: &str, revoker_id: &str) -> Result<()> {
    let revoker = wallet
        .devices
        .get(revoker_id)
        .ok_or_else(|| Error::DeviceNotFound(revoker_id.to_string()))?;
    let target = wallet
        .devices
        .get(target_id)
        .ok_or_else(|| Error::DeviceNotFound(target_id.to_string()))?;

    if !revoker.is_active() {
        return Err(Error::Unauthorized(format!(
            "revoker {} is {}",
            revoker_id, revoker.status
        )));
    }

    if !target.status.can_transition_to(DeviceStatus::Revoked) {
        return Err(Error::Unauthorized(format!(
            "target {} is already {}",
            target_id, target.status
        )));
    }

    if target_id == revoker_id && wallet.devices.active_count() > 1 {
        return Err(Error::Unauthorized(
            "a device may only revoke itself when it is the last active device".into(),
        ));
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pairing::{generate_pairing_request, PairingProtocol};
    use crate::devices::DeviceType;
    use crate::error::ErrorKind;
    use crate::identity::create_new_identity;

    fn two_devices() -> (Wallet, String, String) {
        let identity = create_new_identity().unwrap();
        let mut wallet = identity.wallet;
        let master = identity.master_device.id;

        let session = generate_pairing_request("Laptop", DeviceType::Desktop).unwrap();
        let laptop = PairingProtocol::default()
            .authorize_device(&mut wallet, &session.qr_payload, &master)
            .unwrap();

        (wallet, master, laptop.id)
    }

    #[test]
    fn test_revoke_compromised() {
        let (mut wallet, master, laptop) = two_devices();
        let before = wallet.devices().get(&laptop).unwrap().last_active;

        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Compromised));

        let device = wallet.devices().get(&laptop).unwrap();
        assert_eq!(device.status, DeviceStatus::Compromised);
        assert!(!device.has_private_key());
        assert!(device.last_active > before);
        assert_eq!(wallet.devices().active_count(), 1);

        // Still present for audit
        assert_eq!(wallet.devices().len(), 2);
    }

    #[test]
    fn test_revoked_device_cannot_authorize() {
        let (mut wallet, master, laptop) = two_devices();
        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Compromised));

        let session = generate_pairing_request("Tablet", DeviceType::Mobile).unwrap();
        let err = PairingProtocol::default()
            .authorize_device(&mut wallet, &session.qr_payload, &laptop)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let (mut wallet, master, laptop) = two_devices();
        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Lost));
        assert!(!revoke_device(&mut wallet, &laptop, &master, RevocationReason::Compromised));
        assert_eq!(wallet.devices().get(&laptop).unwrap().status, DeviceStatus::Lost);
    }

    #[test]
    fn test_inactive_revoker_is_noop() {
        let (mut wallet, master, laptop) = two_devices();
        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Revoked));

        assert!(!revoke_device(&mut wallet, &master, &laptop, RevocationReason::Revoked));
        assert!(wallet.devices().get(&master).unwrap().is_active());
    }

    #[test]
    fn test_unknown_devices_are_noop() {
        let (mut wallet, master, _) = two_devices();
        assert!(!revoke_device(&mut wallet, "missing", &master, RevocationReason::Lost));
        assert!(!revoke_device(&mut wallet, &master, "missing", RevocationReason::Lost));
        assert_eq!(wallet.devices().active_count(), 2);
    }

    #[test]
    fn test_self_revocation_only_when_last() {
        let (mut wallet, master, laptop) = two_devices();

        assert!(!revoke_device(&mut wallet, &laptop, &laptop, RevocationReason::Revoked));
        assert!(wallet.devices().get(&laptop).unwrap().is_active());

        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Revoked));
        assert!(revoke_device(&mut wallet, &master, &master, RevocationReason::Revoked));
        assert_eq!(wallet.devices().active_count(), 0);
    }

    #[test]
    fn test_last_active_advances_with_skewed_clock() {
        let (mut wallet, master, laptop) = two_devices();
        let before = wallet.devices().get(&laptop).unwrap().last_active;

        assert!(revoke_device_at(&mut wallet, &laptop, &master, RevocationReason::Revoked, 0));
        assert_eq!(wallet.devices().get(&laptop).unwrap().last_active, before + 1);
    }

    #[test]
    fn test_revoker_activity_refreshed() {
        let (mut wallet, master, laptop) = two_devices();
        let later = wallet.devices().get(&master).unwrap().last_active + 60_000;

        assert!(revoke_device_at(&mut wallet, &laptop, &master, RevocationReason::Lost, later));
        assert_eq!(wallet.devices().get(&master).unwrap().last_active, later);
    }

    #[test]
    fn test_reason_parse() {
        assert_eq!(
            "compromised".parse::<RevocationReason>().unwrap(),
            RevocationReason::Compromised
        );
        assert!("active".parse::<RevocationReason>().is_err());
        assert_eq!(DeviceStatus::from(RevocationReason::Lost), DeviceStatus::Lost);
    }
}
