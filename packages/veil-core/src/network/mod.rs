//! # Network Module
//!
//! The seams between the core and the platform: a broadcast transport for
//! device announcements and an oracle that supplies storage auth keys.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EXTERNAL CAPABILITIES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Transport (async)                                                      │
//! │    announce(topic, payload)        gossip, relay, loopback …            │
//! │    subscribe(topic, handler)                                            │
//! │                                                                         │
//! │  AuthKeyOracle                                                          │
//! │    derive_auth_key(biometric_hash, device_id) → AuthKey                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Device Announcements
//!
//! After a device is authorized or revoked, the acting device publishes the
//! public record of the affected device, signed with its own device key:
//!
//! ```text
//! topic:   veil/<address>/devices
//! payload: Signed<DeviceAnnouncement> as JSON
//! ```
//!
//! Receivers check the signature and that the signer is an active device of
//! the same wallet allowed to manage devices, then fold the record in with
//! [`crate::sync::merge`]-style rules via [`apply_announcement`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::crypto::Signed;
use crate::devices::{Device, Permission};
use crate::error::{Error, Result};
use crate::identity::Did;
use crate::storage::AuthKey;
use crate::wallet::Wallet;

/// Capacity of each loopback topic channel
const TOPIC_CHANNEL_CAPACITY: usize = 256;

/// Callback invoked for every payload on a subscribed topic
pub type TopicHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Broadcast capability provided by the host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` to everyone subscribed to `topic`
    async fn announce(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Call `handler` for every later payload on `topic`
    async fn subscribe(&self, topic: &str, handler: TopicHandler) -> Result<()>;
}

/// Supplies the secret that unlocks a device's storage
///
/// Typically backed by the platform keystore behind a biometric prompt.
pub trait AuthKeyOracle: Send + Sync {
    /// Derive the auth key for `device_id` from a biometric hash
    fn derive_auth_key(&self, biometric_hash: &[u8], device_id: &str) -> Result<AuthKey>;
}

// ============================================================================
// LOOPBACK TRANSPORT
// ============================================================================

#[derive(Default)]
struct Topic {
    handlers: Vec<TopicHandler>,
    sender: Option<broadcast::Sender<Vec<u8>>>,
}

/// In-process transport; every subscriber sees every announcement
#[derive(Default, Clone)]
pub struct LoopbackTransport {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
    history: Arc<RwLock<Vec<(String, Vec<u8>)>>>,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("topics", &self.topics.read().len())
            .field("announced", &self.history.read().len())
            .finish()
    }
}

impl LoopbackTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive later payloads on `topic` as a channel
    pub fn watch(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut topics = self.topics.write();
        let entry = topics.entry(topic.to_string()).or_default();
        entry
            .sender
            .get_or_insert_with(|| broadcast::channel(TOPIC_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Everything announced so far, in order
    pub fn history(&self) -> Vec<(String, Vec<u8>)> {
        self.history.read().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn announce(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.history.write().push((topic.to_string(), payload.clone()));

        // Handlers run outside the lock so they may announce in turn
        let (handlers, sender) = match self.topics.read().get(topic) {
            Some(t) => (t.handlers.clone(), t.sender.clone()),
            None => (Vec::new(), None),
        };

        for handler in &handlers {
            handler(&payload);
        }

        if let Some(sender) = sender {
            // No live receivers is not an error for a broadcast
            let _ = sender.send(payload);
        }

        tracing::debug!("Announced on {} to {} handlers", topic, handlers.len());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: TopicHandler) -> Result<()> {
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .handlers
            .push(handler);
        Ok(())
    }
}

// ============================================================================
// DEVICE ANNOUNCEMENTS
// ============================================================================

/// What happened to the announced device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEvent {
    /// The device was added to the wallet
    Authorized,
    /// The device reached a terminal state
    Revoked,
}

/// Public record of a device change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAnnouncement {
    /// Wallet the device belongs to
    pub address: Did,
    /// Kind of change
    pub event: DeviceEvent,
    /// Public projection of the device record
    pub device: Device,
    /// Id of the device that made the change and signed the announcement
    pub announced_by: String,
    /// Announcement time (ms)
    pub announced_at: i64,
}

/// Topic carrying device announcements for `address`
pub fn device_topic(address: &Did) -> String {
    format!("veil/{}/devices", address)
}

/// Publish the current record of `device_id`, signed by `announcer_id`
///
/// The announcer must be an active device with `manage_devices` whose secret
/// this copy of the wallet holds.
pub async fn announce_device_change(
    transport: &dyn Transport,
    wallet: &Wallet,
    device_id: &str,
    announcer_id: &str,
    event: DeviceEvent,
) -> Result<DeviceAnnouncement> {
    let device = wallet
        .devices()
        .get(device_id)
        .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;

    let announcer = wallet
        .devices()
        .require_capable(announcer_id, Permission::ManageDevices)?;
    let secret = announcer.private_key.as_ref().ok_or_else(|| {
        Error::Unauthorized(format!("no signing key for {} on this copy", announcer_id))
    })?;
    let keypair = secret.keypair()?;

    let announcement = DeviceAnnouncement {
        address: wallet.address().clone(),
        event,
        device: device.public_projection(),
        announced_by: announcer_id.to_string(),
        announced_at: crate::time::now_timestamp_millis(),
    };

    let signed = Signed::new(announcement.clone(), &keypair.signing)?;
    let payload = serde_json::to_vec(&signed)?;

    transport
        .announce(&device_topic(wallet.address()), payload)
        .await
        .map_err(|e| match e {
            Error::TransportError(_) => e,
            other => Error::TransportError(other.to_string()),
        })?;

    tracing::info!(
        "Announced {:?} of {} (signed by {})",
        event,
        device_id,
        announcer_id
    );
    Ok(announcement)
}

/// Parse and authenticate an announcement for `wallet`
///
/// The signer must be the device named in `announced_by`, and that device
/// must be active in this copy of the wallet and hold `manage_devices`. A
/// key kept from before a revocation is therefore useless.
pub fn verify_announcement(wallet: &Wallet, payload: &[u8]) -> Result<DeviceAnnouncement> {
    let signed: Signed<DeviceAnnouncement> = serde_json::from_slice(payload)
        .map_err(|e| Error::DeserializationError(format!("announcement: {}", e)))?;
    let announcement = signed.verify()?;

    if &announcement.address != wallet.address() {
        return Err(Error::WalletMismatch(format!(
            "announcement for {}",
            announcement.address
        )));
    }

    let signer = wallet
        .devices()
        .require_capable(&announcement.announced_by, Permission::ManageDevices)?;

    if signer.public_key.signing != signed.signer_public_key {
        return Err(Error::VerificationFailed);
    }

    Ok(announcement.clone())
}

/// Fold an authenticated announcement into `wallet`
///
/// Returns `true` if the wallet changed. The record is merged with the same
/// rules as a full wallet merge, so a stale announcement is a no-op.
pub fn apply_announcement(wallet: &mut Wallet, payload: &[u8]) -> Result<bool> {
    let announcement = verify_announcement(wallet, payload)?;

    let mut remote = wallet.public_snapshot();
    remote.devices.put(announcement.device);

    let (merged, report) = crate::sync::merge_with_report(wallet, &remote)?;
    let changed = !report.is_noop();
    *wallet = merged;
    Ok(changed)
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
    use crate::identity::create_new_identity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedOracle;

    impl AuthKeyOracle for FixedOracle {
        fn derive_auth_key(&self, biometric_hash: &[u8], device_id: &str) -> Result<AuthKey> {
            let mut key = biometric_hash.to_vec();
            key.extend_from_slice(device_id.as_bytes());
            Ok(AuthKey::new(key))
        }
    }

    fn paired() -> (Wallet, String, String) {
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
    fn test_loopback_delivers_to_handlers() {
        let transport = LoopbackTransport::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        tokio_test::block_on(transport.subscribe(
            "t",
            Arc::new(move |payload: &[u8]| {
                assert_eq!(payload, b"hello");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ))
        .unwrap();

        tokio_test::block_on(transport.announce("t", b"hello".to_vec())).unwrap();
        tokio_test::block_on(transport.announce("other", b"ignored".to_vec())).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(transport.history().len(), 2);
    }

    #[test]
    fn test_loopback_watch() {
        let transport = LoopbackTransport::new();
        let mut rx = transport.watch("t");

        tokio_test::block_on(transport.announce("t", b"one".to_vec())).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"one".to_vec());
    }

    #[test]
    fn test_announcement_round_trip() {
        let (wallet, master, laptop) = paired();
        let transport = LoopbackTransport::new();
        let mut rx = transport.watch(&device_topic(wallet.address()));

        let sent = tokio_test::block_on(announce_device_change(
            &transport,
            &wallet,
            &laptop,
            &master,
            DeviceEvent::Authorized,
        ))
        .unwrap();
        assert!(!sent.device.has_private_key());

        let payload = rx.try_recv().unwrap();
        let received = verify_announcement(&wallet, &payload).unwrap();
        assert_eq!(received.device.id, laptop);
        assert_eq!(received.event, DeviceEvent::Authorized);
    }

    #[test]
    fn test_forged_announcement_rejected() {
        let (wallet, master, laptop) = paired();
        let transport = LoopbackTransport::new();

        tokio_test::block_on(announce_device_change(
            &transport,
            &wallet,
            &laptop,
            &master,
            DeviceEvent::Authorized,
        ))
        .unwrap();
        let (_, payload) = transport.history().pop().unwrap();

        // Claim another signer
        let mut value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        value["data"]["announcedBy"] = serde_json::Value::String(laptop.clone());
        let forged = serde_json::to_vec(&value).unwrap();
        assert!(verify_announcement(&wallet, &forged).is_err());

        // Another wallet cannot accept it
        let other = create_new_identity().unwrap().wallet;
        assert!(verify_announcement(&other, &payload).is_err());
    }

    #[test]
    fn test_revocation_announcement_applied() {
        let (mut wallet, master, laptop) = paired();
        let mut laptop_copy = wallet.sanitized_for(&laptop);
        let transport = LoopbackTransport::new();

        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Lost));
        tokio_test::block_on(announce_device_change(
            &transport,
            &wallet,
            &laptop,
            &master,
            DeviceEvent::Revoked,
        ))
        .unwrap();

        let (_, payload) = transport.history().pop().unwrap();
        assert!(apply_announcement(&mut laptop_copy, &payload).unwrap());

        let device = laptop_copy.devices().get(&laptop).unwrap();
        assert_eq!(device.status, DeviceStatus::Lost);
        assert!(!device.has_private_key());

        // Replaying it changes nothing
        assert!(!apply_announcement(&mut laptop_copy, &payload).unwrap());
    }

    #[test]
    fn test_revoked_signer_rejected() {
        let (mut wallet, master, laptop) = paired();
        let stolen = wallet
            .devices()
            .get(&laptop)
            .and_then(|d| d.private_key.clone())
            .unwrap()
            .keypair()
            .unwrap();
        assert!(revoke_device(&mut wallet, &laptop, &master, RevocationReason::Compromised));

        let address = wallet.address().clone();
        let sign = |device: Device, event: DeviceEvent| {
            let announcement = DeviceAnnouncement {
                address: address.clone(),
                event,
                device,
                announced_by: laptop.clone(),
                announced_at: crate::time::now_timestamp_millis(),
            };
            serde_json::to_vec(&Signed::new(announcement, &stolen.signing).unwrap()).unwrap()
        };

        // Adding a device of its own choosing
        let rogue = sample_device("rogue", DeviceStatus::Active, i64::MAX / 2).public_projection();
        let err = apply_announcement(&mut wallet, &sign(rogue, DeviceEvent::Authorized)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(wallet.devices().get("rogue").is_none());

        // Retiring a healthy device
        let mut victim = wallet.devices().get(&master).unwrap().public_projection();
        victim.status = DeviceStatus::Compromised;
        victim.last_active = i64::MAX / 2;
        let err = apply_announcement(&mut wallet, &sign(victim, DeviceEvent::Revoked)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(wallet.devices().get(&master).unwrap().is_active());
    }

    #[test]
    fn test_signer_needs_manage_devices() {
        let (mut wallet, master, laptop) = paired();
        wallet
            .devices
            .get_mut(&laptop)
            .unwrap()
            .permissions
            .remove(&Permission::ManageDevices);

        let err = tokio_test::block_on(announce_device_change(
            &LoopbackTransport::new(),
            &wallet,
            &master,
            &laptop,
            DeviceEvent::Authorized,
        ))
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authorization);
    }

    #[test]
    fn test_announcer_needs_key() {
        let (wallet, master, laptop) = paired();
        let master_copy = wallet.public_snapshot();
        let transport = LoopbackTransport::new();

        let err = tokio_test::block_on(announce_device_change(
            &transport,
            &master_copy,
            &laptop,
            &master,
            DeviceEvent::Authorized,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_oracle_seam() {
        let oracle: &dyn AuthKeyOracle = &FixedOracle;
        let a = oracle.derive_auth_key(b"hash", "d1").unwrap();
        let b = oracle.derive_auth_key(b"hash", "d2").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
