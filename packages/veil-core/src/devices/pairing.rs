//! # Device Pairing
//!
//! Adding a device to a wallet is a three-step, single-use handshake.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PAIRING FLOW                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  NEW DEVICE                               AUTHORIZING DEVICE            │
//! │  ──────────                               ──────────────────            │
//! │  generate_pairing_request()                                             │
//! │   • fresh device id (UUID v4)                                           │
//! │   • 32-byte challenge                                                   │
//! │   • ephemeral X25519 keypair                                            │
//! │   • 6-digit pairing code                                                │
//! │   • expires_at = now + 5 min                                            │
//! │                                                                         │
//! │        ─────── QR: QrPayload (public parts only) ──────►                │
//! │                                                                         │
//! │                                           authorize_device()            │
//! │                                            1. payload shape             │
//! │                                            2. authorizer active +       │
//! │                                               manage_devices            │
//! │                                            3. device cap                │
//! │                                            4. id not yet present        │
//! │                                            5. ledger: consume once      │
//! │                                            6. derive key from mnemonic  │
//! │                                            7. insert active device      │
//! │                                                                         │
//! │                                           seal_grant()                  │
//! │        ◄────── DeviceGrant (sealed device secret) ─────                 │
//! │                                                                         │
//! │  open_grant()                                                           │
//! │   • X25519(ephemeral, authorizer eph) → HKDF(salt = challenge)          │
//! │   • AES-256-GCM, AAD = device id                                        │
//! │   • check pairing code and master key                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Use
//!
//! [`PairingLedger`] records one terminal status per request (keyed by its
//! challenge) under a mutex. The expiry check and the status write happen in
//! the same critical section, so when several authorizers race on the same
//! payload exactly one of them succeeds. An attempt made after expiry also
//! burns the request.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::crypto::{hd, EncryptionKeyPair, PublicKey};
use crate::devices::{Device, DeviceDescriptor, DeviceType, Permission};
use crate::error::{Error, Result};
use crate::identity::Did;
use crate::wallet::Wallet;

/// Value of [`QrPayload::payload_type`]
pub const PAIRING_TYPE: &str = "device_pairing";

/// Current pairing payload version
pub const PAIRING_VERSION: u32 = 1;

/// Default lifetime of a pairing request (5 minutes)
pub const DEFAULT_PAIRING_TTL_MS: i64 = 5 * 60 * 1000;

/// Size of the pairing challenge in bytes
pub const CHALLENGE_SIZE: usize = 32;

/// Number of digits in a pairing code
pub const PAIRING_CODE_DIGITS: usize = 6;

const MAX_DEVICE_NAME_LENGTH: usize = 64;

// ============================================================================
// QR PAYLOAD
// ============================================================================

/// The public half of a pairing request, meant to be QR-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    /// Always `"device_pairing"`
    #[serde(rename = "type")]
    pub payload_type: String,
    /// Payload format version
    pub version: u32,
    /// Id the new device will have
    pub device_id: String,
    /// Name the user gave the new device
    pub device_name: String,
    /// Kind of the new device
    pub device_type: DeviceType,
    /// 32-byte challenge, hex
    pub challenge: String,
    /// Ephemeral X25519 public key of the new device, base64
    pub public_key: String,
    /// 6-digit code shown on the new device
    pub pairing_code: String,
    /// Expiry, epoch milliseconds
    pub expires_at: i64,
}

/// Decoded binary fields of a well-formed payload
struct PayloadKeys {
    challenge: [u8; CHALLENGE_SIZE],
    public_key: [u8; 32],
}

impl QrPayload {
    /// Encode as the JSON string placed in the QR code
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a scanned QR string
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::InvalidPairingRequest(format!("Malformed payload: {}", e)))
    }

    /// `true` once `now_ms` has reached the expiry
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Descriptor of the device being paired
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(self.device_name.clone(), self.device_type)
    }

    /// Check every field except expiry
    pub fn validate(&self) -> Result<()> {
        self.decode_keys().map(|_| ())
    }

    fn decode_keys(&self) -> Result<PayloadKeys> {
        let invalid = |msg: String| Err(Error::InvalidPairingRequest(msg));

        if self.payload_type != PAIRING_TYPE {
            return invalid(format!("Unexpected payload type '{}'", self.payload_type));
        }

        if self.version != PAIRING_VERSION {
            return invalid(format!("Unsupported pairing version {}", self.version));
        }

        if uuid::Uuid::parse_str(&self.device_id).is_err() {
            return invalid(format!("Device id '{}' is not a UUID", self.device_id));
        }

        if self.device_name.trim().is_empty() || self.device_name.len() > MAX_DEVICE_NAME_LENGTH {
            return invalid("Device name must be 1-64 bytes".into());
        }

        if self.pairing_code.len() != PAIRING_CODE_DIGITS
            || !self.pairing_code.bytes().all(|b| b.is_ascii_digit())
        {
            return invalid("Pairing code must be 6 digits".into());
        }

        let challenge: [u8; CHALLENGE_SIZE] = hex::decode(&self.challenge)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::InvalidPairingRequest("Challenge must be 32 bytes of hex".into()))?;

        let public_key: [u8; 32] = BASE64
            .decode(&self.public_key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                Error::InvalidPairingRequest("Public key must be 32 bytes of base64".into())
            })?;

        Ok(PayloadKeys {
            challenge,
            public_key,
        })
    }
}

// ============================================================================
// NEW DEVICE SIDE
// ============================================================================

/// Secrets the new device keeps while a request is outstanding
pub struct PrivateChallenge {
    challenge: [u8; CHALLENGE_SIZE],
    ephemeral: EncryptionKeyPair,
}

impl std::fmt::Debug for PrivateChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateChallenge([REDACTED])")
    }
}

/// A pending pairing request held by the new device
#[derive(Debug)]
pub struct PairingSession {
    /// Id the new device will have
    pub device_id: String,
    /// What to show as a QR code
    pub qr_payload: QrPayload,
    /// What never leaves the new device
    pub private_challenge: PrivateChallenge,
}

/// Everything a new device learns from a grant
#[derive(Debug, Clone)]
pub struct DeviceCredentials {
    /// Address of the wallet joined
    pub address: Did,
    /// Master public key of the wallet joined
    pub master_public_key: PublicKey,
    /// The new device's own record, private key included
    pub device: Device,
}

impl DeviceCredentials {
    /// Build this device's wallet copy from a snapshot sent by a peer
    ///
    /// The snapshot must be the same wallet and must already list this
    /// device; the private key from the grant is attached to it.
    pub fn into_wallet(self, mut snapshot: Wallet) -> Result<Wallet> {
        if snapshot.address() != &self.address
            || snapshot.master_public_key() != &self.master_public_key
        {
            return Err(Error::WalletMismatch(
                "snapshot belongs to another identity".into(),
            ));
        }

        let record = snapshot
            .devices
            .get_mut(&self.device.id)
            .ok_or_else(|| Error::DeviceNotFound(self.device.id.clone()))?;

        if record.public_key != self.device.public_key {
            return Err(Error::WalletMismatch(format!(
                "snapshot lists a different key for {}",
                self.device.id
            )));
        }

        if record.is_active() {
            record.private_key = self.device.private_key.clone();
        }

        snapshot.mnemonic = None;
        Ok(snapshot)
    }
}

/// The sealed secret hand-off from authorizer to new device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGrant {
    /// Device the grant is for
    pub device_id: String,
    /// Authorizer's ephemeral X25519 public key, base64
    pub authorizer_public_key: String,
    /// nonce ‖ ciphertext ‖ tag, base64
    pub sealed: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantContents {
    pairing_code: String,
    address: Did,
    master_public_key: PublicKey,
    device: Device,
}

impl PairingSession {
    /// Decrypt a grant and check it answers this request
    pub fn open_grant(&self, grant: &DeviceGrant) -> Result<DeviceCredentials> {
        if grant.device_id != self.device_id {
            return Err(Error::InvalidPairingRequest(format!(
                "Grant is for {}, not {}",
                grant.device_id, self.device_id
            )));
        }

        let authorizer_public: [u8; 32] = BASE64
            .decode(&grant.authorizer_public_key)?
            .try_into()
            .map_err(|_| Error::InvalidKey("Authorizer key must be 32 bytes".into()))?;
        let sealed = BASE64.decode(&grant.sealed)?;

        let plaintext = crate::crypto::decrypt_from_sender(
            &self.private_challenge.ephemeral,
            &authorizer_public,
            &self.private_challenge.challenge,
            &sealed,
            self.device_id.as_bytes(),
        )?;

        let contents: GrantContents = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::DeserializationError(format!("Grant contents: {}", e)))?;

        if contents.pairing_code != self.qr_payload.pairing_code {
            return Err(Error::PairingCodeMismatch);
        }

        if !contents.address.matches_key(&contents.master_public_key.signing) {
            return Err(Error::WalletMismatch(
                "grant address does not match its master key".into(),
            ));
        }

        let device = contents.device;
        if device.id != self.device_id {
            return Err(Error::InvalidPairingRequest("Grant carries another device".into()));
        }

        let secret = device
            .private_key
            .as_ref()
            .ok_or_else(|| Error::InvalidPairingRequest("Grant carries no device key".into()))?;
        if secret.keypair()?.public_keys() != device.public_key {
            return Err(Error::VerificationFailed);
        }

        tracing::info!("Opened pairing grant for {}", device.id);

        Ok(DeviceCredentials {
            address: contents.address,
            master_public_key: contents.master_public_key,
            device,
        })
    }
}

/// Start pairing this device with the default lifetime
pub fn generate_pairing_request(name: &str, device_type: DeviceType) -> Result<PairingSession> {
    generate_pairing_request_at(
        &DeviceDescriptor::new(name, device_type),
        DEFAULT_PAIRING_TTL_MS,
        crate::time::now_timestamp_millis(),
    )
}

/// Start pairing with an explicit lifetime and clock reading
pub fn generate_pairing_request_at(
    descriptor: &DeviceDescriptor,
    ttl_ms: i64,
    now_ms: i64,
) -> Result<PairingSession> {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut challenge);

    let ephemeral = EncryptionKeyPair::generate();
    let pairing_code = format!("{:06}", rand::rngs::OsRng.gen_range(0..1_000_000u32));
    let device_id = uuid::Uuid::new_v4().to_string();

    let qr_payload = QrPayload {
        payload_type: PAIRING_TYPE.to_string(),
        version: PAIRING_VERSION,
        device_id: device_id.clone(),
        device_name: descriptor.name.clone(),
        device_type: descriptor.device_type,
        challenge: hex::encode(challenge),
        public_key: BASE64.encode(ephemeral.public_bytes()),
        pairing_code,
        expires_at: now_ms.saturating_add(ttl_ms),
    };
    qr_payload.validate()?;

    tracing::info!("Generated pairing request for new device {}", device_id);

    Ok(PairingSession {
        device_id,
        qr_payload,
        private_challenge: PrivateChallenge {
            challenge,
            ephemeral,
        },
    })
}

// ============================================================================
// LEDGER
// ============================================================================

/// Terminal status of a pairing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Used by a successful authorization
    Consumed,
    /// Burned by an attempt after expiry
    Invalidated,
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    status: RequestStatus,
    expires_at: i64,
}

/// Process-wide record of spent pairing requests
#[derive(Debug, Default)]
pub struct PairingLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl PairingLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically spend a request
    ///
    /// ## Errors
    ///
    /// - `RequestAlreadyConsumed` if the request was consumed or invalidated
    /// - `PairingExpired` if `now_ms >= expires_at`; the request is burned
    pub fn consume(&self, payload: &QrPayload, now_ms: i64) -> Result<()> {
        let mut entries = self.entries.lock();

        if entries.contains_key(&payload.challenge) {
            return Err(Error::RequestAlreadyConsumed(payload.device_id.clone()));
        }

        let (status, outcome) = if payload.is_expired_at(now_ms) {
            (RequestStatus::Invalidated, Err(Error::PairingExpired))
        } else {
            (RequestStatus::Consumed, Ok(()))
        };

        entries.insert(
            payload.challenge.clone(),
            LedgerEntry {
                status,
                expires_at: payload.expires_at,
            },
        );
        tracing::debug!("Pairing request for {} is now {:?}", payload.device_id, status);

        outcome
    }

    /// Status of a request, if it has been spent
    pub fn status(&self, payload: &QrPayload) -> Option<RequestStatus> {
        self.entries.lock().get(&payload.challenge).map(|e| e.status)
    }

    /// Forget requests that expired before `now_ms`
    ///
    /// A replay of a forgotten request fails its expiry check anyway.
    pub fn prune_expired(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now_ms);
        before - entries.len()
    }

    /// Number of spent requests remembered
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// `true` if nothing has been spent
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ============================================================================
// AUTHORIZING DEVICE SIDE
// ============================================================================

/// Authorizes devices against a shared ledger
#[derive(Debug, Clone)]
pub struct PairingProtocol {
    ledger: Arc<PairingLedger>,
    ttl_ms: i64,
}

impl Default for PairingProtocol {
    fn default() -> Self {
        Self::new(Arc::new(PairingLedger::new()))
    }
}

impl PairingProtocol {
    /// Create a protocol instance over `ledger`
    pub fn new(ledger: Arc<PairingLedger>) -> Self {
        Self {
            ledger,
            ttl_ms: DEFAULT_PAIRING_TTL_MS,
        }
    }

    /// Use a non-default request lifetime
    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// The shared ledger
    pub fn ledger(&self) -> &Arc<PairingLedger> {
        &self.ledger
    }

    /// Start pairing a new device with this instance's lifetime
    pub fn generate_pairing_request(&self, descriptor: &DeviceDescriptor) -> Result<PairingSession> {
        generate_pairing_request_at(descriptor, self.ttl_ms, crate::time::now_timestamp_millis())
    }

    /// Add the device described by `payload` to `wallet`
    pub fn authorize_device(
        &self,
        wallet: &mut Wallet,
        payload: &QrPayload,
        authorizer_id: &str,
    ) -> Result<Device> {
        self.authorize_device_at(wallet, payload, authorizer_id, crate::time::now_timestamp_millis())
    }

    /// [`PairingProtocol::authorize_device`] with an explicit clock reading
    pub fn authorize_device_at(
        &self,
        wallet: &mut Wallet,
        payload: &QrPayload,
        authorizer_id: &str,
        now_ms: i64,
    ) -> Result<Device> {
        payload.validate()?;

        wallet
            .devices
            .require_capable(authorizer_id, Permission::ManageDevices)?;

        let max = wallet.security_policy().max_devices;
        if wallet.devices.active_count() >= max as usize {
            return Err(Error::DeviceLimitReached { max });
        }

        if wallet.devices.contains(&payload.device_id) {
            return Err(Error::DeviceExists(payload.device_id.clone()));
        }

        let seed = wallet.seed()?;

        self.ledger.consume(payload, now_ms)?;

        let derived = hd::derive_device_key(&seed, &payload.device_id)?;
        let device = Device::from_derived(
            payload.device_id.clone(),
            &payload.descriptor(),
            derived,
            authorizer_id.to_string(),
            Permission::all(),
            now_ms,
        )?;

        wallet.devices.insert(device.clone())?;
        wallet.devices.touch_at(authorizer_id, now_ms)?;

        tracing::info!(
            "Device {} ({}) authorized by {}",
            device.id,
            device.device_type,
            authorizer_id
        );

        Ok(device)
    }

    /// Seal the new device's secret for it and drop the local copy
    ///
    /// Call right after [`PairingProtocol::authorize_device`] with the same
    /// payload.
    pub fn seal_grant(&self, wallet: &mut Wallet, payload: &QrPayload) -> Result<DeviceGrant> {
        let keys = payload.decode_keys()?;

        let device = wallet
            .devices
            .get(&payload.device_id)
            .ok_or_else(|| Error::DeviceNotFound(payload.device_id.clone()))?;

        if !device.is_active() || !device.has_private_key() {
            return Err(Error::Unauthorized(format!(
                "no grant can be issued for {}",
                device.id
            )));
        }

        let contents = GrantContents {
            pairing_code: payload.pairing_code.clone(),
            address: wallet.address().clone(),
            master_public_key: *wallet.master_public_key(),
            device: device.clone(),
        };
        let plaintext = serde_json::to_vec(&contents)?;

        let ephemeral = EncryptionKeyPair::generate();
        let sealed = crate::crypto::encrypt_for_recipient(
            &ephemeral,
            &keys.public_key,
            &keys.challenge,
            &plaintext,
            payload.device_id.as_bytes(),
        )?;

        if let Some(device) = wallet.devices.get_mut(&payload.device_id) {
            device.private_key = None;
        }

        tracing::debug!("Sealed grant for {}", payload.device_id);

        Ok(DeviceGrant {
            device_id: payload.device_id.clone(),
            authorizer_public_key: BASE64.encode(ephemeral.public_bytes()),
            sealed: BASE64.encode(sealed),
        })
    }
}

/// Authorize against `ledger` with the current time
pub fn authorize_device(
    ledger: &Arc<PairingLedger>,
    wallet: &mut Wallet,
    qr_payload: &QrPayload,
    authorizer_id: &str,
) -> Result<Device> {
    PairingProtocol::new(Arc::clone(ledger)).authorize_device(wallet, qr_payload, authorizer_id)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceStatus;
    use crate::error::ErrorKind;
    use crate::identity::create_new_identity_with;
    use crate::wallet::SecurityPolicy;

    fn identity(max_devices: u32) -> (Wallet, String) {
        let policy = SecurityPolicy {
            max_devices,
            ..SecurityPolicy::default()
        };
        let id = create_new_identity_with(&DeviceDescriptor::default(), policy).unwrap();
        (id.wallet, id.master_device.id)
    }

    fn request(name: &str) -> PairingSession {
        generate_pairing_request(name, DeviceType::Desktop).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let before = crate::time::now_timestamp_millis();
        let session = request("Laptop");
        let p = &session.qr_payload;

        assert_eq!(p.payload_type, "device_pairing");
        assert_eq!(p.device_id, session.device_id);
        assert_eq!(p.challenge.len(), 64);
        assert_eq!(p.pairing_code.len(), 6);
        assert!(p.expires_at >= before + DEFAULT_PAIRING_TTL_MS);
        assert!(p.expires_at <= crate::time::now_timestamp_millis() + DEFAULT_PAIRING_TTL_MS);
        assert!(format!("{:?}", session.private_challenge).contains("REDACTED"));
    }

    #[test]
    fn test_payload_json_fields() {
        let json = request("Laptop").qr_payload.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        for key in [
            "type",
            "version",
            "deviceId",
            "deviceName",
            "deviceType",
            "challenge",
            "publicKey",
            "pairingCode",
            "expiresAt",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["deviceType"], "desktop");

        let parsed = QrPayload::from_json(&json).unwrap();
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        let (mut wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let good = request("Laptop").qr_payload;

        let mut wrong_type = good.clone();
        wrong_type.payload_type = "login".into();

        let mut short_code = good.clone();
        short_code.pairing_code = "12345".into();

        let mut bad_key = good.clone();
        bad_key.public_key = "AAAA".into();

        let mut bad_challenge = good.clone();
        bad_challenge.challenge = "zz".into();

        for payload in [wrong_type, short_code, bad_key, bad_challenge] {
            let err = protocol
                .authorize_device(&mut wallet, &payload, &master)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(protocol.ledger().is_empty());
    }

    #[test]
    fn test_authorize_device() {
        let (mut wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let session = request("Laptop");
        let before = wallet.devices().get(&master).unwrap().last_active;

        let device = protocol
            .authorize_device_at(&mut wallet, &session.qr_payload, &master, before + 10)
            .unwrap();

        assert_eq!(wallet.devices().active_count(), 2);
        assert_eq!(device.id, session.device_id);
        assert_eq!(device.name, "Laptop");
        assert_eq!(device.status, DeviceStatus::Active);
        assert_eq!(device.authorized_by, master);
        assert_eq!(device.derivation_path, hd::device_path(&device.id));
        assert_eq!(wallet.devices().get(&master).unwrap().last_active, before + 10);

        // Same key as an independent derivation from the phrase
        let seed = wallet.mnemonic().unwrap().to_seed();
        let expected = hd::derive_device_key(&seed, &device.id)
            .unwrap()
            .keypair()
            .unwrap()
            .public_keys();
        assert_eq!(device.public_key, expected);
        assert_eq!(protocol.ledger().status(&session.qr_payload), Some(RequestStatus::Consumed));
    }

    #[test]
    fn test_device_limit() {
        let (mut wallet, master) = identity(2);
        let protocol = PairingProtocol::default();

        protocol
            .authorize_device(&mut wallet, &request("Second").qr_payload, &master)
            .unwrap();

        let third = request("Third");
        let err = protocol
            .authorize_device(&mut wallet, &third.qr_payload, &master)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceLimitReached { max: 2 }));
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);

        // The rejected request was not spent
        assert!(protocol.ledger().status(&third.qr_payload).is_none());
    }

    #[test]
    fn test_expired_request_is_burned() {
        let (mut wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let session = request("Laptop");
        let expires = session.qr_payload.expires_at;

        let err = protocol
            .authorize_device_at(&mut wallet, &session.qr_payload, &master, expires)
            .unwrap_err();
        assert!(matches!(err, Error::PairingExpired));
        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(wallet.devices().len(), 1);

        // Even with a clock that reads earlier, the request stays dead
        let err = protocol
            .authorize_device_at(&mut wallet, &session.qr_payload, &master, expires - 60_000)
            .unwrap_err();
        assert!(matches!(err, Error::RequestAlreadyConsumed(_)));
        assert_eq!(
            protocol.ledger().status(&session.qr_payload),
            Some(RequestStatus::Invalidated)
        );
    }

    #[test]
    fn test_request_single_use() {
        let (mut wallet, master) = identity(5);
        let mut other_copy = wallet.clone();
        let protocol = PairingProtocol::default();
        let session = request("Laptop");

        protocol
            .authorize_device(&mut wallet, &session.qr_payload, &master)
            .unwrap();

        // A second copy of the wallet sharing the ledger cannot reuse it
        let err = protocol
            .authorize_device(&mut other_copy, &session.qr_payload, &master)
            .unwrap_err();
        assert!(matches!(err, Error::RequestAlreadyConsumed(_)));
    }

    #[test]
    fn test_concurrent_consumption_single_winner() {
        let (wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let payload = request("Laptop").qr_payload;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let protocol = protocol.clone();
                let payload = payload.clone();
                let master = master.clone();
                let mut copy = wallet.clone();
                std::thread::spawn(move || {
                    protocol.authorize_device(&mut copy, &payload, &master).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_inactive_authorizer_rejected() {
        let (mut wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let laptop = protocol
            .authorize_device(&mut wallet, &request("Laptop").qr_payload, &master)
            .unwrap();

        wallet.devices.get_mut(&laptop.id).unwrap().status = DeviceStatus::Compromised;

        let err = protocol
            .authorize_device(&mut wallet, &request("Tablet").qr_payload, &laptop.id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = protocol
            .authorize_device(&mut wallet, &request("Tablet").qr_payload, "nobody")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_missing_mnemonic_keeps_request() {
        let (wallet, master) = identity(5);
        let mut stored = wallet.sanitized_for(&master);
        let protocol = PairingProtocol::default();
        let session = request("Laptop");

        let err = protocol
            .authorize_device(&mut stored, &session.qr_payload, &master)
            .unwrap_err();
        assert!(matches!(err, Error::MnemonicUnavailable));
        assert!(protocol.ledger().status(&session.qr_payload).is_none());
    }

    #[test]
    fn test_grant_round_trip() {
        let (mut wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let session = request("Laptop");

        protocol
            .authorize_device(&mut wallet, &session.qr_payload, &master)
            .unwrap();
        let grant = protocol.seal_grant(&mut wallet, &session.qr_payload).unwrap();

        // Authorizer no longer holds the new device's secret
        assert!(!wallet.devices().get(&session.device_id).unwrap().has_private_key());

        let credentials = session.open_grant(&grant).unwrap();
        assert_eq!(&credentials.address, wallet.address());
        assert!(credentials.device.has_private_key());

        let new_wallet = credentials.into_wallet(wallet.public_snapshot()).unwrap();
        let own = new_wallet.devices().get(&session.device_id).unwrap();
        assert!(own.has_private_key());
        assert!(!new_wallet.devices().get(&master).unwrap().has_private_key());
        assert!(new_wallet.mnemonic().is_none());
    }

    #[test]
    fn test_grant_for_other_session_fails() {
        let (mut wallet, master) = identity(5);
        let protocol = PairingProtocol::default();
        let session = request("Laptop");
        let eavesdropper = request("Laptop");

        protocol
            .authorize_device(&mut wallet, &session.qr_payload, &master)
            .unwrap();
        let mut grant = protocol.seal_grant(&mut wallet, &session.qr_payload).unwrap();

        grant.device_id = eavesdropper.device_id.clone();
        let err = eavesdropper.open_grant(&grant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_ledger_prune() {
        let ledger = PairingLedger::new();
        let payload = request("Laptop").qr_payload;

        ledger.consume(&payload, payload.expires_at - 1).unwrap();
        assert_eq!(ledger.prune_expired(payload.expires_at - 1), 0);
        assert_eq!(ledger.prune_expired(payload.expires_at), 1);
        assert!(ledger.is_empty());

        // A replay after pruning is still rejected as expired
        assert!(matches!(
            ledger.consume(&payload, payload.expires_at),
            Err(Error::PairingExpired)
        ));
    }
}
