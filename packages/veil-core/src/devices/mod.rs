//! # Devices
//!
//! Every physical endpoint of a wallet is a [`Device`] record held in the
//! wallet's [`DeviceRegistry`].
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DEVICE STATE MACHINE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                ┌─────────┐   authorize    ┌─────────┐                   │
//! │                │ pending │ ─────────────► │ active  │                   │
//! │                └────┬────┘                └────┬────┘                   │
//! │                     │                          │  revoke(reason)        │
//! │                     └──────────────┬───────────┘                        │
//! │                                    ▼                                    │
//! │                 ┌─────────┐  ┌─────────┐  ┌─────────────┐               │
//! │                 │ revoked │  │  lost   │  │ compromised │   terminal    │
//! │                 └─────────┘  └─────────┘  └─────────────┘               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are never deleted; a terminal record is kept for audit and so
//! that merges can never resurrect it.
//!
//! ## Mutation
//!
//! Callers read devices through [`Wallet::devices`](crate::wallet::Wallet::devices).
//! The only public mutation is [`DeviceRegistry::touch`]; insertion happens in
//! [`pairing`] and status changes in [`revocation`].

pub mod pairing;
pub mod revocation;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{DerivedKey, DeviceSecret, PublicKey};
use crate::error::{Error, Result};

/// Kind of physical endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Phone or tablet
    Mobile,
    /// Laptop or workstation
    Desktop,
    /// Browser session
    Web,
    /// Dedicated signing device
    Hardware,
}

impl DeviceType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Desktop => "desktop",
            DeviceType::Web => "web",
            DeviceType::Hardware => "hardware",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mobile" => Ok(DeviceType::Mobile),
            "desktop" => Ok(DeviceType::Desktop),
            "web" => Ok(DeviceType::Web),
            "hardware" => Ok(DeviceType::Hardware),
            other => Err(Error::InvalidPairingRequest(format!(
                "Unknown device type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Announced but not yet authorized
    Pending,
    /// Authorized and usable
    Active,
    /// Retired by the user
    Revoked,
    /// Reported lost
    Lost,
    /// Reported compromised
    Compromised,
}

impl DeviceStatus {
    /// `true` for revoked, lost and compromised
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Revoked | DeviceStatus::Lost | DeviceStatus::Compromised
        )
    }

    /// Ordering used to break merge ties; later states rank higher
    pub fn rank(&self) -> u8 {
        match self {
            DeviceStatus::Pending => 0,
            DeviceStatus::Active => 1,
            DeviceStatus::Revoked => 2,
            DeviceStatus::Lost => 3,
            DeviceStatus::Compromised => 4,
        }
    }

    /// Whether the state machine allows `self → next`
    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        match self {
            DeviceStatus::Pending => next != DeviceStatus::Pending,
            DeviceStatus::Active => next.is_terminal(),
            _ => false,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Active => "active",
            DeviceStatus::Revoked => "revoked",
            DeviceStatus::Lost => "lost",
            DeviceStatus::Compromised => "compromised",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tags carried by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Sign on behalf of the identity
    Sign,
    /// Exchange wallet snapshots
    Sync,
    /// Authorize and revoke other devices
    ManageDevices,
    /// Change wallet-level profile data
    EditProfile,
}

impl Permission {
    /// Every capability
    pub fn all() -> BTreeSet<Permission> {
        [
            Permission::Sign,
            Permission::Sync,
            Permission::ManageDevices,
            Permission::EditProfile,
        ]
        .into_iter()
        .collect()
    }
}

/// Name and kind of a device, as chosen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Human-readable name
    pub name: String,
    /// Kind of endpoint
    pub device_type: DeviceType,
}

impl DeviceDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
        }
    }
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self::new("Primary device", DeviceType::Mobile)
    }
}

/// A single authorized endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// UUID v4, unique within the wallet
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Kind of endpoint
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Signing and encryption public keys
    pub public_key: PublicKey,
    /// Derived secret; only on the owning device, never after revocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<DeviceSecret>,
    /// SLIP-0010 path the keys were derived along
    pub derivation_path: String,
    /// Creation time (ms)
    pub created_at: i64,
    /// Last activity (ms); the merge clock for this record
    pub last_active: i64,
    /// Lifecycle state
    pub status: DeviceStatus,
    /// Id of the authorizing device; the master device names itself
    pub authorized_by: String,
    /// Capability tags
    pub permissions: BTreeSet<Permission>,
}

impl Device {
    /// Build an active device record from freshly derived key material
    pub(crate) fn from_derived(
        id: String,
        descriptor: &DeviceDescriptor,
        derived: DerivedKey,
        authorized_by: String,
        permissions: BTreeSet<Permission>,
        now_ms: i64,
    ) -> Result<Self> {
        let public_key = derived.keypair()?.public_keys();

        Ok(Self {
            id,
            name: descriptor.name.clone(),
            device_type: descriptor.device_type,
            public_key,
            private_key: Some(derived.secret),
            derivation_path: derived.derivation_path,
            created_at: now_ms,
            last_active: now_ms,
            status: DeviceStatus::Active,
            authorized_by,
            permissions,
        })
    }

    /// `true` while the device may act for the wallet
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    /// `true` if the device carries `permission`
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// `true` if this copy holds the device's secret
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Copy of this record without the secret
    pub fn public_projection(&self) -> Device {
        Device {
            private_key: None,
            ..self.clone()
        }
    }
}

/// The device arena of a wallet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    /// Look up a device
    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    /// `true` if `id` is present in any state
    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of records, terminal ones included
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// `true` if there are no records
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All records ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Devices currently in the active state
    pub fn active_devices(&self) -> Vec<&Device> {
        self.devices.values().filter(|d| d.is_active()).collect()
    }

    /// Number of active devices
    pub fn active_count(&self) -> usize {
        self.devices.values().filter(|d| d.is_active()).count()
    }

    /// Refresh `last_active` of an active device
    pub fn touch(&mut self, id: &str) -> Result<()> {
        self.touch_at(id, crate::time::now_timestamp_millis())
    }

    pub(crate) fn touch_at(&mut self, id: &str, now_ms: i64) -> Result<()> {
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;

        if !device.is_active() {
            return Err(Error::Unauthorized(format!(
                "device {} is {}",
                id, device.status
            )));
        }

        device.last_active = device.last_active.max(now_ms);
        Ok(())
    }

    /// Resolve `id` to an active device holding `permission`
    pub(crate) fn require_capable(&self, id: &str, permission: Permission) -> Result<&Device> {
        let device = self
            .devices
            .get(id)
            .ok_or_else(|| Error::Unauthorized(format!("unknown device {}", id)))?;

        if !device.is_active() {
            return Err(Error::Unauthorized(format!(
                "device {} is {}",
                id, device.status
            )));
        }

        if !device.has_permission(permission) {
            return Err(Error::Unauthorized(format!(
                "device {} lacks {:?}",
                id, permission
            )));
        }

        Ok(device)
    }

    pub(crate) fn insert(&mut self, device: Device) -> Result<()> {
        if self.devices.contains_key(&device.id) {
            return Err(Error::DeviceExists(device.id));
        }
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &String> {
        self.devices.keys()
    }

    /// Replace or add a record wholesale; used by merge
    pub(crate) fn put(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }
}

// ============================================================================
// TESTS
// ============================================================================
