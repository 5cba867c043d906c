//! # Storage Migration
//!
//! Rewrites stored envelopes between format versions. Only the pairs listed
//! in [`SUPPORTED_MIGRATIONS`] are allowed; every other pair fails with
//! `UnsupportedMigration` without touching the input.
//!
//! ## Version 1
//!
//! ```json
//! {
//!   "version": 1,
//!   "device_id": "…",
//!   "salt": "<hex>",
//!   "data": "<hex, nonce ‖ ciphertext ‖ tag>",
//!   "timestamp": 1700000000
//! }
//! ```
//!
//! Version 1 used the same key stretching and AEAD as version 2; only the
//! encoding differs (snake_case keys, hex, timestamp in seconds). The sealed
//! bytes are carried over as they are, so migrating never needs the auth key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

use crate::crypto::kdf::SALT_SIZE;
use crate::error::{Error, Result};
use crate::storage::codec::{Envelope, STORAGE_VERSION};

/// `(from, to)` pairs [`migrate_storage`] accepts
pub const SUPPORTED_MIGRATIONS: &[(u32, u32)] = &[(1, 2)];

#[derive(Debug, Deserialize)]
struct EnvelopeV1 {
    version: u32,
    device_id: String,
    salt: String,
    data: String,
    timestamp: i64,
}

/// Check whether `from → to` is a known migration
pub fn is_supported(from: u32, to: u32) -> bool {
    SUPPORTED_MIGRATIONS.contains(&(from, to))
}

/// Rewrite a stored blob from version `from` to version `to`
pub fn migrate_storage(blob: &str, from: u32, to: u32) -> Result<Envelope> {
    if !is_supported(from, to) {
        return Err(Error::UnsupportedMigration { from, to });
    }

    let envelope = match (from, to) {
        (1, 2) => migrate_v1_to_v2(blob)?,
        _ => return Err(Error::UnsupportedMigration { from, to }),
    };

    tracing::info!(
        "Migrated envelope for device {} from v{} to v{}",
        envelope.device_id,
        from,
        to
    );
    Ok(envelope)
}

fn migrate_v1_to_v2(blob: &str) -> Result<Envelope> {
    let legacy: EnvelopeV1 = serde_json::from_str(blob)
        .map_err(|e| Error::StorageCorrupted(format!("Not a v1 envelope: {}", e)))?;

    if legacy.version != 1 {
        return Err(Error::StorageCorrupted(format!(
            "Blob claims version {}, expected 1",
            legacy.version
        )));
    }

    let salt = hex::decode(&legacy.salt)
        .map_err(|e| Error::StorageCorrupted(format!("v1 salt: {}", e)))?;
    if salt.len() != SALT_SIZE {
        return Err(Error::StorageCorrupted("v1 salt has the wrong length".into()));
    }
    let data = hex::decode(&legacy.data)
        .map_err(|e| Error::StorageCorrupted(format!("v1 data: {}", e)))?;

    Ok(Envelope {
        version: STORAGE_VERSION,
        device_id: legacy.device_id,
        salt: BASE64.encode(salt),
        ciphertext: BASE64.encode(data),
        timestamp: crate::time::secs_to_millis(legacy.timestamp),
        kdf: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::identity::create_new_identity;
    use crate::storage::codec::{retrieve_wallet, store_wallet, AuthKey};

    /// Re-encode a current envelope the way version 1 wrote it
    fn downgrade(envelope: &Envelope) -> String {
        serde_json::json!({
            "version": 1,
            "device_id": envelope.device_id,
            "salt": hex::encode(BASE64.decode(&envelope.salt).unwrap()),
            "data": hex::encode(BASE64.decode(&envelope.ciphertext).unwrap()),
            "timestamp": envelope.timestamp / 1000,
        })
        .to_string()
    }

    #[test]
    fn test_v1_to_v2_is_readable() {
        let identity = create_new_identity().unwrap();
        let device = identity.master_device.id.clone();
        let auth = AuthKey::new(b"auth".to_vec());

        let current = store_wallet(&identity.wallet, &device, &auth).unwrap();
        let legacy = downgrade(&current);

        let migrated = migrate_storage(&legacy, 1, 2).unwrap();
        assert_eq!(migrated.version, 2);
        assert_eq!(migrated.ciphertext, current.ciphertext);
        assert_eq!(migrated.timestamp, (current.timestamp / 1000) * 1000);

        let wallet = retrieve_wallet(&migrated, &device, &auth).unwrap();
        assert_eq!(wallet.address(), identity.wallet.address());
    }

    #[test]
    fn test_unknown_pairs_rejected() {
        for (from, to) in [(2, 1), (1, 3), (0, 2), (2, 2)] {
            let err = migrate_storage("{}", from, to).unwrap_err();
            assert!(matches!(err, Error::UnsupportedMigration { .. }));
            assert_eq!(err.kind(), ErrorKind::UnsupportedMigration);
        }
    }

    #[test]
    fn test_garbage_blob() {
        let err = migrate_storage("not json", 1, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let wrong_version = r#"{"version":2,"device_id":"d","salt":"","data":"","timestamp":0}"#;
        assert!(migrate_storage(wrong_version, 1, 2).is_err());
    }
}
