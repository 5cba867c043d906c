//! Passphrase-backed auth keys.
//!
//! A terminal has no biometric prompt, so the passphrase typed by the user
//! stands in for the biometric hash the platform keystore would hand over.

use sha2::{Digest, Sha256};
use veil_core::network::AuthKeyOracle;
use veil_core::{AuthKey, Error};

const DOMAIN: &[u8] = b"veil-cli-auth-key-v1";

/// Derives a device's storage auth key from a passphrase
#[derive(Debug, Default, Clone, Copy)]
pub struct PassphraseOracle;

impl AuthKeyOracle for PassphraseOracle {
    fn derive_auth_key(&self, biometric_hash: &[u8], device_id: &str) -> veil_core::Result<AuthKey> {
        if biometric_hash.is_empty() {
            return Err(Error::InvalidKey("passphrase must not be empty".into()));
        }

        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update(device_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(biometric_hash);

        Ok(AuthKey::new(hasher.finalize().to_vec()))
    }
}
