//! # Key Derivation Functions
//!
//! Two families of derivation live here:
//!
//! - **HKDF-SHA256** expands high-entropy material (a device secret, an X25519
//!   shared secret) into purpose-bound keys.
//! - **PBKDF2-HMAC-SHA256** stretches low-entropy or caller-supplied material
//!   (an authentication key, a backup password) into an AES-256 key.
//!
//! ## Key Derivation Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION HIERARCHY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  12-word phrase ──PBKDF2-SHA512 (2048, BIP39)──► 64-byte seed           │
//! │                                                       │                 │
//! │                          SLIP-0010 (crypto::hd)       │                 │
//! │                 ┌─────────────────────────────────────┤                 │
//! │                 ▼                                     ▼                 │
//! │       m/44'/7337'/0'  (master)         m/44'/7337'/1'/{idx}' (device)   │
//! │                 │                                     │                 │
//! │                 └──────────────┬──────────────────────┘                 │
//! │                                ▼                                        │
//! │                 32-byte secret ──HKDF──┬──► Ed25519 signing key         │
//! │                                        └──► X25519 encryption key       │
//! │                                                                         │
//! │  auth key / password ──PBKDF2-SHA256 (100k / 600k, random salt)──►      │
//! │                                             AES-256-GCM storage key     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! | Aspect | Design Choice |
//! |--------|---------------|
//! | Expansion | HKDF-SHA256 with distinct `info` strings per purpose |
//! | Grant binding | `salt = pairing challenge` |
//! | Stretching | PBKDF2-HMAC-SHA256, fresh 32-byte salt per write |
//! | Versioning | "-v1" suffix on every domain string |

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Domain separation strings for HKDF
pub mod domain {
    /// Domain for signing key derivation
    pub const SIGNING_KEY: &[u8] = b"veil-signing-key-v1";

    /// Domain for encryption key derivation
    pub const ENCRYPTION_KEY: &[u8] = b"veil-encryption-key-v1";

    /// Domain for the pairing grant key
    pub const PAIRING_GRANT: &[u8] = b"veil-pairing-grant-v1";
}

/// PBKDF2 iterations for wallet envelopes
pub const STORAGE_ITERATIONS: u32 = 100_000;

/// PBKDF2 iterations for mnemonic backups
pub const BACKUP_ITERATIONS: u32 = 600_000;

/// Smallest PBKDF2 iteration count accepted
pub const MIN_ITERATIONS: u32 = 1_000;

/// Largest PBKDF2 iteration count accepted, for writers and stored headers alike
pub const MAX_ITERATIONS: u32 = 5_000_000;

/// Size of PBKDF2 salts in bytes
pub const SALT_SIZE: usize = 32;

/// Keys derived from a 32-byte secret
#[derive(ZeroizeOnDrop)]
pub struct DerivedKeys {
    /// Ed25519 signing key (32 bytes)
    pub signing_key: [u8; 32],

    /// X25519 encryption key (32 bytes)
    pub encryption_key: [u8; 32],
}

/// Derive signing and encryption keys from a 32-byte secret
///
/// ```text
/// Secret (32 bytes)
///       │
///       ├──► HKDF(info="veil-signing-key-v1")    → Signing Key
///       │
///       └──► HKDF(info="veil-encryption-key-v1") → Encryption Key
/// ```
pub fn derive_keys_from_seed(seed: &[u8; 32]) -> Result<DerivedKeys> {
    let hkdf = Hkdf::<Sha256>::new(None, seed);

    let mut signing_key = [0u8; 32];
    hkdf.expand(domain::SIGNING_KEY, &mut signing_key)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive signing key".into()))?;

    let mut encryption_key = [0u8; 32];
    hkdf.expand(domain::ENCRYPTION_KEY, &mut encryption_key)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive encryption key".into()))?;

    Ok(DerivedKeys {
        signing_key,
        encryption_key,
    })
}

/// Derive the grant key for a pairing hand-off
///
/// ## Parameters
///
/// - `dh_output`: Raw 32-byte output from X25519 Diffie-Hellman
/// - `challenge`: The pairing request's random challenge, used as salt
///
/// ## Returns
///
/// 32-byte AES-256-GCM encryption key
pub fn derive_shared_secret(dh_output: &[u8; 32], challenge: &[u8]) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(challenge), dh_output);

    let mut key = [0u8; 32];
    hkdf.expand(domain::PAIRING_GRANT, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive grant key".into()))?;

    Ok(key)
}

/// PBKDF2 work factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// PBKDF2-HMAC-SHA256 iteration count
    pub iterations: u32,
}

impl KdfParams {
    /// Work factor for wallet envelopes
    pub const fn storage() -> Self {
        Self {
            iterations: STORAGE_ITERATIONS,
        }
    }

    /// Work factor for mnemonic backups
    pub const fn backup() -> Self {
        Self {
            iterations: BACKUP_ITERATIONS,
        }
    }

    /// Reject iteration counts outside `MIN_ITERATIONS..=MAX_ITERATIONS`
    pub fn check(&self) -> Result<()> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(Error::KeyDerivationFailed(format!(
                "PBKDF2 iteration count {} outside {}..={}",
                self.iterations, MIN_ITERATIONS, MAX_ITERATIONS
            )));
        }
        Ok(())
    }

    /// Associated data binding a non-default work factor to a ciphertext
    ///
    /// The default work factor adds nothing, so blobs written without a
    /// `kdf` field keep `context` as their whole associated data.
    pub(crate) fn associated_data(params: Option<KdfParams>, context: &[u8]) -> Vec<u8> {
        let mut aad = context.to_vec();
        if let Some(params) = params {
            aad.extend_from_slice(b"\0pbkdf2-sha256:");
            aad.extend_from_slice(&params.iterations.to_be_bytes());
        }
        aad
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::storage()
    }
}

/// Stretch `secret` into a 32-byte AES key with PBKDF2-HMAC-SHA256
pub fn stretch_key(secret: &[u8], salt: &[u8], params: KdfParams) -> Result<[u8; 32]> {
    params.check()?;

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, params.iterations, &mut key);
    Ok(key)
}

/// Generate a fresh random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    use rand::RngCore;

    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// ============================================================================
// TESTS
// ============================================================================
