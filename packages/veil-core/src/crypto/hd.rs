//! # Hierarchical Deterministic Derivation
//!
//! SLIP-0010 derivation over Ed25519. Every component is hardened, which
//! makes each step one-way: a device key and its path reveal neither the
//! seed nor any sibling key.
//!
//! ```text
//! seed (64 B)
//!   │  HMAC-SHA512(key = "ed25519 seed")
//!   ▼
//! (k, c) master
//!   │  for each index i:  HMAC-SHA512(c, 0x00 ‖ k ‖ be32(i | 2^31))
//!   ▼
//! m/44'/7337'/0'              wallet master key  → address
//! m/44'/7337'/1'/{idx}'       device key, idx = be32(SHA-256(device_id)[0..4]) & 0x7FFF_FFFF
//! ```

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

use crate::crypto::keys::{DeviceSecret, KeyPair};
use crate::error::{Error, Result};
use crate::identity::Seed;

type HmacSha512 = Hmac<Sha512>;

const HARDENED_OFFSET: u32 = 0x8000_0000;

const MASTER_HMAC_KEY: &[u8] = b"ed25519 seed";

/// Derivation path of the wallet master key
pub const MASTER_PATH: &str = "m/44'/7337'/0'";

/// Prefix of every device derivation path
pub const DEVICE_PATH_PREFIX: &str = "m/44'/7337'/1'";

/// A key derived along a SLIP-0010 path
#[derive(Clone)]
pub struct DerivedKey {
    /// The 32-byte child key
    pub secret: DeviceSecret,
    /// The path that produced it
    pub derivation_path: String,
}

impl DerivedKey {
    /// Expand into signing and encryption keys
    pub fn keypair(&self) -> Result<KeyPair> {
        self.secret.keypair()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("secret", &"[REDACTED]")
            .field("derivation_path", &self.derivation_path)
            .finish()
    }
}

/// Derive the wallet master key at [`MASTER_PATH`]
pub fn derive_master_key(seed: &Seed) -> Result<DerivedKey> {
    derive_path(seed, MASTER_PATH)
}

/// Derive the key for `device_id`
///
/// Pure in `(seed, device_id)`: the same pair always yields the same key.
pub fn derive_device_key(seed: &Seed, device_id: &str) -> Result<DerivedKey> {
    let path = device_path(device_id);
    tracing::debug!("Deriving device key at {}", path);
    derive_path(seed, &path)
}

/// The non-hardened index a device id maps to
pub fn device_index(device_id: &str) -> u32 {
    let digest = Sha256::digest(device_id.as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(prefix) & !HARDENED_OFFSET
}

/// The full derivation path for a device id
pub fn device_path(device_id: &str) -> String {
    format!("{}/{}'", DEVICE_PATH_PREFIX, device_index(device_id))
}

/// Derive the key at an arbitrary hardened path
pub fn derive_path(seed: &Seed, path: &str) -> Result<DerivedKey> {
    let indices = parse_derivation_path(path)?;

    let (mut key, mut chain_code) = master_key_from_seed(seed.as_bytes())?;

    for &index in &indices {
        let (child_key, child_chain) = derive_hardened_child(&key, &chain_code, index)?;
        key.zeroize();
        chain_code.zeroize();
        key = child_key;
        chain_code = child_chain;
    }

    let secret = DeviceSecret::from_bytes(key);
    key.zeroize();
    chain_code.zeroize();

    Ok(DerivedKey {
        secret,
        derivation_path: path.to_string(),
    })
}

fn master_key_from_seed(seed: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let mut i = hmac_sha512(MASTER_HMAC_KEY, seed)?;

    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&i[..32]);
    chain_code.copy_from_slice(&i[32..]);
    i.zeroize();

    Ok((key, chain_code))
}

fn derive_hardened_child(
    parent_key: &[u8; 32],
    parent_chain_code: &[u8; 32],
    index: u32,
) -> Result<([u8; 32], [u8; 32])> {
    let mut data = [0u8; 37];
    data[1..33].copy_from_slice(parent_key);
    data[33..37].copy_from_slice(&(index | HARDENED_OFFSET).to_be_bytes());

    let mut i = hmac_sha512(parent_chain_code, &data)?;
    data.zeroize();

    let mut child_key = [0u8; 32];
    let mut child_chain = [0u8; 32];
    child_key.copy_from_slice(&i[..32]);
    child_chain.copy_from_slice(&i[32..]);
    i.zeroize();

    Ok((child_key, child_chain))
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<[u8; 64]> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| Error::KeyDerivationFailed(format!("HMAC-SHA512 key init failed: {}", e)))?;
    mac.update(data);
    let result = mac.finalize().into_bytes();

    let mut output = [0u8; 64];
    output.copy_from_slice(&result);
    Ok(output)
}

/// Parse `m/a'/b'/...` into raw (non-offset) indices
///
/// Accepts `'` or `h` as the hardened marker. Non-hardened components are
/// rejected since Ed25519 has no public derivation.
pub fn parse_derivation_path(path: &str) -> Result<Vec<u32>> {
    let trimmed = path.trim();

    let components = trimmed.strip_prefix("m/").ok_or_else(|| {
        Error::InvalidDerivationPath(format!("must start with 'm/', got '{}'", trimmed))
    })?;

    if components.is_empty() {
        return Err(Error::InvalidDerivationPath(
            "must have at least one component".into(),
        ));
    }

    components
        .split('/')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidDerivationPath("empty component".into()));
            }

            let num_str = part
                .strip_suffix('\'')
                .or_else(|| part.strip_suffix('h'))
                .ok_or_else(|| {
                    Error::InvalidDerivationPath(format!(
                        "only hardened components are allowed, got '{}'",
                        part
                    ))
                })?;

            let index: u32 = num_str.parse().map_err(|e| {
                Error::InvalidDerivationPath(format!("invalid index '{}': {}", num_str, e))
            })?;

            if index >= HARDENED_OFFSET {
                return Err(Error::InvalidDerivationPath(format!(
                    "index {} out of range",
                    index
                )));
            }

            Ok(index)
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
