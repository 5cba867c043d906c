//! # Wallet Address
//!
//! A wallet's address is the `did:key` form of its master Ed25519 public key:
//!
//! ```text
//! did:key:z  +  base58btc( 0xed 0x01  ‖  master_public_key[32] )
//!          │               └─ multicodec: ed25519-pub
//!          └─ multibase: base58btc
//! ```
//!
//! It is computed exactly once, when the wallet is created or restored, and
//! is self-certifying: anyone holding the address can recover the master
//! public key from it and check that a wallet snapshot claims the same key.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The DID method prefix for did:key
pub const DID_KEY_PREFIX: &str = "did:key:";

/// Multicodec prefix for Ed25519 public keys (0xed01 in varint encoding)
const ED25519_MULTICODEC_PREFIX: [u8; 2] = [0xed, 0x01];

/// A `did:key` identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    value: String,
}

impl Did {
    /// Encode an Ed25519 public key as a DID
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut multicodec_key = Vec::with_capacity(34);
        multicodec_key.extend_from_slice(&ED25519_MULTICODEC_PREFIX);
        multicodec_key.extend_from_slice(public_key);

        let value = format!(
            "{}z{}",
            DID_KEY_PREFIX,
            bs58::encode(&multicodec_key).into_string()
        );

        Self { value }
    }

    /// Parse and validate a DID string
    pub fn parse(did_string: &str) -> Result<Self> {
        decode_key(did_string)?;
        Ok(Self {
            value: did_string.to_string(),
        })
    }

    /// Extract the Ed25519 public key
    pub fn public_key(&self) -> Result<[u8; 32]> {
        decode_key(&self.value)
    }

    /// `true` if this DID encodes `public_key`
    pub fn matches_key(&self, public_key: &[u8; 32]) -> bool {
        self.public_key().map(|k| &k == public_key).unwrap_or(false)
    }

    /// Get the full DID string
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

fn decode_key(did_string: &str) -> Result<[u8; 32]> {
    let identifier = did_string.strip_prefix(DID_KEY_PREFIX).ok_or_else(|| {
        Error::InvalidDid(format!(
            "DID must start with '{}', got '{}'",
            DID_KEY_PREFIX, did_string
        ))
    })?;

    let encoded = identifier.strip_prefix('z').ok_or_else(|| {
        Error::InvalidDid("DID identifier must start with 'z' (base58btc)".into())
    })?;

    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidDid(format!("Invalid base58btc encoding: {}", e)))?;

    if decoded.len() != 34 {
        return Err(Error::InvalidDid(format!(
            "Expected 34 bytes (2 prefix + 32 key), got {}",
            decoded.len()
        )));
    }

    if decoded[0..2] != ED25519_MULTICODEC_PREFIX {
        return Err(Error::InvalidDid(format!(
            "Invalid multicodec prefix: expected Ed25519 (0xed01), got {:02x}{:02x}",
            decoded[0], decoded[1]
        )));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded[2..]);
    Ok(key)
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl std::str::FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        decode_key(&value)?;
        Ok(Self { value })
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.value
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_roundtrip() {
        let public_key = [42u8; 32];
        let did = Did::from_public_key(&public_key);
        assert!(did.as_str().starts_with("did:key:z6Mk"));

        let parsed = Did::parse(did.as_str()).unwrap();
        assert_eq!(did, parsed);
        assert_eq!(parsed.public_key().unwrap(), public_key);
        assert!(parsed.matches_key(&public_key));
        assert!(!parsed.matches_key(&[1u8; 32]));
    }

    #[test]
    fn test_did_parse_invalid() {
        assert!(Did::parse("did:web:example.com").is_err());
        assert!(Did::parse("did:key:6MkhaXg").is_err());
        assert!(Did::parse("did:key:z111").is_err());
    }

    #[test]
    fn test_did_serde_validates() {
        let did = Did::from_public_key(&[7u8; 32]);
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, format!("\"{}\"", did));

        let restored: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(did, restored);

        assert!(serde_json::from_str::<Did>("\"did:key:nope\"").is_err());
    }
}
