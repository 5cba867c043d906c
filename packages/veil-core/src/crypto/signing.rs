//! # Digital Signatures Module
//!
//! Ed25519 signatures over device-change announcements.
//!
//! Announcements travel over an untrusted transport, so every one carries the
//! signing device's public key and a signature over its canonical JSON form.
//! Receivers check the signature and then check that the signer is a known
//! device of their own wallet before acting on it.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::crypto::hex_bytes;
use crate::crypto::SigningKeyPair;
use crate::error::{Error, Result};

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 digital signature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "signature_bytes")] pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create from a slice (must be exactly 64 bytes)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != SIGNATURE_SIZE {
            return Err(Error::InvalidKey(format!(
                "Signature must be {} bytes, got {}",
                SIGNATURE_SIZE,
                slice.len()
            )));
        }
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Encode as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Sign a message using Ed25519
///
/// Ed25519 signatures are deterministic: the same key and message always
/// produce the same signature.
pub fn sign(keypair: &SigningKeyPair, message: &[u8]) -> Signature {
    let sig = keypair.signing_key().sign(message);
    Signature(sig.to_bytes())
}

/// Verify an Ed25519 signature
///
/// ## Returns
///
/// `Ok(())` if valid, `Err(VerificationFailed)` if invalid
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &Signature) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| Error::InvalidKey(format!("Invalid public key: {}", e)))?;

    let sig = Ed25519Signature::from_bytes(&signature.0);

    verifying_key
        .verify(message, &sig)
        .map_err(|_| Error::VerificationFailed)
}

/// Serde helper for signature bytes
mod signature_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid signature length"))
    }
}

// ============================================================================
// SIGNED DATA WRAPPER
// ============================================================================

/// A piece of data along with its signature
///
/// ```text
/// { "data": T, "signerPublicKey": hex(32 B), "signature": hex(64 B) }
/// ```
///
/// The signature covers `serde_json::to_vec(&data)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signed<T> {
    /// The signed data
    pub data: T,
    /// Ed25519 public key of the signer
    #[serde(with = "hex_bytes")]
    pub signer_public_key: [u8; 32],
    /// Signature over the serialized data
    pub signature: Signature,
}

impl<T: Serialize> Signed<T> {
    /// Sign the serialized form of `data`
    pub fn new(data: T, keypair: &SigningKeyPair) -> Result<Self> {
        let serialized = serde_json::to_vec(&data)?;
        let signature = sign(keypair, &serialized);

        Ok(Self {
            data,
            signer_public_key: keypair.public_bytes(),
            signature,
        })
    }

    /// Verify the signature and return the data if valid
    pub fn verify(&self) -> Result<&T> {
        let serialized = serde_json::to_vec(&self.data)?;
        verify(&self.signer_public_key, &serialized, &self.signature)?;
        Ok(&self.data)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(byte: u8) -> SigningKeyPair {
        SigningKeyPair::from_bytes(&[byte; 32])
    }

    #[test]
    fn test_sign_verify() {
        let kp = keypair(1);
        let sig = sign(&kp, b"device revoked");

        assert!(verify(&kp.public_bytes(), b"device revoked", &sig).is_ok());
        assert!(matches!(
            verify(&kp.public_bytes(), b"device added", &sig),
            Err(Error::VerificationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sig = sign(&keypair(1), b"message");
        assert!(verify(&keypair(2).public_bytes(), b"message", &sig).is_err());
    }

    #[test]
    fn test_signature_from_slice() {
        let sig = sign(&keypair(3), b"m");
        let restored = Signature::from_slice(&sig.0).unwrap();
        assert_eq!(sig, restored);
        assert_eq!(sig.to_hex().len(), 128);
        assert!(Signature::from_slice(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_signed_wrapper() {
        let kp = keypair(4);
        let signed = Signed::new(String::from("hello"), &kp).unwrap();

        assert_eq!(signed.verify().unwrap(), "hello");

        let json = serde_json::to_string(&signed).unwrap();
        assert!(json.contains("signerPublicKey"));

        let mut tampered: Signed<String> = serde_json::from_str(&json).unwrap();
        tampered.data = String::from("hullo");
        assert!(tampered.verify().is_err());
    }
}
