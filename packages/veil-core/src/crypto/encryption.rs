//! # Encryption Module
//!
//! AES-256-GCM for wallet envelopes, mnemonic backups and pairing grants.
//!
//! ## Sealed Blob Layout
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┬──────────────┐
//! │  nonce (12 B)    │  ciphertext (len(plaintext) B)       │  tag (16 B)  │
//! └──────────────────┴──────────────────────────────────────┴──────────────┘
//! ```
//!
//! [`seal`] produces this layout and [`open`] consumes it. The nonce is
//! random for every call, so sealing the same plaintext twice never yields
//! the same bytes.
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only holders of the key can read the payload |
//! | Integrity | Any modification of nonce, ciphertext or tag is detected |
//! | Binding | AAD ties a blob to a device id or record type |
//! | No partial output | Decryption returns all plaintext or an error |

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce (number used once) for AES-GCM encryption
///
/// ## Critical Security Requirement
///
/// **NEVER reuse a nonce with the same key!** Random 96-bit nonces are safe
/// for up to 2^32 messages per key. Every envelope write also uses a fresh
/// PBKDF2 salt, so each key sees very few nonces.
#[derive(Clone, Copy, Debug)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An AES-256-GCM encryption key
///
/// Zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Encrypt a message using AES-256-GCM
///
/// ## Returns
///
/// Tuple of (nonce, ciphertext_with_tag)
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt a message using AES-256-GCM
///
/// ## Errors
///
/// Returns `DecryptionFailed` if the ciphertext was tampered with, the AAD
/// doesn't match, or the key or nonce is wrong.
pub fn decrypt(
    key: &EncryptionKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|_| {
            Error::DecryptionFailed("Decryption failed: authentication tag mismatch".into())
        })
}

/// Encrypt and prefix the nonce: `nonce ‖ ciphertext ‖ tag`
pub fn seal(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = encrypt(key, plaintext, aad)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(nonce.as_bytes());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Split a sealed blob and decrypt it
pub fn open(key: &EncryptionKey, blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed("Sealed data too short".into()));
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    decrypt(key, &Nonce::from_bytes(nonce), ciphertext, aad)
}

/// Seal a payload for the holder of `their_public_key`
///
/// ```text
/// 1. X25519 DH: our_private × their_public → dh_output
/// 2. HKDF:      dh_output, salt = challenge → grant key
/// 3. AES-GCM:   seal(grant key, plaintext, aad)
/// ```
pub fn encrypt_for_recipient(
    our_encryption_key: &super::EncryptionKeyPair,
    their_public_key: &[u8; 32],
    challenge: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let key = grant_key(our_encryption_key, their_public_key, challenge)?;
    seal(&key, plaintext, aad)
}

/// Open a payload sealed by the holder of `their_public_key`
pub fn decrypt_from_sender(
    our_encryption_key: &super::EncryptionKeyPair,
    their_public_key: &[u8; 32],
    challenge: &[u8],
    blob: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let key = grant_key(our_encryption_key, their_public_key, challenge)?;
    open(&key, blob, aad)
}

fn grant_key(
    ours: &super::EncryptionKeyPair,
    their_public_key: &[u8; 32],
    challenge: &[u8],
) -> Result<EncryptionKey> {
    let dh_output = ours.diffie_hellman(their_public_key);
    let key = super::kdf::derive_shared_secret(&dh_output, challenge)?;
    Ok(EncryptionKey::from_bytes(key))
}

// ============================================================================
// TESTS
// ============================================================================
