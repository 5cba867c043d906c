//! # Cryptography Module
//!
//! All cryptographic primitives used by Veil Core.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Recovery Phrase (BIP39, 12 words, 128 bits of entropy)                 │
//! │                          │                                              │
//! │                          ▼                                              │
//! │              Seed (512 bits, PBKDF2-SHA512 x2048)                       │
//! │                          │                                              │
//! │                 hd: SLIP-0010, hardened only                            │
//! │            ┌─────────────┴─────────────┐                                │
//! │            ▼                           ▼                                │
//! │   Master key (address)        Device key per device id                  │
//! │                                        │                                │
//! │                              kdf: HKDF-SHA256                           │
//! │                        ┌───────────────┴───────────────┐                │
//! │                        ▼                               ▼                │
//! │               Ed25519 signing key            X25519 encryption key      │
//! │               (announcements)                (pairing grants)           │
//! │                                                                         │
//! │  Storage: PBKDF2-HMAC-SHA256 → AES-256-GCM, nonce ‖ ciphertext ‖ tag    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: All secret keys are zeroized when dropped
//! 2. **Constant-Time Operations**: Using dalek for constant-time crypto
//! 3. **Secure Random**: Using `rand::rngs::OsRng` for cryptographic randomness
//! 4. **No Key Reuse**: Unique nonces for every encryption operation

mod encryption;
pub mod hd;
pub mod kdf;
mod keys;
mod signing;

pub use encryption::{
    decrypt, decrypt_from_sender, encrypt, encrypt_for_recipient, open, seal, EncryptionKey,
    Nonce, NONCE_SIZE, TAG_SIZE,
};
pub use hd::{derive_device_key, derive_master_key, DerivedKey};
pub use kdf::{derive_keys_from_seed, derive_shared_secret, stretch_key, KdfParams};
pub use keys::{DeviceSecret, EncryptionKeyPair, KeyPair, PublicKey, SigningKeyPair};
pub(crate) use keys::hex_bytes;
pub use signing::{sign, verify, Signature, Signed, SIGNATURE_SIZE};
