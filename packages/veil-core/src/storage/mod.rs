//! # Storage Module
//!
//! Encrypted persistence for wallets and the recovery phrase.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Wallet Envelope (codec)                                        │    │
//! │  │  ───────────────────────                                        │    │
//! │  │  One per device. Sanitized wallet, AES-256-GCM, device id AAD.  │    │
//! │  │  Key: PBKDF2-SHA256(auth key, fresh salt, 100 000)              │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Mnemonic Backup (backup)                                       │    │
//! │  │  ────────────────────────                                       │    │
//! │  │  Recovery phrase, AES-256-GCM.                                  │    │
//! │  │  Key: PBKDF2-SHA256(password, own salt, 600 000)                │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  Migration (migration)                                          │    │
//! │  │  ─────────────────────                                          │    │
//! │  │  Whitelisted version pairs only: 1 → 2                          │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  SecureStore keeps envelopes and backups under named entries.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Stolen envelope | Auth key never stored; PBKDF2 slows guessing |
//! | Envelope copied to another device | Device id checked and bound as AAD |
//! | Tampering | GCM tag; nothing is returned on mismatch |
//! | Compromise of one device's storage | No mnemonic, no other device's key |

pub mod backup;
pub mod codec;
pub mod migration;
mod secure_store;

pub use backup::{create_mnemonic_backup, restore_mnemonic_backup, MnemonicBackup};
pub use codec::{
    retrieve_wallet, retrieve_wallet_async, store_wallet, store_wallet_async, AuthKey, Envelope,
    STORAGE_VERSION,
};
pub use migration::migrate_storage;
pub use secure_store::{
    delete_device_data, keys, load_backup, load_envelope, save_backup, save_envelope,
    stored_devices, SecureStore,
};
