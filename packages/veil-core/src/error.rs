//! # Error Handling
//!
//! This module provides the error type shared by every Veil Core module.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                          ErrorKind                   │
//! │  │                                                                      │
//! │  ├── Core (100-199)                                                     │
//! │  │   ├── NotInitialized                     Internal                    │
//! │  │   └── AlreadyInitialized                 Internal                    │
//! │  │                                                                      │
//! │  ├── Identity (200-299)                                                 │
//! │  │   ├── InvalidRecoveryPhrase              Validation                  │
//! │  │   ├── KeyDerivationFailed                Internal                    │
//! │  │   ├── InvalidDerivationPath              Validation                  │
//! │  │   ├── InvalidDid                         Validation                  │
//! │  │   ├── ProfileUpdateFailed                Validation                  │
//! │  │   └── MnemonicUnavailable                Authorization               │
//! │  │                                                                      │
//! │  ├── Crypto (300-399)                                                   │
//! │  │   ├── EncryptionFailed                   Internal                    │
//! │  │   ├── DecryptionFailed                   Integrity                   │
//! │  │   ├── VerificationFailed                 Integrity                   │
//! │  │   └── InvalidKey                         Validation                  │
//! │  │                                                                      │
//! │  ├── Storage (400-499)                                                  │
//! │  │   ├── UnsupportedStorageVersion          Expired                     │
//! │  │   ├── DeviceMismatch                     Integrity                   │
//! │  │   ├── StorageCorrupted                   Integrity                   │
//! │  │   ├── UnsupportedMigration               UnsupportedMigration        │
//! │  │   └── StorageNotFound                    NotFound                    │
//! │  │                                                                      │
//! │  ├── Devices (500-599)                                                  │
//! │  │   ├── DeviceNotFound                     NotFound                    │
//! │  │   ├── DeviceExists                       Validation                  │
//! │  │   ├── Unauthorized                       Authorization               │
//! │  │   ├── DeviceLimitReached                 LimitExceeded               │
//! │  │   ├── InvalidPolicy                      Validation                  │
//! │  │   └── InvalidRevocationReason            Validation                  │
//! │  │                                                                      │
//! │  ├── Pairing (600-699)                                                  │
//! │  │   ├── PairingExpired                     Expired                     │
//! │  │   ├── RequestAlreadyConsumed             Authorization               │
//! │  │   ├── InvalidPairingRequest              Validation                  │
//! │  │   └── PairingCodeMismatch                Integrity                   │
//! │  │                                                                      │
//! │  ├── Sync (700-799)                                                     │
//! │  │   └── WalletMismatch                     Integrity                   │
//! │  │                                                                      │
//! │  ├── Transport (800-899)                                                │
//! │  │   └── TransportError                     Internal                    │
//! │  │                                                                      │
//! │  └── Internal (900-999)                                                 │
//! │      ├── Internal / RngFailed               Internal                    │
//! │      └── Serialization / Deserialization    Internal                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//!
//! Pairing, authorization and revocation failures are ordinary results the
//! caller can retry with a fresh request or corrected input. Integrity
//! failures (wrong key, tampered ciphertext, wrong device) are final for that
//! operation: no partial plaintext or partially-populated wallet is ever
//! returned, and the only way back is restoring from the recovery phrase.

use thiserror::Error;

/// Result type alias for Veil Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classes callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input (bad phrase, bad payload, bad path)
    Validation,
    /// Stale pairing request or unsupported storage version
    Expired,
    /// Device cap reached
    LimitExceeded,
    /// Actor is unknown, inactive or lacks a capability
    Authorization,
    /// Decryption, device binding or wallet identity check failed
    Integrity,
    /// Unknown device or stored item
    NotFound,
    /// No migration path between two storage versions
    UnsupportedMigration,
    /// Everything else
    Internal,
}

/// Main error type for Veil Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Core Lifecycle Errors (100-199)
    // ========================================================================

    /// Core has not been initialized
    #[error("Veil Core has not been initialized. Call VeilCore::initialize() first.")]
    NotInitialized,

    /// Core has already been initialized
    #[error("Veil Core has already been initialized.")]
    AlreadyInitialized,

    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// Invalid recovery phrase (word count, unknown word or checksum)
    #[error("Invalid recovery phrase: {0}")]
    InvalidRecoveryPhrase(String),

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    /// Malformed or non-hardened derivation path
    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    /// Invalid DID / address format
    #[error("Invalid DID format: {0}")]
    InvalidDid(String),

    /// Profile update failed validation
    #[error("Failed to update profile: {0}")]
    ProfileUpdateFailed(String),

    /// This wallet copy does not hold the recovery phrase
    #[error("The recovery phrase is not available on this device.")]
    MnemonicUnavailable,

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key or tampered data)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Envelope written by a format this build cannot read
    #[error("Unsupported storage version: {0}")]
    UnsupportedStorageVersion(u32),

    /// Envelope belongs to another device
    #[error("Envelope belongs to device {found}, expected {expected}")]
    DeviceMismatch {
        /// Device id the caller asked for
        expected: String,
        /// Device id recorded in the envelope
        found: String,
    },

    /// Decrypted data failed a structural check
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// No whitelisted migration between two versions
    #[error("No migration from storage version {from} to {to}")]
    UnsupportedMigration {
        /// Source version
        from: u32,
        /// Target version
        to: u32,
    },

    /// Item not found in storage
    #[error("Item not found: {0}")]
    StorageNotFound(String),

    // ========================================================================
    // Device Errors (500-599)
    // ========================================================================

    /// Unknown device id
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device id already present in the wallet
    #[error("Device already exists: {0}")]
    DeviceExists(String),

    /// Authorizer/revoker is unknown, inactive or lacks the capability
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Active device cap reached
    #[error("Device limit reached: at most {max} active devices")]
    DeviceLimitReached {
        /// Configured cap
        max: u32,
    },

    /// Security policy rejected
    #[error("Invalid security policy: {0}")]
    InvalidPolicy(String),

    /// Not one of revoked, lost, compromised
    #[error("Invalid revocation reason: {0}")]
    InvalidRevocationReason(String),

    // ========================================================================
    // Pairing Errors (600-699)
    // ========================================================================

    /// Pairing request is past its expiry
    #[error("Pairing request has expired.")]
    PairingExpired,

    /// Pairing request was already used (or invalidated)
    #[error("Pairing request {0} has already been consumed.")]
    RequestAlreadyConsumed(String),

    /// Pairing payload is malformed
    #[error("Invalid pairing request: {0}")]
    InvalidPairingRequest(String),

    /// Grant does not carry the code shown on the new device
    #[error("Pairing code does not match.")]
    PairingCodeMismatch,

    // ========================================================================
    // Sync Errors (700-799)
    // ========================================================================

    /// Snapshots describe different identities
    #[error("Cannot merge wallets: {0}")]
    WalletMismatch(String),

    // ========================================================================
    // Transport Errors (800-899)
    // ========================================================================

    /// The external transport reported a failure
    #[error("Transport error: {0}")]
    TransportError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Random number generation failed
    #[error("Random number generation failed")]
    RngFailed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Core lifecycle
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Devices
    /// - 600-699: Pairing
    /// - 700-799: Sync
    /// - 800-899: Transport
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Core (100-199)
            Error::NotInitialized => 100,
            Error::AlreadyInitialized => 101,

            // Identity (200-299)
            Error::InvalidRecoveryPhrase(_) => 200,
            Error::KeyDerivationFailed(_) => 201,
            Error::InvalidDerivationPath(_) => 202,
            Error::InvalidDid(_) => 203,
            Error::ProfileUpdateFailed(_) => 204,
            Error::MnemonicUnavailable => 205,

            // Crypto (300-399)
            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed(_) => 301,
            Error::VerificationFailed => 302,
            Error::InvalidKey(_) => 303,

            // Storage (400-499)
            Error::UnsupportedStorageVersion(_) => 400,
            Error::DeviceMismatch { .. } => 401,
            Error::StorageCorrupted(_) => 402,
            Error::UnsupportedMigration { .. } => 403,
            Error::StorageNotFound(_) => 404,

            // Devices (500-599)
            Error::DeviceNotFound(_) => 500,
            Error::DeviceExists(_) => 501,
            Error::Unauthorized(_) => 502,
            Error::DeviceLimitReached { .. } => 503,
            Error::InvalidPolicy(_) => 504,
            Error::InvalidRevocationReason(_) => 505,

            // Pairing (600-699)
            Error::PairingExpired => 600,
            Error::RequestAlreadyConsumed(_) => 601,
            Error::InvalidPairingRequest(_) => 602,
            Error::PairingCodeMismatch => 603,

            // Sync (700-799)
            Error::WalletMismatch(_) => 700,

            // Transport (800-899)
            Error::TransportError(_) => 800,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::RngFailed => 901,
            Error::SerializationError(_) => 902,
            Error::DeserializationError(_) => 903,
        }
    }

    /// Map this error onto the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRecoveryPhrase(_)
            | Error::InvalidDerivationPath(_)
            | Error::InvalidDid(_)
            | Error::ProfileUpdateFailed(_)
            | Error::InvalidKey(_)
            | Error::DeviceExists(_)
            | Error::InvalidPolicy(_)
            | Error::InvalidRevocationReason(_)
            | Error::InvalidPairingRequest(_) => ErrorKind::Validation,

            Error::PairingExpired | Error::UnsupportedStorageVersion(_) => ErrorKind::Expired,

            Error::DeviceLimitReached { .. } => ErrorKind::LimitExceeded,

            Error::Unauthorized(_)
            | Error::MnemonicUnavailable
            | Error::RequestAlreadyConsumed(_) => ErrorKind::Authorization,

            Error::DecryptionFailed(_)
            | Error::VerificationFailed
            | Error::DeviceMismatch { .. }
            | Error::StorageCorrupted(_)
            | Error::PairingCodeMismatch
            | Error::WalletMismatch(_) => ErrorKind::Integrity,

            Error::DeviceNotFound(_) | Error::StorageNotFound(_) => ErrorKind::NotFound,

            Error::UnsupportedMigration { .. } => ErrorKind::UnsupportedMigration,

            Error::NotInitialized
            | Error::AlreadyInitialized
            | Error::KeyDerivationFailed(_)
            | Error::EncryptionFailed(_)
            | Error::TransportError(_)
            | Error::Internal(_)
            | Error::RngFailed
            | Error::SerializationError(_)
            | Error::DeserializationError(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying with a new pairing
    /// request or by correcting input. Integrity failures never are.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable for that blob: nothing reads it any more.
            Error::UnsupportedStorageVersion(_) => false,
            Error::TransportError(_) => true,
            _ => matches!(
                self.kind(),
                ErrorKind::Expired
                    | ErrorKind::LimitExceeded
                    | ErrorKind::Authorization
                    | ErrorKind::NotFound
                    | ErrorKind::Validation
            ),
        }
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::InvalidRecoveryPhrase(_)
                | Error::DecryptionFailed(_)
                | Error::PairingCodeMismatch
                | Error::DeviceLimitReached { .. }
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DeserializationError(format!("base64: {}", err))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::DeserializationError(format!("hex: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================
