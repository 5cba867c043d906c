//! # Recovery Phrase (BIP39)
//!
//! The 12-word phrase is the only secret a user ever has to keep. Every key
//! in the wallet is a deterministic function of it.
//!
//! ## Generation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      BIP39 MNEMONIC GENERATION                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. 128 bits of entropy from the OS CSPRNG                              │
//! │  2. checksum = first 4 bits of SHA-256(entropy)                         │
//! │  3. entropy ‖ checksum = 132 bits → 12 segments of 11 bits              │
//! │  4. each segment indexes the 2048-word English list                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Seed Derivation
//!
//! ```text
//! PBKDF2-HMAC-SHA512(
//!     password   = words joined by spaces (NFKD),
//!     salt       = "mnemonic" + passphrase,
//!     iterations = 2048,
//! ) → 64-byte Seed
//! ```
//!
//! ## Security Considerations
//!
//! | Aspect | Measure |
//! |--------|---------|
//! | Entropy | 128 bits from OS CSPRNG |
//! | Checksum | 4 bits catch most typos |
//! | Storage | Never persisted in a wallet envelope |
//! | Display | Show once, never log |

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Number of words in a recovery phrase
pub const WORD_COUNT: usize = 12;

/// Entropy size in bytes for 12 words (128 bits)
const ENTROPY_BYTES: usize = 16;

/// Maximum number of autocomplete suggestions
const MAX_SUGGESTIONS: usize = 10;

/// The 64-byte BIP39 seed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 64]);

impl Seed {
    /// Wrap raw seed bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Raw seed bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed([REDACTED])")
    }
}

/// A BIP39 recovery phrase for identity backup
///
/// ## Security Warning
///
/// - This phrase can fully recover the user's identity and every device key
/// - Should be shown to the user exactly once
/// - Should never be logged or stored in plaintext
#[derive(Clone, ZeroizeOnDrop)]
pub struct RecoveryPhrase {
    #[zeroize(skip)] // bip39::Mnemonic doesn't implement Zeroize
    mnemonic: Mnemonic,
}

impl RecoveryPhrase {
    /// Generate a new random recovery phrase
    pub fn generate() -> Result<Self> {
        let mut entropy = [0u8; ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut entropy);

        let mnemonic = Mnemonic::from_entropy(&entropy).map_err(|e| {
            Error::KeyDerivationFailed(format!("Failed to generate mnemonic: {}", e))
        });
        entropy.zeroize();

        Ok(Self { mnemonic: mnemonic? })
    }

    /// Parse a recovery phrase
    ///
    /// ## Validation
    ///
    /// - Must be exactly 12 words
    /// - All words must be in the BIP39 English wordlist
    /// - Checksum must be valid
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let normalized = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");

        let count = normalized.split(' ').filter(|w| !w.is_empty()).count();
        if count != WORD_COUNT {
            return Err(Error::InvalidRecoveryPhrase(format!(
                "Expected {} words, got {}",
                WORD_COUNT, count
            )));
        }

        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| Error::InvalidRecoveryPhrase(format!("{}", e)))?;

        Ok(Self { mnemonic })
    }

    /// Parse from a list of words
    pub fn from_words(words: &[&str]) -> Result<Self> {
        Self::from_phrase(&words.join(" "))
    }

    /// Get the words as a vector
    pub fn words(&self) -> Vec<&'static str> {
        self.mnemonic.words().collect()
    }

    /// Get the phrase as a single string (words separated by spaces)
    ///
    /// ## Security Warning
    ///
    /// Only use this for display to the user or for encrypting a backup.
    pub fn phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    /// Stretch the phrase into a 64-byte seed with an empty passphrase
    pub fn to_seed(&self) -> Seed {
        self.to_seed_with_passphrase("")
    }

    /// Stretch the phrase into a 64-byte seed
    ///
    /// Same phrase with a different passphrase yields an unrelated wallet.
    pub fn to_seed_with_passphrase(&self, passphrase: &str) -> Seed {
        Seed(self.mnemonic.to_seed(passphrase))
    }

    /// Validate a phrase without keeping it
    pub fn validate(phrase: &str) -> Result<()> {
        Self::from_phrase(phrase).map(|_| ())
    }

    /// `true` when [`RecoveryPhrase::validate`] would succeed
    pub fn is_valid(phrase: &str) -> bool {
        Self::validate(phrase).is_ok()
    }

    /// Check if a single word is in the BIP39 wordlist
    pub fn is_valid_word(word: &str) -> bool {
        Language::English
            .find_word(&word.to_lowercase())
            .is_some()
    }

    /// Get word suggestions for autocomplete
    pub fn suggest_words(prefix: &str) -> Vec<&'static str> {
        if prefix.is_empty() {
            return vec![];
        }

        Language::English
            .words_by_prefix(&prefix.to_lowercase())
            .iter()
            .take(MAX_SUGGESTIONS)
            .copied()
            .collect()
    }
}

// Prevent accidental logging
impl std::fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecoveryPhrase([REDACTED])")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Standard BIP39 test phrase (DO NOT USE FOR REAL!)
    const TEST_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_recovery_phrase() {
        let phrase = RecoveryPhrase::generate().unwrap();
        assert_eq!(phrase.words().len(), 12);
        assert!(RecoveryPhrase::is_valid(&phrase.phrase()));
    }

    #[test]
    fn test_parse_valid_phrase() {
        let phrase = RecoveryPhrase::from_phrase(TEST_PHRASE).unwrap();
        assert_eq!(phrase.words().len(), 12);
        assert_eq!(phrase.phrase(), TEST_PHRASE);
    }

    #[test]
    fn test_parse_is_case_and_space_tolerant() {
        let messy = "  ABANDON abandon  abandon abandon abandon abandon abandon abandon abandon abandon abandon About ";
        let phrase = RecoveryPhrase::from_phrase(messy).unwrap();
        assert_eq!(phrase.phrase(), TEST_PHRASE);
    }

    #[test]
    fn test_parse_invalid_word() {
        let invalid = "notaword abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let err = RecoveryPhrase::from_phrase(invalid).unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryPhrase(_)));
    }

    #[test]
    fn test_parse_bad_checksum() {
        // Valid words, wrong final checksum word
        let bad = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(!RecoveryPhrase::is_valid(bad));
    }

    #[test]
    fn test_parse_wrong_word_count() {
        assert!(RecoveryPhrase::from_phrase("abandon abandon abandon").is_err());

        // A valid 24-word phrase is still rejected
        let long = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";
        assert!(RecoveryPhrase::from_phrase(long).is_err());
    }

    #[test]
    fn test_seed_derivation_deterministic() {
        let phrase = RecoveryPhrase::generate().unwrap();
        assert_eq!(phrase.to_seed().as_bytes(), phrase.to_seed().as_bytes());
    }

    #[test]
    fn test_known_seed_vector() {
        // BIP39 reference vector, passphrase "TREZOR"
        let phrase = RecoveryPhrase::from_phrase(TEST_PHRASE).unwrap();
        let seed = phrase.to_seed_with_passphrase("TREZOR");
        assert_eq!(
            hex::encode(&seed.as_bytes()[..8]),
            "c55257c360c07c72"
        );
    }

    #[test]
    fn test_different_phrases_different_seeds() {
        let seed1 = RecoveryPhrase::generate().unwrap().to_seed();
        let seed2 = RecoveryPhrase::generate().unwrap().to_seed();
        assert_ne!(seed1.as_bytes(), seed2.as_bytes());
    }

    #[test]
    fn test_passphrase_changes_seed() {
        let phrase = RecoveryPhrase::generate().unwrap();

        let seed_no_pass = phrase.to_seed_with_passphrase("");
        let seed_with_pass = phrase.to_seed_with_passphrase("secret");

        assert_ne!(seed_no_pass.as_bytes(), seed_with_pass.as_bytes());
    }

    #[test]
    fn test_is_valid_word() {
        assert!(RecoveryPhrase::is_valid_word("abandon"));
        assert!(RecoveryPhrase::is_valid_word("Zoo"));
        assert!(!RecoveryPhrase::is_valid_word("notaword"));
    }

    #[test]
    fn test_suggest_words() {
        let suggestions = RecoveryPhrase::suggest_words("ab");
        assert!(suggestions.contains(&"abandon"));
        assert!(suggestions.contains(&"ability"));
        assert!(suggestions.len() <= MAX_SUGGESTIONS);
        assert!(RecoveryPhrase::suggest_words("").is_empty());
    }

    #[test]
    fn test_debug_redacts() {
        let phrase = RecoveryPhrase::from_phrase(TEST_PHRASE).unwrap();
        assert!(format!("{:?}", phrase).contains("REDACTED"));
        assert!(!format!("{:?}", phrase).contains("abandon"));
        assert!(!format!("{:?}", phrase.to_seed()).contains("5eb0"));
    }
}
