//! # Recovery Phrase Demo
//!
//! Shows phrase validation, word suggestions and a password-protected
//! backup of the phrase.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example recovery_phrase_demo
//! ```

use veil_core::storage::backup::create_mnemonic_backup_with;
use veil_core::{restore_mnemonic_backup, KdfParams, RecoveryPhrase};

fn main() {
    println!("=== Veil Core: Recovery Phrase Demo ===\n");

    // Step 1: Generate
    println!("Step 1: Generating a phrase...");
    let phrase = RecoveryPhrase::generate().expect("Failed to generate phrase");
    println!("  {} words, first word '{}'", phrase.words().len(), phrase.words()[0]);
    println!();

    // Step 2: Validation
    println!("Step 2: Validating user input...");
    let typed = phrase.phrase().to_uppercase();
    println!("  Upper-cased copy valid: {}", RecoveryPhrase::is_valid(&typed));

    let mut words = phrase.words();
    words.swap(0, 1);
    let swapped = words.join(" ");
    println!("  Two words swapped valid: {} (checksum)", RecoveryPhrase::is_valid(&swapped));
    println!("  11 words valid: {}", RecoveryPhrase::is_valid(&words[..11].join(" ")));
    println!();

    // Step 3: Autocomplete
    println!("Step 3: Suggestions for 'ab'...");
    println!("  {}", RecoveryPhrase::suggest_words("ab").join(", "));
    println!();

    // Step 4: Backup
    println!("Step 4: Password-protected backup...");
    // A reduced work factor keeps the demo quick; the default is 600 000.
    let params = KdfParams { iterations: 10_000 };
    let backup =
        create_mnemonic_backup_with(&phrase, "correct horse battery staple", params)
            .expect("Failed to create backup");
    println!("{}", backup.to_json().expect("Failed to encode backup"));

    let wrong = restore_mnemonic_backup(&backup, "hunter2");
    println!("  Wrong password: {}", wrong.err().map(|e| e.to_string()).unwrap_or_default());

    let restored = restore_mnemonic_backup(&backup, "correct horse battery staple")
        .expect("Failed to restore backup");
    println!("  Restored phrase matches: {}", restored.phrase() == phrase.phrase());
    println!();

    println!("=== Demo Complete ===");
}
