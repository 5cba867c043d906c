//! # Identity Creation Example
//!
//! Demonstrates creating an identity, storing it encrypted and restoring it
//! from the recovery phrase on a second device.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example identity_creation
//! ```

use veil_core::{
    create_new_identity, restore_identity, retrieve_wallet, store_wallet, AuthKey, ProfileUpdate,
};

fn main() {
    println!("=== Veil Core: Identity Creation Example ===\n");

    // Step 1: Create a new identity
    println!("Step 1: Creating new identity...");
    let identity = create_new_identity().expect("Failed to create identity");
    let mut wallet = identity.wallet;
    let master = identity.master_device;

    println!("  Address:        {}", wallet.address());
    println!("  Master device:  {} ({})", master.id, master.name);
    println!("  Derivation:     {}", master.derivation_path);
    println!("  Max devices:    {}", wallet.security_policy().max_devices);
    println!();

    // Step 2: Display recovery phrase (ONLY SHOW ONCE IN PRODUCTION!)
    println!("Step 2: Recovery Phrase (12 words)");
    println!("  ┌────────────────────────────────────────────────────────┐");
    println!("  │ SECURITY WARNING: Write these words down on paper!     │");
    println!("  │ Never store digitally. Never share with anyone.        │");
    println!("  └────────────────────────────────────────────────────────┘");
    println!();

    let words = identity.mnemonic.words();
    for (i, chunk) in words.chunks(6).enumerate() {
        print!("  ");
        for (j, word) in chunk.iter().enumerate() {
            print!("{:2}. {:12} ", i * 6 + j + 1, word);
        }
        println!();
    }
    println!();

    // Step 3: Set a display name
    println!("Step 3: Updating profile...");
    wallet
        .update_profile(&master.id, ProfileUpdate::DisplayName("Alice".into()))
        .expect("Failed to update profile");
    println!("  Display name: {}", wallet.profile().display_name);
    println!();

    // Step 4: Encrypt for storage
    println!("Step 4: Storing wallet (PBKDF2 100k + AES-256-GCM)...");
    let auth_key = AuthKey::new(b"platform-supplied-auth-key".to_vec());
    let envelope = store_wallet(&wallet, &master.id, &auth_key).expect("Failed to store wallet");
    println!(
        "  Envelope v{} for {}, {} bytes of ciphertext (base64)",
        envelope.version,
        envelope.device_id,
        envelope.ciphertext.len()
    );

    let loaded = retrieve_wallet(&envelope, &master.id, &auth_key).expect("Failed to load wallet");
    println!("  Reloaded; mnemonic present: {}", loaded.mnemonic().is_some());
    println!();

    // Step 5: Restore on a new device
    println!("Step 5: Restoring identity from phrase...");
    let restored = restore_identity(&identity.mnemonic).expect("Failed to restore identity");

    println!("  Original address: {}", wallet.address());
    println!("  Restored address: {}", restored.address());

    if restored.address() == wallet.address() {
        println!("  [OK] Addresses match - recovery successful!");
    } else {
        println!("  [FAILED] Addresses do not match!");
    }
    println!();

    println!("=== Example Complete ===");
}
