//! # Device Pairing Demo
//!
//! Walks through adding a laptop to a phone's wallet, handing the laptop
//! its key, merging the two copies and finally revoking the laptop.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example device_pairing_demo
//! ```

use veil_core::{CoreConfig, DeviceDescriptor, DeviceType, RevocationReason, VeilCore};

fn main() {
    println!("=== Veil Core: Device Pairing Demo ===\n");

    let core = VeilCore::new(CoreConfig::default()).expect("Failed to build core");

    // Step 1: Phone creates the identity
    println!("Step 1: Phone creates an identity...");
    let identity = core
        .create_new_identity(&DeviceDescriptor::new("Phone", DeviceType::Mobile))
        .expect("Failed to create identity");
    let mut phone_wallet = identity.wallet;
    let phone_id = identity.master_device.id;
    println!("  Address: {}", phone_wallet.address());
    println!();

    // Step 2: Laptop shows a QR code
    println!("Step 2: Laptop generates a pairing request...");
    let session = core
        .generate_pairing_request("Laptop", DeviceType::Desktop)
        .expect("Failed to generate request");
    let qr = session.qr_payload.to_json().expect("Failed to encode QR payload");
    println!("  QR payload: {}", qr);
    println!("  Pairing code shown on laptop: {}", session.qr_payload.pairing_code);
    println!();

    // Step 3: Phone scans and authorizes
    println!("Step 3: Phone authorizes the laptop...");
    let scanned = veil_core::QrPayload::from_json(&qr).expect("Failed to parse QR payload");
    let laptop = core
        .authorize_device(&mut phone_wallet, &scanned, &phone_id)
        .expect("Failed to authorize");
    let grant = core
        .seal_grant(&mut phone_wallet, &scanned)
        .expect("Failed to seal grant");
    println!("  Laptop device: {} at {}", laptop.id, laptop.derivation_path);
    println!("  Active devices: {}", phone_wallet.devices().active_count());
    println!();

    // Step 4: Laptop opens the grant and builds its copy
    println!("Step 4: Laptop opens the grant...");
    let credentials = session.open_grant(&grant).expect("Failed to open grant");
    let laptop_wallet = credentials
        .into_wallet(phone_wallet.public_snapshot())
        .expect("Failed to build laptop wallet");
    println!("  Laptop joined {}", laptop_wallet.address());
    println!();

    // Step 5: Phone revokes the laptop, laptop merges the change
    println!("Step 5: Phone reports the laptop compromised...");
    let revoked = core.revoke_device(
        &mut phone_wallet,
        &laptop.id,
        &phone_id,
        RevocationReason::Compromised,
    );
    println!("  Revoked: {}", revoked);

    let merged = core
        .merge(&laptop_wallet, &phone_wallet.public_snapshot())
        .expect("Failed to merge");
    let record = merged.devices().get(&laptop.id).expect("Laptop record missing");
    println!("  Laptop status after merge: {}", record.status);
    println!("  Laptop key still present: {}", record.has_private_key());
    println!();

    println!("=== Demo Complete ===");
}
