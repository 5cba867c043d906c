//! CLI command implementations

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use veil_core::network::{
    announce_device_change, apply_announcement, device_topic, AuthKeyOracle, DeviceEvent,
    LoopbackTransport,
};
use veil_core::storage::codec::{retrieve_wallet_async, store_wallet_async};
use veil_core::storage::STORAGE_VERSION;
use veil_core::{
    AuthKey, DeviceDescriptor, DeviceType, ProfileUpdate, RecoveryPhrase, RevocationReason,
    VeilCore, Wallet,
};

use crate::home::Home;
use crate::oracle::PassphraseOracle;

/// Veil - one identity, many devices
#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Manage a multi-device Veil identity")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory of this device
    #[arg(long, global = true, env = "VEIL_HOME")]
    pub home: Option<PathBuf>,

    /// Passphrase unlocking this device's wallet
    #[arg(long, global = true, env = "VEIL_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new identity with this device as its first device
    Init {
        /// Device name
        #[arg(long, default_value = "Primary device")]
        name: String,

        /// mobile, desktop, web or hardware
        #[arg(long = "type", default_value = "desktop")]
        device_type: DeviceType,

        /// Also write a password-protected backup of the recovery phrase
        #[arg(long)]
        backup_password: Option<String>,
    },

    /// Restore an identity from its recovery phrase onto this device
    Restore {
        /// The 12 words, space separated
        #[arg(long)]
        phrase: String,

        /// Device name
        #[arg(long, default_value = "Restored device")]
        name: String,

        /// mobile, desktop, web or hardware
        #[arg(long = "type", default_value = "desktop")]
        device_type: DeviceType,

        /// Replace an existing wallet in this home
        #[arg(long)]
        force: bool,
    },

    /// Restore from the backup file in this home
    RestoreBackup {
        /// Backup password
        #[arg(long)]
        password: String,

        /// Device name
        #[arg(long, default_value = "Restored device")]
        name: String,

        /// mobile, desktop, web or hardware
        #[arg(long = "type", default_value = "desktop")]
        device_type: DeviceType,

        /// Replace an existing wallet in this home
        #[arg(long)]
        force: bool,
    },

    /// Show the address, profile and devices
    Show,

    /// Set the display name
    SetName {
        /// New display name
        name: String,
    },

    /// Add a new device whose home is another directory
    Pair {
        /// Home directory of the new device
        #[arg(long)]
        target: PathBuf,

        /// Passphrase for the new device's wallet
        #[arg(long)]
        target_passphrase: String,

        /// Name of the new device
        #[arg(long)]
        name: String,

        /// mobile, desktop, web or hardware
        #[arg(long = "type", default_value = "desktop")]
        device_type: DeviceType,

        /// Password of this home's backup; unlocks the recovery phrase
        #[arg(long)]
        backup_password: String,
    },

    /// Retire a device
    Revoke {
        /// Id of the device to retire
        device_id: String,

        /// revoked, lost or compromised
        #[arg(long, default_value = "revoked")]
        reason: RevocationReason,

        /// Write the signed announcement to this file
        #[arg(long)]
        announce: Option<PathBuf>,
    },

    /// Apply a signed device announcement written by `revoke --announce`
    Apply {
        /// Announcement file
        file: PathBuf,
    },

    /// Merge another device's wallet into this one
    Sync {
        /// Home directory of the other device
        #[arg(long)]
        peer: PathBuf,

        /// Passphrase of the other device
        #[arg(long)]
        peer_passphrase: String,
    },

    /// Back up a recovery phrase under a password
    Backup {
        /// The 12 words, space separated
        #[arg(long)]
        phrase: String,

        /// Backup password
        #[arg(long)]
        password: String,
    },

    /// Upgrade this home's wallet file from an older format
    Migrate {
        /// Version the file is in
        #[arg(long, default_value_t = 1)]
        from: u32,

        /// Version to write
        #[arg(long, default_value_t = STORAGE_VERSION)]
        to: u32,
    },
}

/// Everything a command needs about this device
struct Context {
    home: Home,
    core: VeilCore,
    passphrase: Option<String>,
}

impl Context {
    fn auth_key_for(passphrase: &str, device_id: &str) -> Result<AuthKey> {
        Ok(PassphraseOracle.derive_auth_key(passphrase.as_bytes(), device_id)?)
    }

    fn passphrase(&self) -> Result<&str> {
        self.passphrase
            .as_deref()
            .ok_or_else(|| eyre!("--passphrase or VEIL_PASSPHRASE is required"))
    }

    fn auth_key(&self, device_id: &str) -> Result<AuthKey> {
        Self::auth_key_for(self.passphrase()?, device_id)
    }

    /// Decrypt the wallet in `home`; returns it with its device id
    async fn load_from(home: &Home, passphrase: &str) -> Result<(Wallet, String)> {
        let envelope = home.load_envelope()?;
        let device_id = envelope.device_id.clone();
        let auth_key = Self::auth_key_for(passphrase, &device_id)?;

        let wallet = retrieve_wallet_async(envelope, device_id.clone(), auth_key)
            .await
            .wrap_err("unlocking wallet (wrong passphrase?)")?;
        Ok((wallet, device_id))
    }

    async fn load(&self) -> Result<(Wallet, String)> {
        Self::load_from(&self.home, self.passphrase()?).await
    }

    async fn save_to(
        &self,
        home: &Home,
        wallet: &Wallet,
        device_id: &str,
        auth_key: AuthKey,
    ) -> Result<()> {
        let envelope = store_wallet_async(
            wallet.clone(),
            device_id.to_string(),
            auth_key,
            self.core.config().storage_kdf,
        )
        .await?;
        home.save_envelope(&envelope)
    }

    async fn save(&self, wallet: &Wallet, device_id: &str) -> Result<()> {
        let auth_key = self.auth_key(device_id)?;
        self.save_to(&self.home, wallet, device_id, auth_key).await
    }

    fn refuse_overwrite(&self, force: bool) -> Result<()> {
        if self.home.has_wallet() && !force {
            bail!(
                "{} already holds a wallet; pass --force to replace it",
                self.home.root().display()
            );
        }
        Ok(())
    }

    /// Restore `mnemonic` onto this device and save it
    async fn restore(&self, mnemonic: &RecoveryPhrase, descriptor: DeviceDescriptor) -> Result<()> {
        let wallet = self.core.restore_identity(mnemonic, &descriptor)?;
        let device_id = only_active_device(&wallet)?;
        self.save(&wallet, &device_id).await?;

        println!("Restored {}", wallet.address());
        println!("This device: {} ({})", device_id, descriptor.name);
        println!("Run `veil sync` against a surviving device to recover the others.");
        Ok(())
    }
}

fn only_active_device(wallet: &Wallet) -> Result<String> {
    wallet
        .devices()
        .active_devices()
        .first()
        .map(|d| d.id.clone())
        .ok_or_else(|| eyre!("restored wallet has no active device"))
}

fn print_wallet(wallet: &Wallet, this_device: &str) {
    println!("Address:  {}", wallet.address());
    println!("Name:     {}", wallet.profile().display_name);
    println!(
        "Devices:  {} active of max {}",
        wallet.devices().active_count(),
        wallet.security_policy().max_devices
    );
    println!();

    for device in wallet.devices().iter() {
        let marker = if device.id == this_device { "*" } else { " " };
        println!(
            "{} {}  {:<20} {:<8} {:<11} {}",
            marker, device.id, device.name, device.device_type, device.status, device.derivation_path
        );
    }
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    let home = Home::resolve(cli.home)?;
    let core = VeilCore::new(home.config()?)?;
    let ctx = Context {
        home,
        core,
        passphrase: cli.passphrase,
    };

    match cli.command {
        Commands::Init {
            name,
            device_type,
            backup_password,
        } => {
            ctx.refuse_overwrite(false)?;

            let identity = ctx
                .core
                .create_new_identity(&DeviceDescriptor::new(name, device_type))?;
            ctx.save(&identity.wallet, &identity.master_device.id).await?;

            if let Some(password) = backup_password {
                let backup = ctx.core.create_mnemonic_backup(&identity.mnemonic, &password)?;
                ctx.home.save_backup(&backup)?;
                println!("Wrote recovery phrase backup.");
            }

            println!("Address: {}", identity.wallet.address());
            println!("Device:  {}", identity.master_device.id);
            println!();
            println!("Recovery phrase. Write it down; it is not stored unencrypted anywhere:");
            println!();
            for (i, word) in identity.mnemonic.words().iter().enumerate() {
                println!("  {:2}. {}", i + 1, word);
            }
        }

        Commands::Restore {
            phrase,
            name,
            device_type,
            force,
        } => {
            ctx.refuse_overwrite(force)?;
            let mnemonic = RecoveryPhrase::from_phrase(&phrase)?;
            ctx.restore(&mnemonic, DeviceDescriptor::new(name, device_type))
                .await?;
        }

        Commands::RestoreBackup {
            password,
            name,
            device_type,
            force,
        } => {
            ctx.refuse_overwrite(force)?;
            let backup = ctx.home.load_backup()?;
            let mnemonic = ctx.core.restore_mnemonic_backup(&backup, &password)?;
            ctx.restore(&mnemonic, DeviceDescriptor::new(name, device_type))
                .await?;
        }

        Commands::Show => {
            let (wallet, device_id) = ctx.load().await?;
            print_wallet(&wallet, &device_id);
        }

        Commands::SetName { name } => {
            let (mut wallet, device_id) = ctx.load().await?;
            wallet.update_profile(&device_id, ProfileUpdate::DisplayName(name))?;
            ctx.save(&wallet, &device_id).await?;
            println!("Display name set to {}", wallet.profile().display_name);
        }

        Commands::Pair {
            target,
            target_passphrase,
            name,
            device_type,
            backup_password,
        } => {
            let target = Home::at(target);
            if target.has_wallet() {
                bail!("{} already holds a wallet", target.root().display());
            }

            let (mut wallet, device_id) = ctx.load().await?;
            let backup = ctx.home.load_backup().wrap_err("pairing needs the phrase backup")?;
            wallet.attach_mnemonic(ctx.core.restore_mnemonic_backup(&backup, &backup_password)?)?;

            // The new device's half; both sides run in this process
            let session = ctx.core.generate_pairing_request(&name, device_type)?;
            println!("Pairing code: {}", session.qr_payload.pairing_code);

            let device = ctx
                .core
                .authorize_device(&mut wallet, &session.qr_payload, &device_id)?;
            let grant = ctx.core.seal_grant(&mut wallet, &session.qr_payload)?;

            let new_wallet = session
                .open_grant(&grant)?
                .into_wallet(wallet.public_snapshot())?;

            let target_key = Context::auth_key_for(&target_passphrase, &device.id)?;
            ctx.save_to(&target, &new_wallet, &device.id, target_key)
                .await?;
            ctx.save(&wallet, &device_id).await?;

            println!(
                "Paired {} ({}) into {}",
                device.id,
                device.name,
                target.root().display()
            );
        }

        Commands::Revoke {
            device_id: target_id,
            reason,
            announce,
        } => {
            let (mut wallet, device_id) = ctx.load().await?;

            if !ctx.core.revoke_device(&mut wallet, &target_id, &device_id, reason) {
                bail!("{} could not be revoked from this device", target_id);
            }
            ctx.save(&wallet, &device_id).await?;
            println!("{} is now {}", target_id, reason);

            if let Some(path) = announce {
                let transport = LoopbackTransport::new();
                let mut rx = transport.watch(&device_topic(wallet.address()));
                announce_device_change(
                    &transport,
                    &wallet,
                    &target_id,
                    &device_id,
                    DeviceEvent::Revoked,
                )
                .await?;
                let payload = rx.recv().await.wrap_err("announcement was not delivered")?;
                fs::write(&path, payload).wrap_err_with(|| format!("writing {}", path.display()))?;
                println!("Announcement written to {}", path.display());
            }
        }

        Commands::Apply { file } => {
            let (mut wallet, device_id) = ctx.load().await?;
            let payload = fs::read(&file).wrap_err_with(|| format!("reading {}", file.display()))?;

            if apply_announcement(&mut wallet, &payload)? {
                ctx.save(&wallet, &device_id).await?;
                println!("Applied announcement");
            } else {
                println!("Nothing new in announcement");
            }
        }

        Commands::Sync {
            peer,
            peer_passphrase,
        } => {
            let (local, device_id) = ctx.load().await?;
            let (remote, _) = Context::load_from(&Home::at(peer), &peer_passphrase).await?;

            let (merged, report) =
                veil_core::sync::merge_with_report(&local, &remote.public_snapshot())?;
            if report.is_noop() {
                println!("Already up to date");
                return Ok(());
            }

            ctx.save(&merged, &device_id).await?;
            println!(
                "Merged: {} added, {} updated, {} retired",
                report.added.len(),
                report.updated.len(),
                report.retired.len()
            );
        }

        Commands::Backup { phrase, password } => {
            let mnemonic = RecoveryPhrase::from_phrase(&phrase)?;
            let backup = ctx.core.create_mnemonic_backup(&mnemonic, &password)?;
            ctx.home.save_backup(&backup)?;
            println!("Backup written to {}", ctx.home.root().display());
        }

        Commands::Migrate { from, to } => {
            let blob = ctx.home.read_raw_wallet()?;
            let envelope = ctx.core.migrate_storage(&blob, from, to)?;

            // Make sure the result still opens before replacing the file
            let auth_key = ctx.auth_key(&envelope.device_id)?;
            ctx.core
                .retrieve_wallet(&envelope, &envelope.device_id, &auth_key)
                .wrap_err("migrated wallet does not open")?;

            ctx.home.save_envelope(&envelope)?;
            println!("Migrated wallet from v{} to v{}", from, to);
        }
    }

    Ok(())
}
