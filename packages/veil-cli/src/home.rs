//! On-disk layout of one device's Veil home.
//!
//! ```text
//! <home>/
//! ├── config.json     optional CoreConfig overrides
//! ├── wallet.json     encrypted wallet envelope for this device
//! └── backup.json     password-protected recovery phrase
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Result, WrapErr};
use veil_core::{CoreConfig, Envelope, MnemonicBackup};

const CONFIG_FILE: &str = "config.json";
const WALLET_FILE: &str = "wallet.json";
const BACKUP_FILE: &str = "backup.json";

/// A device's data directory
#[derive(Debug, Clone)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    /// Use `explicit` if given, otherwise the platform data directory
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path,
            None => dirs::data_dir()
                .ok_or_else(|| eyre!("no data directory on this platform; pass --home"))?
                .join("veil"),
        };
        Ok(Self::at(root))
    }

    /// A home rooted at `root`
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory itself
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load `config.json`, or defaults when absent
    pub fn config(&self) -> Result<CoreConfig> {
        let path = self.root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(CoreConfig::default());
        }

        let data = fs::read_to_string(&path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&data)
            .wrap_err_with(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `true` if this home already holds a wallet
    pub fn has_wallet(&self) -> bool {
        self.root.join(WALLET_FILE).exists()
    }

    /// Write the wallet envelope
    pub fn save_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.write(WALLET_FILE, &envelope.to_json()?)
    }

    /// Read the wallet envelope
    pub fn load_envelope(&self) -> Result<Envelope> {
        let data = self.read(WALLET_FILE)?;
        Ok(Envelope::from_json(&data)?)
    }

    /// Read the wallet file without parsing it; used for old formats
    pub fn read_raw_wallet(&self) -> Result<String> {
        self.read(WALLET_FILE)
    }

    /// Write the mnemonic backup
    pub fn save_backup(&self, backup: &MnemonicBackup) -> Result<()> {
        self.write(BACKUP_FILE, &backup.to_json()?)
    }

    /// Read the mnemonic backup
    pub fn load_backup(&self) -> Result<MnemonicBackup> {
        let data = self.read(BACKUP_FILE)?;
        Ok(MnemonicBackup::from_json(&data)?)
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        fs::read_to_string(&path).wrap_err_with(|| format!("reading {}", path.display()))
    }

    // Write to a sibling then rename, so a crash never leaves half a file
    fn write(&self, name: &str, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .wrap_err_with(|| format!("creating {}", self.root.display()))?;

        let path = self.root.join(name);
        let tmp = self.root.join(format!("{}.tmp", name));
        fs::write(&tmp, contents).wrap_err_with(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).wrap_err_with(|| format!("replacing {}", path.display()))?;

        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::storage::backup::create_mnemonic_backup_with;
    use veil_core::{KdfParams, RecoveryPhrase};

    #[test]
    fn test_missing_config_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let home = Home::at(dir.path());

        assert_eq!(home.config().unwrap(), CoreConfig::default());
        assert!(!home.has_wallet());
    }

    #[test]
    fn test_partial_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "pairingTtlMs": 60000, "storageKdf": { "iterations": 5000 } }"#,
        )
        .unwrap();

        let config = Home::at(dir.path()).config().unwrap();
        assert_eq!(config.pairing_ttl_ms, 60_000);
        assert_eq!(config.storage_kdf.iterations, 5_000);
        assert_eq!(config.backup_kdf, KdfParams::backup());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "pairingTtlMs": 0 }"#).unwrap();

        assert!(Home::at(dir.path()).config().is_err());
    }

    #[test]
    fn test_backup_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let home = Home::at(dir.path().join("nested"));
        let phrase = RecoveryPhrase::generate().unwrap();
        let backup =
            create_mnemonic_backup_with(&phrase, "pw", KdfParams { iterations: 1_000 }).unwrap();

        home.save_backup(&backup).unwrap();
        let loaded = home.load_backup().unwrap();

        assert_eq!(loaded, backup);
        assert!(!home.root().join("backup.json.tmp").exists());
    }

    #[test]
    fn test_missing_wallet_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Home::at(dir.path()).load_envelope().is_err());
    }
}
