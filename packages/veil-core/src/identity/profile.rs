//! # User Profile
//!
//! Free-form user metadata stored at wallet level and synchronized between
//! devices as a single last-write-wins register.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          USER PROFILE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  display_name: String            0-64 chars (empty until set)           │
//! │  status:       Option<String>    0-256 chars                            │
//! │  avatar:       Option<String>    base64 image or URI, max 256 KB        │
//! │  extra:        BTreeMap          up to 32 entries, short keys           │
//! │                                                                         │
//! │  ProfileUpdate applies one validated change at a time.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length for display name
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum length for status message
pub const MAX_STATUS_LENGTH: usize = 256;

/// Maximum size for avatar data (base64 encoded)
pub const MAX_AVATAR_SIZE: usize = 256 * 1024; // 256KB

/// Maximum number of free-form entries
pub const MAX_EXTRA_ENTRIES: usize = 32;

/// Maximum length of a free-form key
pub const MAX_EXTRA_KEY_LENGTH: usize = 64;

/// Maximum length of a free-form value
pub const MAX_EXTRA_VALUE_LENGTH: usize = 1024;

/// User profile information
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Human-readable display name
    pub display_name: String,

    /// Optional status message
    pub status: Option<String>,

    /// Optional avatar
    pub avatar: Option<String>,

    /// Arbitrary key/value metadata
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Profile {
    /// Create a new profile with just a display name
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Validate every field
    pub fn validate(&self) -> Result<()> {
        check_len("Display name", &self.display_name, MAX_DISPLAY_NAME_LENGTH)?;

        if let Some(ref status) = self.status {
            check_len("Status", status, MAX_STATUS_LENGTH)?;
        }

        if let Some(ref avatar) = self.avatar {
            check_len("Avatar", avatar, MAX_AVATAR_SIZE)?;
        }

        if self.extra.len() > MAX_EXTRA_ENTRIES {
            return Err(Error::ProfileUpdateFailed(format!(
                "Too many metadata entries: max {}",
                MAX_EXTRA_ENTRIES
            )));
        }

        for (key, value) in &self.extra {
            check_extra(key, value)?;
        }

        Ok(())
    }

    /// Apply an update to the profile
    ///
    /// The profile is left unchanged when the update is rejected.
    pub fn apply_update(&mut self, update: ProfileUpdate) -> Result<()> {
        match update {
            ProfileUpdate::DisplayName(name) => {
                if name.trim().is_empty() {
                    return Err(Error::ProfileUpdateFailed(
                        "Display name cannot be empty".into(),
                    ));
                }
                check_len("Display name", &name, MAX_DISPLAY_NAME_LENGTH)?;
                self.display_name = name;
            }
            ProfileUpdate::Status(status) => {
                if let Some(ref s) = status {
                    check_len("Status", s, MAX_STATUS_LENGTH)?;
                }
                self.status = status;
            }
            ProfileUpdate::Avatar(avatar) => {
                if let Some(ref a) = avatar {
                    check_len("Avatar", a, MAX_AVATAR_SIZE)?;
                }
                self.avatar = avatar;
            }
            ProfileUpdate::Extra { key, value: Some(value) } => {
                check_extra(&key, &value)?;
                if !self.extra.contains_key(&key) && self.extra.len() >= MAX_EXTRA_ENTRIES {
                    return Err(Error::ProfileUpdateFailed(format!(
                        "Too many metadata entries: max {}",
                        MAX_EXTRA_ENTRIES
                    )));
                }
                self.extra.insert(key, value);
            }
            ProfileUpdate::Extra { key, value: None } => {
                self.extra.remove(&key);
            }
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(Error::ProfileUpdateFailed(format!(
            "{} too long: max {} bytes",
            field, max
        )));
    }
    Ok(())
}

fn check_extra(key: &str, value: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::ProfileUpdateFailed("Metadata key cannot be empty".into()));
    }
    check_len("Metadata key", key, MAX_EXTRA_KEY_LENGTH)?;
    check_len("Metadata value", value, MAX_EXTRA_VALUE_LENGTH)
}

/// A partial update to a user's profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileUpdate {
    /// Update the display name
    DisplayName(String),

    /// Update the status message (None to clear)
    Status(Option<String>),

    /// Update the avatar (None to clear)
    Avatar(Option<String>),

    /// Set or remove (None) one metadata entry
    Extra {
        /// Entry key
        key: String,
        /// New value
        value: Option<String>,
    },
}

// ============================================================================
// TESTS
// ============================================================================
