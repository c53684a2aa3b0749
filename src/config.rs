//! Mount configuration and on-disk credential locations.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime options for one mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// When false, every writeable operation is rejected and the read-only
    /// OAuth scope is requested.
    pub writeable: bool,

    /// When true (the default), records not owned by the viewer are invisible
    /// to the filesystem.
    pub owned_only: bool,

    /// How long the change loop sleeps between polls.
    pub poll_interval: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            writeable: false,
            owned_only: true,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl MountConfig {
    /// True when the mount rejects writes.
    #[must_use]
    pub fn read_only(&self) -> bool {
        !self.writeable
    }

    /// The OAuth scope matching the mount mode.
    #[must_use]
    pub fn oauth_scope(&self) -> &'static str {
        if self.writeable {
            drive_api::SCOPE_FULL
        } else {
            drive_api::SCOPE_READONLY
        }
    }
}

/// Location of the downloaded OAuth client secret:
/// `<home>/.config/drivefs/client_secret.json`.
#[must_use]
pub fn client_secret_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("drivefs").join("client_secret.json"))
}

/// Location of the persisted token cache: `<home>/.credentials/drivefs.json`.
#[must_use]
pub fn token_cache_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".credentials").join("drivefs.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_follows_mount_mode() {
        let ro = MountConfig::default();
        assert!(ro.read_only());
        assert_eq!(ro.oauth_scope(), drive_api::SCOPE_READONLY);

        let rw = MountConfig {
            writeable: true,
            ..MountConfig::default()
        };
        assert!(!rw.read_only());
        assert_eq!(rw.oauth_scope(), drive_api::SCOPE_FULL);
    }
}
