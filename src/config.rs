//! Link configuration
//!
//! Defaults reproduce the revision-4 protocol exactly; a YAML file only needs
//! to name the fields it changes.
//!
//! ```yaml
//! write_timeout_ms: 1500
//! version_check: warn
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::layout::{LOCK_NAME, MAPPING_NAME};
use crate::{LinkError, Result};

/// Largest accepted lock-wait bound, in milliseconds.
pub const MAX_LOCK_TIMEOUT_MS: u64 = 60_000;

/// What to do when the host's protocol version differs from ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum VersionCheck {
    /// Refuse to connect.
    #[default]
    Strict,
    /// Log a warning and connect anyway.
    Warn,
    /// Do not look at the version byte.
    Off,
}

/// Settings for a controller-side link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Name of the host's shared-memory object.
    pub mapping_name: String,
    /// Name of the host's companion lock.
    pub lock_name: String,
    /// Bound on lock waits for guarded mutations and volume reads.
    pub write_timeout_ms: u64,
    /// Bound on the courtesy lock wait before reading a frame.
    pub frame_timeout_ms: u64,
    /// Protocol version policy.
    pub version_check: VersionCheck,
    /// Directory holding the mapping and lock files (unix only).
    pub shm_dir: PathBuf,
    /// Interval between sequence polls in [`crate::FrameMonitor`].
    pub poll_interval_ms: u64,
    /// Send `:videonative` after a successful connect.
    pub send_video_native: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mapping_name: MAPPING_NAME.to_string(),
            lock_name: LOCK_NAME.to_string(),
            write_timeout_ms: 3000,
            frame_timeout_ms: 1000,
            version_check: VersionCheck::Strict,
            shm_dir: PathBuf::from("/dev/shm"),
            poll_interval_ms: 16,
            send_video_native: true,
        }
    }
}

impl LinkConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LinkConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| LinkError::Io { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), bytes = text.len(), "Loaded link configuration");
        Self::from_yaml_str(&text)
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Reject settings the link cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.mapping_name.is_empty() {
            return Err(LinkError::config("mapping_name must not be empty"));
        }
        if self.lock_name.is_empty() {
            return Err(LinkError::config("lock_name must not be empty"));
        }
        for (field, value) in
            [("write_timeout_ms", self.write_timeout_ms), ("frame_timeout_ms", self.frame_timeout_ms)]
        {
            if value == 0 {
                return Err(LinkError::config(format!("{field} must be positive")));
            }
            if value > MAX_LOCK_TIMEOUT_MS {
                return Err(LinkError::config(format!(
                    "{field} of {value} exceeds the {MAX_LOCK_TIMEOUT_MS} ms limit"
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(LinkError::config("poll_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_revision() {
        let config = LinkConfig::default();
        assert_eq!(config.mapping_name, "DWD_GAMELINK_MMAP_R4");
        assert_eq!(config.lock_name, "DWD_GAMELINK_MUTEX_R4");
        assert_eq!(config.write_timeout(), Duration::from_millis(3000));
        assert_eq!(config.frame_timeout(), Duration::from_millis(1000));
        assert_eq!(config.version_check, VersionCheck::Strict);
        assert!(config.send_video_native);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = LinkConfig::from_yaml_str("write_timeout_ms: 250\nversion_check: warn\n")
            .expect("valid yaml");
        assert_eq!(config.write_timeout_ms, 250);
        assert_eq!(config.version_check, VersionCheck::Warn);
        assert_eq!(config.frame_timeout_ms, 1000);
        assert_eq!(config.mapping_name, MAPPING_NAME);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = LinkConfig::from_yaml_str("write_timeout_ms: 0").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));

        let err = LinkConfig::from_yaml_str("poll_interval_ms: 0").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));
    }

    #[test]
    fn oversized_timeouts_are_rejected() {
        let err = LinkConfig::from_yaml_str("write_timeout_ms: 4294967295").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));

        let config = LinkConfig { frame_timeout_ms: MAX_LOCK_TIMEOUT_MS + 1, ..LinkConfig::default() };
        assert!(matches!(config.validate(), Err(LinkError::Config { .. })));

        let config = LinkConfig { write_timeout_ms: MAX_LOCK_TIMEOUT_MS, ..LinkConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_yaml_reports_parse_error() {
        let err = LinkConfig::from_yaml_str("write_timeout_ms: [1, 2]").unwrap_err();
        assert!(matches!(err, LinkError::Yaml(_)));
    }

    #[test]
    fn yaml_round_trip_and_file_loading() {
        let mut config = LinkConfig::default();
        config.lock_name = "TEST_LOCK".into();
        config.version_check = VersionCheck::Off;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("gamelink.yaml");
        std::fs::write(&path, config.to_yaml().expect("serialize")).expect("write");

        assert_eq!(LinkConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = LinkConfig::load("/nonexistent/gamelink.yaml").unwrap_err();
        match err {
            LinkError::Io { path, .. } => assert!(path.ends_with("gamelink.yaml")),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
