use mailbox_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MailboxError;
use crate::paths;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOCK_RETRY_MS: u64 = 25;
const DEFAULT_STALE_LOCK_SECS: u64 = 300;

/// Store configuration, handed to [`crate::MailboxStore::new`] once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one `<recipient>.json` file per mailbox.
    pub base_dir: PathBuf,
    /// KDF parameters recorded in newly created mailboxes.
    #[serde(default = "KdfParams::build_default")]
    pub kdf: KdfParams,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
    /// Lock files older than this are assumed abandoned by a crashed writer.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            kdf: KdfParams::build_default(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            lock_retry_interval_ms: DEFAULT_LOCK_RETRY_MS,
            stale_lock_secs: DEFAULT_STALE_LOCK_SECS,
        }
    }

    /// Configuration rooted at the platform data directory.
    pub fn default_location() -> Result<Self, MailboxError> {
        Ok(Self::new(paths::default_base_dir()?))
    }

    /// Read a JSON configuration file. Only `base_dir` is required.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MailboxError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| MailboxError::Config(format!("read {}: {e}", path.display())))?;
        let config: StoreConfig = serde_json::from_str(&json)
            .map_err(|e| MailboxError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn validate(&self) -> Result<(), MailboxError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(MailboxError::Config("base_dir cannot be empty".into()));
        }
        self.kdf
            .provider()
            .map_err(|e| MailboxError::Config(format!("kdf: {e}")))?;
        if self.lock_timeout_ms == 0 || self.lock_retry_interval_ms == 0 {
            return Err(MailboxError::Config("lock timeouts must be non-zero".into()));
        }
        if self.stale_lock_secs == 0 {
            return Err(MailboxError::Config("stale_lock_secs must be non-zero".into()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_lock_retry_interval_ms() -> u64 {
    DEFAULT_LOCK_RETRY_MS
}

fn default_stale_lock_secs() -> u64 {
    DEFAULT_STALE_LOCK_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        fs::write(&path, r#"{"base_dir": "/var/lib/mailb0x"}"#).unwrap();
        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config, StoreConfig::new("/var/lib/mailb0x"));
        assert_eq!(config.kdf, KdfParams::build_default());
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn load_reads_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        fs::write(
            &path,
            r#"{"base_dir": "boxes", "kdf": {"iterations": 900000}, "lock_timeout_ms": 50}"#,
        )
        .unwrap();
        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.kdf, KdfParams::Pbkdf2Sha256 { iterations: 900_000 });
        assert_eq!(config.lock_timeout_ms, 50);
        assert_eq!(config.stale_lock_secs, DEFAULT_STALE_LOCK_SECS);
    }

    #[test]
    fn invalid_files_are_config_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            StoreConfig::load(dir.path().join("missing.json")),
            Err(MailboxError::Config(_))
        ));

        let path = dir.path().join("weak.json");
        fs::write(&path, r#"{"base_dir": "boxes", "kdf": {"iterations": 1000}}"#).unwrap();
        assert!(matches!(StoreConfig::load(&path), Err(MailboxError::Config(_))));
    }

    #[test]
    fn argon2_costs_out_of_bounds_are_config_errors() {
        for kdf in [
            KdfParams::Argon2id {
                t_cost: 1,
                m_cost: 8,
                p_cost: 1,
            },
            KdfParams::Argon2id {
                t_cost: 3,
                m_cost: u32::MAX,
                p_cost: 4,
            },
        ] {
            let config = StoreConfig::new("boxes").with_kdf(kdf);
            assert!(matches!(config.validate(), Err(MailboxError::Config(_))));
        }
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = StoreConfig::new("boxes");
        config.lock_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(MailboxError::Config(_))));
    }
}
