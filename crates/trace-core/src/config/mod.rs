//! Runtime options for the session and sync layers.
//!
//! None of these values are secret; the access token and master password are
//! never part of configuration.

use std::time::Duration;

use crate::crypto::CalibrationOptions;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_BRANCH: &str = "master";

const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_SECS: u64 = 30;
const DEFAULT_METADATA_RETRIES: u32 = 2;
const DEFAULT_LOCK_DAYS: i64 = 7;

/// Options for the sync engine and auto-sync scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound for every network attempt.
    pub timeout: Duration,
    /// Quiet period before an auto-sync push fires.
    pub debounce: Duration,
    /// Extra attempts for the metadata index write after a sha mismatch.
    pub metadata_retries: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
            debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            metadata_retries: DEFAULT_METADATA_RETRIES,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// How KDF iterations are chosen when a new password is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdfStrategy {
    /// Measure this device and target a fixed derivation time.
    Calibrate(CalibrationOptions),
    /// Use a fixed iteration count.
    Fixed(u32),
}

/// Options for the auth/session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Days an unlock stays valid before the password is required again.
    pub lock_days: i64,
    pub kdf: KdfStrategy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            lock_days: DEFAULT_LOCK_DAYS,
            kdf: KdfStrategy::Calibrate(CalibrationOptions::default()),
        }
    }
}

impl SessionOptions {
    /// Lock window in milliseconds.
    pub const fn lock_window_ms(&self) -> i64 {
        self.lock_days.saturating_mul(24 * 60 * 60 * 1000)
    }
}

/// Where the contents API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub api_base: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl RemoteSettings {
    /// Build settings from an optional override, falling back to the public API.
    pub fn from_override(api_base: Option<String>) -> Result<Self> {
        let Some(api_base) = normalize_text_option(api_base) else {
            return Ok(Self::default());
        };
        if !is_http_url(&api_base) {
            return Err(Error::Validation(
                "API base must include http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_options_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.debounce, Duration::from_secs(30));
        assert_eq!(options.metadata_retries, 2);
    }

    #[test]
    fn lock_window_is_seven_days() {
        let options = SessionOptions::default();
        assert_eq!(options.lock_window_ms(), 7 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn remote_settings_override() {
        assert_eq!(
            RemoteSettings::from_override(None).unwrap().api_base,
            DEFAULT_API_BASE
        );
        assert_eq!(
            RemoteSettings::from_override(Some(" https://git.example.com/api/v3/ ".to_string()))
                .unwrap()
                .api_base,
            "https://git.example.com/api/v3"
        );
        assert!(RemoteSettings::from_override(Some("git.example.com".to_string())).is_err());
    }
}
