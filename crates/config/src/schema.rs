//! Config schema types.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsmConfig {
    pub sessions: SessionsConfig,
}

/// Session retention and automatic cleanup.
///
/// Zero or negative limits disable the corresponding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Run the background cleanup scheduler in interactive commands.
    #[serde(alias = "autoCleanupEnabled")]
    pub auto_cleanup_enabled: bool,

    /// Remove idle sessions not updated for this many days.
    #[serde(alias = "maxAgeDays")]
    pub max_age_days: i64,

    /// Keep at most this many idle sessions.
    #[serde(alias = "maxCount")]
    pub max_count: i64,

    /// Keep the total size of all sessions under this many MiB.
    #[serde(alias = "maxSizeMB", alias = "maxSizeMb")]
    pub max_size_mb: i64,

    /// Hours between scheduled cleanups; zero or less runs once at start-up.
    #[serde(alias = "cleanupIntervalHours")]
    pub cleanup_interval_hours: i64,

    /// Override the sessions directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            auto_cleanup_enabled: true,
            max_age_days: 90,
            max_count: 100,
            max_size_mb: 500,
            cleanup_interval_hours: 24,
            dir: None,
        }
    }
}

impl SessionsConfig {
    /// Interval between scheduled cleanups, if recurring cleanup is on.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_hours > 0)
            .then(|| Duration::from_secs((self.cleanup_interval_hours as u64).saturating_mul(3600)))
    }
}
