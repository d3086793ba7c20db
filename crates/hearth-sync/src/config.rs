//! Sync layer configuration, loaded from TOML.

use crate::queue::QueueConfig;
use hearth_types::{HearthError, HearthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a sync service instance.
///
/// All fields have defaults, so a missing or partial file still yields a
/// working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the background loop refreshes, in seconds.
    pub interval_secs: u64,
    /// Deadline for a single external request, in seconds.
    pub request_timeout_secs: u64,
    /// Queue pacing and retry settings.
    pub queue: QueueConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            request_timeout_secs: 15,
            queue: QueueConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> HearthResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            HearthError::Serialization(format!("invalid config at {}: {e}", path.display()))
        })
    }

    /// The refresh interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The per-request deadline as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.interval_secs, 120);
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.backoff_base_ms, 1_000);
    }

    #[test]
    fn test_load_missing_file_is_defaults() {
        let config = SyncConfig::load(Path::new("/nonexistent/sync.toml")).unwrap();
        assert_eq!(config.interval_secs, 120);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(
            &path,
            "interval_secs = 60\n\n[queue]\nmax_attempts = 5\n",
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.queue.jitter_max_ms, 1_500);
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "interval_secs = \"not a number\"").unwrap();
        assert!(SyncConfig::load(&path).is_err());
    }
}
