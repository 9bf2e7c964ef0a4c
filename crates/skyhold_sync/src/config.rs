//! # Sync Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so a
//! partial file (or none at all) is valid.
//!
//! ```toml
//! world_horizontal_extent = 1000
//! max_changes_per_window = 50
//! rate_window_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{SyncError, SyncResult};

/// Runtime configuration for the synchronization service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Largest allowed `|x|` and `|z|`.
    pub world_horizontal_extent: i32,
    /// Lowest allowed `y` (inclusive).
    pub min_height: i32,
    /// Highest allowed `y` (inclusive).
    pub max_height: i32,
    /// Changes per rate window before a player is flagged.
    pub max_changes_per_window: usize,
    /// Rate window length in milliseconds.
    pub rate_window_ms: u64,
    /// How far in the future a change timestamp may be.
    pub max_clock_skew_secs: i64,
    /// Pending changes allowed in one request.
    pub max_pending_changes: usize,
    /// Idle time before a player session is evicted.
    pub session_idle_timeout_secs: u64,
    /// Idle time before a resident chunk is released.
    pub chunk_idle_timeout_secs: u64,
    /// Event name used for zone broadcasts.
    pub broadcast_event: String,
    /// Capacity of the broadcast dispatch queue.
    pub broadcast_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            world_horizontal_extent: 1000,
            min_height: 0,
            max_height: 256,
            max_changes_per_window: 50,
            rate_window_ms: 1000,
            max_clock_skew_secs: 300,
            max_pending_changes: 512,
            session_idle_timeout_secs: 900,
            chunk_idle_timeout_secs: 300,
            broadcast_event: "world_update".to_string(),
            broadcast_queue_capacity: 1024,
        }
    }
}

impl SyncConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] on a parse error or invalid values.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first bad value.
    pub fn validate(&self) -> SyncResult<()> {
        if self.world_horizontal_extent < 0 {
            return Err(SyncError::Config("world_horizontal_extent must be >= 0".into()));
        }
        if self.min_height > self.max_height {
            return Err(SyncError::Config(format!(
                "min_height {} is above max_height {}",
                self.min_height, self.max_height
            )));
        }
        if self.rate_window_ms == 0 {
            return Err(SyncError::Config("rate_window_ms must be > 0".into()));
        }
        if self.max_pending_changes == 0 {
            return Err(SyncError::Config("max_pending_changes must be > 0".into()));
        }
        if self.broadcast_queue_capacity == 0 {
            return Err(SyncError::Config("broadcast_queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Rate window as a duration.
    #[must_use]
    pub const fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    /// Session idle timeout as a duration.
    #[must_use]
    pub const fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Chunk idle timeout as a duration.
    #[must_use]
    pub const fn chunk_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(SyncConfig::from_toml_str("").unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = SyncConfig::from_toml_str("max_changes_per_window = 5\nbroadcast_event = \"edits\"").unwrap();
        assert_eq!(config.max_changes_per_window, 5);
        assert_eq!(config.broadcast_event, "edits");
        assert_eq!(config.max_height, 256);
    }

    #[test]
    fn test_rejects_inverted_heights() {
        let err = SyncConfig::from_toml_str("min_height = 10\nmax_height = 5").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(SyncConfig::from_toml_str("tick_rate = 60").is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/skyhold_sync.toml");
        let config = SyncConfig::load(path).unwrap();
        assert_eq!(config.max_height, 256);
    }
}
