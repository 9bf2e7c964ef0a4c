//! # Client Pre-flight Validation
//!
//! Runs on the client before a batch is submitted, so obviously bad edits
//! never leave the machine.
//!
//! The checks mirror the server's with two differences:
//! - every change must be authored by the local player (the client has no
//!   view of delegated build rights);
//! - exceeding the rate limit is a hard failure here. The server only logs it.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;
use crate::error::ValidationError;
use crate::protocol::VoxelChange;
use crate::validation::{ChangeValidator, RateLimiter};

/// Outcome of a pre-flight pass over a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreflightReport {
    /// Changes cleared for submission, in input order.
    pub accepted: Vec<VoxelChange>,
    /// Changes held back, with the reason.
    pub rejected: Vec<(VoxelChange, ValidationError)>,
}

impl PreflightReport {
    /// Returns true if every change passed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Client-side validator for one local player.
#[derive(Debug)]
pub struct PreflightValidator {
    player_id: String,
    checks: ChangeValidator,
    limiter: RateLimiter,
}

impl PreflightValidator {
    /// Creates a validator for the local player.
    #[must_use]
    pub fn new(player_id: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            player_id: player_id.into(),
            checks: ChangeValidator::new(config),
            limiter: RateLimiter::from_config(config),
        }
    }

    /// Checks one change and, if it passes, counts it against the rate limit.
    ///
    /// # Errors
    ///
    /// Returns the reason the change may not be submitted.
    pub fn check(&mut self, change: &VoxelChange, now: DateTime<Utc>, clock: Instant) -> Result<(), ValidationError> {
        let validated = self.checks.check_shape(change, now)?;
        if validated.player_id != self.player_id {
            return Err(ValidationError::InvalidPayload(format!(
                "change authored by {} cannot be submitted by {}",
                validated.player_id, self.player_id
            )));
        }
        self.limiter.try_admit(clock)
    }

    /// Checks a batch in order.
    #[must_use]
    pub fn check_batch(&mut self, changes: &[VoxelChange]) -> PreflightReport {
        let now = Utc::now();
        let clock = Instant::now();
        let mut report = PreflightReport::default();
        for change in changes {
            match self.check(change, now, clock) {
                Ok(()) => report.accepted.push(change.clone()),
                Err(reason) => report.rejected.push((change.clone(), reason)),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyhold_voxel::Vector3;

    fn edit(player: &str, x: f64) -> VoxelChange {
        VoxelChange::block(player, Vector3::new(x, 1.0, 0.0), 0, 1, Utc::now())
    }

    #[test]
    fn test_rate_limit_is_hard() {
        let config = SyncConfig {
            max_changes_per_window: 3,
            rate_window_ms: 60_000,
            ..SyncConfig::default()
        };
        let mut preflight = PreflightValidator::new("p1", &config);
        let batch: Vec<_> = (0..5).map(|i| edit("p1", f64::from(i))).collect();

        let report = preflight.check_batch(&batch);
        assert_eq!(report.accepted.len(), 3);
        assert_eq!(report.rejected.len(), 2);
        assert!(matches!(report.rejected[0].1, ValidationError::RateLimited { limit: 3, .. }));
    }

    #[test]
    fn test_foreign_author_held_back() {
        let mut preflight = PreflightValidator::new("p1", &SyncConfig::default());
        let report = preflight.check_batch(&[edit("p2", 0.0), edit("p1", 0.0)]);
        assert_eq!(report.accepted.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_shape_failures_do_not_consume_budget() {
        let config = SyncConfig {
            max_changes_per_window: 1,
            rate_window_ms: 60_000,
            ..SyncConfig::default()
        };
        let mut preflight = PreflightValidator::new("p1", &config);
        let report = preflight.check_batch(&[edit("p1", 5000.0), edit("p1", 0.0)]);
        assert!(matches!(report.rejected[0].1, ValidationError::OutOfBounds(_)));
        assert_eq!(report.accepted.len(), 1);
    }
}
