//! # Change Validation
//!
//! Server-side validation of client-submitted changes.
//!
//! ## Philosophy
//!
//! NEVER trust the client. Each pending change is checked on its own:
//! 1. Is it well formed (integer position, block ids in range, author set)?
//! 2. Is it inside the world?
//! 3. Is the requester allowed to submit it?
//!
//! A failure rejects that one change; its siblings carry on.
//!
//! Rate limiting lives here too. The authoritative path only reports a
//! breach ([`RateVerdict`]) and keeps going; the client pre-flight
//! validator turns the same condition into a hard failure.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use skyhold_voxel::{BlockPos, Vector3};

use crate::collaborators::PermissionService;
use crate::config::SyncConfig;
use crate::error::{SyncError, ValidationError};
use crate::protocol::{ChangeKind, ChangePayload, ChangeValue, VoxelChange};

/// Player-state fields a client may never write directly.
///
/// Identity is fixed and inventory/currency only move through
/// server-authoritative inventory changes.
const PROTECTED_FIELDS: [&str; 3] = ["playerId", "inventory", "currency"];

/// A change that passed validation.
///
/// Positions are exact integers and block ids are bytes from here on.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedChange {
    /// World position.
    pub position: BlockPos,
    /// Block id the client believed was there.
    pub old_block_id: u8,
    /// Block id the client wants there.
    pub new_block_id: u8,
    /// When the client made the edit.
    pub timestamp: DateTime<Utc>,
    /// Author.
    pub player_id: String,
    /// Category payload.
    pub payload: ChangePayload,
}

impl ValidatedChange {
    /// Deterministic change id: `"{playerId}:{x}_{y}_{z}:{timestampMillis}"`.
    #[must_use]
    pub fn change_id(&self) -> String {
        format!(
            "{}:{}_{}_{}:{}",
            self.player_id,
            self.position.x,
            self.position.y,
            self.position.z,
            self.timestamp.timestamp_millis()
        )
    }

    /// Change category.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        self.payload.kind()
    }

    /// The value this change proposes.
    #[must_use]
    pub fn client_value(&self) -> ChangeValue {
        match &self.payload {
            ChangePayload::Voxel => ChangeValue::Block(self.new_block_id),
            ChangePayload::Inventory { stack, .. } => ChangeValue::Stack(*stack),
            ChangePayload::PlayerState { fields } => ChangeValue::Fields(fields.clone()),
        }
    }

    /// Returns the wire form of this change.
    #[must_use]
    pub fn to_wire(&self) -> VoxelChange {
        VoxelChange {
            position: Vector3::from(self.position),
            old_block_id: f64::from(self.old_block_id),
            new_block_id: f64::from(self.new_block_id),
            timestamp: self.timestamp,
            player_id: self.player_id.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Stateless per-change checks shared by the server and pre-flight paths.
#[derive(Clone, Debug)]
pub struct ChangeValidator {
    horizontal_extent: i32,
    min_height: i32,
    max_height: i32,
    max_clock_skew: chrono::Duration,
}

impl ChangeValidator {
    /// Creates a validator from the configuration.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            horizontal_extent: config.world_horizontal_extent,
            min_height: config.min_height,
            max_height: config.max_height,
            max_clock_skew: chrono::Duration::seconds(config.max_clock_skew_secs),
        }
    }

    /// Structural and bounds checks. Needs no collaborator.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn check_shape(&self, change: &VoxelChange, now: DateTime<Utc>) -> Result<ValidatedChange, ValidationError> {
        let Vector3 { x, y, z } = change.position;
        let position = change
            .position
            .to_block_pos()
            .ok_or(ValidationError::NonIntegralPosition { x, y, z })?;

        if !self.in_bounds(position) {
            return Err(ValidationError::OutOfBounds(position));
        }

        let old_block_id = block_id("oldBlockId", change.old_block_id)?;
        let new_block_id = block_id("newBlockId", change.new_block_id)?;

        if change.player_id.trim().is_empty() {
            return Err(ValidationError::EmptyPlayerId);
        }

        let ahead = change.timestamp - now;
        if ahead > self.max_clock_skew {
            return Err(ValidationError::FutureTimestamp {
                ahead_secs: ahead.num_seconds(),
            });
        }

        check_payload(&change.payload)?;

        Ok(ValidatedChange {
            position,
            old_block_id,
            new_block_id,
            timestamp: change.timestamp,
            player_id: change.player_id.clone(),
            payload: change.payload.clone(),
        })
    }

    /// Full authoritative validation: shape plus authorization.
    ///
    /// - Block edits need build rights for the requester at the position,
    ///   whoever the change names as author. Rights cover the requester's
    ///   own island and islands whose owner granted them.
    /// - Inventory and player-state changes write the author's record, so
    ///   the author must be the requester. Build rights never extend to
    ///   another player's record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] or [`SyncError::Permission`].
    pub fn validate(
        &self,
        change: &VoxelChange,
        requester: &str,
        now: DateTime<Utc>,
        permissions: &dyn PermissionService,
    ) -> Result<ValidatedChange, SyncError> {
        let validated = self.check_shape(change, now)?;
        let allowed = match validated.kind() {
            ChangeKind::Voxel => permissions.can_modify(requester, validated.position),
            ChangeKind::Inventory | ChangeKind::PlayerState => validated.player_id == requester,
        };
        if !allowed {
            return Err(SyncError::Permission {
                requester: requester.to_string(),
                author: validated.player_id,
                position: validated.position,
            });
        }
        Ok(validated)
    }

    fn in_bounds(&self, pos: BlockPos) -> bool {
        let extent = self.horizontal_extent;
        (-extent..=extent).contains(&pos.x)
            && (-extent..=extent).contains(&pos.z)
            && (self.min_height..=self.max_height).contains(&pos.y)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn block_id(field: &'static str, value: f64) -> Result<u8, ValidationError> {
    if value.is_finite() && value.fract() == 0.0 && (0.0..=255.0).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ValidationError::InvalidBlockId { field, value })
    }
}

fn check_payload(payload: &ChangePayload) -> Result<(), ValidationError> {
    match payload {
        ChangePayload::Voxel | ChangePayload::Inventory { .. } => Ok(()),
        ChangePayload::PlayerState { fields } => {
            if fields.is_empty() {
                return Err(ValidationError::InvalidPayload("player-state change has no fields".into()));
            }
            if let Some(field) = PROTECTED_FIELDS.iter().find(|f| fields.contains_key(**f)) {
                return Err(ValidationError::InvalidPayload(format!("field {field} is server-owned")));
            }
            Ok(())
        }
    }
}

/// Result of recording changes against a rate limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateVerdict {
    /// Under the limit.
    Within,
    /// Over the limit.
    Exceeded {
        /// Changes counted in the current window.
        count: usize,
        /// Allowed changes per window.
        limit: usize,
    },
}

/// Sliding-window change counter for one player.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    window: Duration,
    limit: usize,
    events: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` changes per `window`.
    #[must_use]
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            events: VecDeque::new(),
        }
    }

    /// Creates a limiter from the configuration.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.rate_window(), config.max_changes_per_window)
    }

    /// Records `count` changes and reports whether the window overflowed.
    ///
    /// Changes are recorded either way (advisory use).
    pub fn record(&mut self, now: Instant, count: usize) -> RateVerdict {
        self.prune(now);
        self.events.extend(std::iter::repeat(now).take(count));
        if self.events.len() > self.limit {
            RateVerdict::Exceeded {
                count: self.events.len(),
                limit: self.limit,
            }
        } else {
            RateVerdict::Within
        }
    }

    /// Admits one change if the window has room (hard use).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::RateLimited`] without recording the
    /// change if the window is full.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), ValidationError> {
        self.prune(now);
        if self.events.len() >= self.limit {
            return Err(ValidationError::RateLimited {
                count: self.events.len() + 1,
                limit: self.limit,
            });
        }
        self.events.push_back(now);
        Ok(())
    }

    /// Changes currently counted in the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        self.events.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.events.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ItemStack;
    use serde_json::{Map, Value};

    struct DenyAll;

    impl PermissionService for DenyAll {
        fn can_modify(&self, _player_id: &str, _position: BlockPos) -> bool {
            false
        }
    }

    struct AllowAll;

    impl PermissionService for AllowAll {
        fn can_modify(&self, _player_id: &str, _position: BlockPos) -> bool {
            true
        }
    }

    fn validator() -> ChangeValidator {
        ChangeValidator::new(&SyncConfig::default())
    }

    fn change(x: f64, y: f64, z: f64) -> VoxelChange {
        VoxelChange::block("p1", Vector3::new(x, y, z), 0, 3, Utc::now())
    }

    #[test]
    fn test_valid_change() {
        let v = validator().validate(&change(5.0, 1.0, 5.0), "p1", Utc::now(), &AllowAll).unwrap();
        assert_eq!(v.position, BlockPos::new(5, 1, 5));
        assert_eq!(v.new_block_id, 3);
        assert_eq!(v.kind(), ChangeKind::Voxel);
    }

    #[test]
    fn test_bounds() {
        let v = validator();
        let now = Utc::now();
        assert!(v.check_shape(&change(1000.0, 256.0, -1000.0), now).is_ok());
        assert!(v.check_shape(&change(0.0, 0.0, 0.0), now).is_ok());
        for (x, y, z) in [(1001.0, 1.0, 0.0), (0.0, 257.0, 0.0), (0.0, -1.0, 0.0), (0.0, 1.0, -1001.0)] {
            assert!(matches!(v.check_shape(&change(x, y, z), now), Err(ValidationError::OutOfBounds(_))));
        }
    }

    #[test]
    fn test_structural_failures() {
        let v = validator();
        let now = Utc::now();
        assert!(matches!(
            v.check_shape(&change(1.5, 1.0, 1.0), now),
            Err(ValidationError::NonIntegralPosition { .. })
        ));

        let mut bad_id = change(1.0, 1.0, 1.0);
        bad_id.new_block_id = 256.0;
        assert!(matches!(v.check_shape(&bad_id, now), Err(ValidationError::InvalidBlockId { .. })));
        bad_id.new_block_id = 2.5;
        assert!(matches!(v.check_shape(&bad_id, now), Err(ValidationError::InvalidBlockId { .. })));

        let mut anonymous = change(1.0, 1.0, 1.0);
        anonymous.player_id = "  ".into();
        assert_eq!(v.check_shape(&anonymous, now), Err(ValidationError::EmptyPlayerId));

        let mut future = change(1.0, 1.0, 1.0);
        future.timestamp = now + chrono::Duration::hours(1);
        assert!(matches!(v.check_shape(&future, now), Err(ValidationError::FutureTimestamp { .. })));
    }

    #[test]
    fn test_authorship() {
        let v = validator();
        let foreign = VoxelChange::block("p2", Vector3::new(1.0, 1.0, 1.0), 0, 1, Utc::now());
        assert!(matches!(
            v.validate(&foreign, "p1", Utc::now(), &DenyAll),
            Err(SyncError::Permission { .. })
        ));
        assert!(v.validate(&foreign, "p1", Utc::now(), &AllowAll).is_ok());
    }

    #[test]
    fn test_block_edits_need_build_rights_for_any_author() {
        let v = validator();
        let own = change(1.0, 1.0, 1.0);
        assert!(matches!(
            v.validate(&own, "p1", Utc::now(), &DenyAll),
            Err(SyncError::Permission { .. })
        ));
        assert!(v.validate(&own, "p1", Utc::now(), &AllowAll).is_ok());
    }

    #[test]
    fn test_records_only_writable_by_their_owner() {
        let v = validator();
        let mut fields = Map::new();
        fields.insert("title".into(), Value::from("Thief"));
        let payloads = [
            ChangePayload::Inventory { slot: 0, stack: ItemStack::new(999, 64) },
            ChangePayload::PlayerState { fields },
        ];
        for payload in payloads {
            let mut forged = change(1.0, 1.0, 1.0).with_payload(payload);
            forged.player_id = "p2".into();
            assert!(matches!(
                v.validate(&forged, "p1", Utc::now(), &AllowAll),
                Err(SyncError::Permission { .. })
            ));
            assert!(v.validate(&forged, "p2", Utc::now(), &DenyAll).is_ok());
        }
    }

    #[test]
    fn test_player_state_payload_rules() {
        let v = validator();
        let mut fields = Map::new();
        fields.insert("currency".into(), Value::from(1_000_000));
        let grab = change(1.0, 1.0, 1.0).with_payload(ChangePayload::PlayerState { fields });
        assert!(matches!(v.check_shape(&grab, Utc::now()), Err(ValidationError::InvalidPayload(_))));

        let empty = change(1.0, 1.0, 1.0).with_payload(ChangePayload::PlayerState { fields: Map::new() });
        assert!(v.check_shape(&empty, Utc::now()).is_err());

        let stack = change(1.0, 1.0, 1.0).with_payload(ChangePayload::Inventory {
            slot: 0,
            stack: ItemStack::new(4, 1),
        });
        assert_eq!(v.check_shape(&stack, Utc::now()).unwrap().client_value(), ChangeValue::Stack(ItemStack::new(4, 1)));
    }

    #[test]
    fn test_change_id_and_wire_form() {
        let wire = change(-3.0, 10.0, 7.0);
        let v = validator().check_shape(&wire, Utc::now()).unwrap();
        assert_eq!(v.change_id(), format!("p1:-3_10_7:{}", wire.timestamp.timestamp_millis()));
        assert_eq!(v.to_wire(), wire);
    }

    #[test]
    fn test_rate_limiter_window() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_millis(100), 3);
        assert_eq!(limiter.record(start, 3), RateVerdict::Within);
        assert_eq!(limiter.record(start, 1), RateVerdict::Exceeded { count: 4, limit: 3 });
        assert_eq!(limiter.record(start + Duration::from_millis(150), 1), RateVerdict::Within);
        assert_eq!(limiter.in_window(), 1);
    }

    #[test]
    fn test_rate_limiter_hard_admission() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 2);
        assert!(limiter.try_admit(start).is_ok());
        assert!(limiter.try_admit(start).is_ok());
        assert!(matches!(limiter.try_admit(start), Err(ValidationError::RateLimited { .. })));
        assert_eq!(limiter.in_window(), 2);
        assert!(limiter.try_admit(start + Duration::from_secs(1)).is_ok());
    }
}
