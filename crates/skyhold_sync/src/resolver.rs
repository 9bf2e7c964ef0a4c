//! # Conflict Detection & Resolution
//!
//! A pending change conflicts with an authorized change when both have the
//! same target and the authorized one is newer than the client's last sync.
//! An authorized change with the very same change id is always a conflict:
//! that is a retry.
//!
//! ## Targets
//!
//! | Kind          | Target                          |
//! |---------------|---------------------------------|
//! | `Voxel`       | the integer block position      |
//! | `Inventory`   | the inventory slot              |
//! | `PlayerState` | the player record as a whole    |
//!
//! The position on inventory and player-state changes means nothing for
//! conflicts.
//!
//! ## Policy
//!
//! | Kind          | On conflict   | Why it matters                  |
//! |---------------|---------------|---------------------------------|
//! | `Voxel`       | `server_wins` | block duplication, griefing     |
//! | `Inventory`   | `server_wins` | item duplication                |
//! | `PlayerState` | `merge`       | client wins per field           |
//!
//! A retry resolves to `server_wins` for every kind, so nothing is applied
//! or logged twice.
//!
//! Each kind has one [`ConflictResolver`]; [`resolve`] dispatches with an
//! exhaustive match, so adding a kind without a resolver does not compile.

use chrono::{DateTime, Utc};

use crate::collaborators::PlayerRecord;
use crate::protocol::{ChangeKind, ChangePayload, ChangeValue, ConflictResolution, ResolutionKind};
use crate::validation::ValidatedChange;

/// A change together with the decision taken about it.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    /// The change as submitted.
    pub change: ValidatedChange,
    /// The decision.
    pub resolution: ConflictResolution,
    /// False for the trivial `client_wins` of a change nobody contested.
    pub conflicted: bool,
}

impl Resolved {
    /// Returns true if the change must be written.
    ///
    /// `server_wins` needs no write: the server already holds the value.
    #[must_use]
    pub fn needs_write(&self) -> bool {
        matches!(self.resolution.resolution, ResolutionKind::ClientWins | ResolutionKind::Merge)
    }

    fn uncontested(change: ValidatedChange) -> Self {
        let client_value = change.client_value();
        let resolution = ConflictResolution {
            change_id: change.change_id(),
            resolution: ResolutionKind::ClientWins,
            server_value: None,
            resolved_value: Some(client_value.clone()),
            client_value,
            reason: "no conflicting authorized change".to_string(),
        };
        Self {
            change,
            resolution,
            conflicted: false,
        }
    }

    fn server_wins(change: &ValidatedChange, server_value: ChangeValue, reason: String) -> Self {
        let resolution = ConflictResolution {
            change_id: change.change_id(),
            resolution: ResolutionKind::ServerWins,
            server_value: Some(server_value.clone()),
            client_value: change.client_value(),
            resolved_value: Some(server_value),
            reason,
        };
        Self {
            change: change.clone(),
            resolution,
            conflicted: true,
        }
    }
}

/// Resolution policy for one change kind.
pub trait ConflictResolver {
    /// The kind this resolver handles.
    fn kind(&self) -> ChangeKind;

    /// The authoritative value the change competes with.
    fn server_value(&self, change: &ValidatedChange, existing: &ValidatedChange, player: &PlayerRecord) -> ChangeValue;

    /// Decides a conflict between `change` and the authorized `existing`.
    fn resolve(&self, change: &ValidatedChange, existing: &ValidatedChange, player: &PlayerRecord) -> Resolved;
}

/// Block edits: the authorized block stands.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoxelResolver;

impl ConflictResolver for VoxelResolver {
    fn kind(&self) -> ChangeKind {
        ChangeKind::Voxel
    }

    fn server_value(&self, _change: &ValidatedChange, existing: &ValidatedChange, _player: &PlayerRecord) -> ChangeValue {
        ChangeValue::Block(existing.new_block_id)
    }

    fn resolve(&self, change: &ValidatedChange, existing: &ValidatedChange, player: &PlayerRecord) -> Resolved {
        let reason = format!(
            "block at {} was set by {} after the last sync",
            change.position, existing.player_id
        );
        Resolved::server_wins(change, self.server_value(change, existing, player), reason)
    }
}

/// Inventory slots: the directory's current stack stands.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryResolver;

impl ConflictResolver for InventoryResolver {
    fn kind(&self) -> ChangeKind {
        ChangeKind::Inventory
    }

    fn server_value(&self, change: &ValidatedChange, existing: &ValidatedChange, player: &PlayerRecord) -> ChangeValue {
        let slot = match (&change.payload, &existing.payload) {
            (ChangePayload::Inventory { slot, .. }, _) | (_, ChangePayload::Inventory { slot, .. }) => *slot,
            _ => 0,
        };
        ChangeValue::Stack(player.slot(slot))
    }

    fn resolve(&self, change: &ValidatedChange, existing: &ValidatedChange, player: &PlayerRecord) -> Resolved {
        let reason = format!("inventory was changed by {} after the last sync", existing.player_id);
        Resolved::server_wins(change, self.server_value(change, existing, player), reason)
    }
}

/// Player-state fields: server fields overlaid with the client's.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlayerStateResolver;

impl ConflictResolver for PlayerStateResolver {
    fn kind(&self) -> ChangeKind {
        ChangeKind::PlayerState
    }

    fn server_value(&self, _change: &ValidatedChange, _existing: &ValidatedChange, player: &PlayerRecord) -> ChangeValue {
        ChangeValue::Fields(player.to_fields())
    }

    fn resolve(&self, change: &ValidatedChange, existing: &ValidatedChange, player: &PlayerRecord) -> Resolved {
        let server = player.to_fields();
        let mut merged = server.clone();
        if let ChangePayload::PlayerState { fields } = &change.payload {
            merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        // The stored change keeps only the client's fields; storage overlays
        // them on the live record, which may have moved since `player` was read.
        let resolution = ConflictResolution {
            change_id: change.change_id(),
            resolution: ResolutionKind::Merge,
            server_value: Some(ChangeValue::Fields(server)),
            client_value: change.client_value(),
            resolved_value: Some(ChangeValue::Fields(merged)),
            reason: format!("merged over fields written by {}", existing.player_id),
        };
        Resolved {
            change: change.clone(),
            resolution,
            conflicted: true,
        }
    }
}

/// Finds the authorized change `change` competes with, if any.
///
/// `log` is the player's authorized history; `batch` holds changes already
/// accepted earlier in the same request. Within a batch only exact retries
/// collide, so a client may edit the same block twice in one sync.
#[must_use]
pub fn detect_conflict<'a>(
    log: &'a [ValidatedChange],
    batch: &'a [ValidatedChange],
    change: &ValidatedChange,
    last_sync: DateTime<Utc>,
) -> Option<&'a ValidatedChange> {
    let change_id = change.change_id();
    let kind = change.kind();

    if let Some(dup) = batch.iter().rev().find(|e| e.change_id() == change_id && e.kind() == kind) {
        return Some(dup);
    }

    log.iter().rev().find(|entry| {
        same_target(entry, change) && (entry.timestamp > last_sync || entry.change_id() == change_id)
    })
}

/// Returns true if both changes write the same thing.
#[must_use]
pub fn same_target(a: &ValidatedChange, b: &ValidatedChange) -> bool {
    match (&a.payload, &b.payload) {
        (ChangePayload::Voxel, ChangePayload::Voxel) => a.position == b.position,
        (ChangePayload::Inventory { slot: x, .. }, ChangePayload::Inventory { slot: y, .. }) => x == y,
        (ChangePayload::PlayerState { .. }, ChangePayload::PlayerState { .. }) => true,
        _ => false,
    }
}

/// Resolves one change against the authorized change it competes with.
#[must_use]
pub fn resolve(change: ValidatedChange, existing: Option<&ValidatedChange>, player: &PlayerRecord) -> Resolved {
    let Some(existing) = existing else {
        return Resolved::uncontested(change);
    };

    let resolver: &dyn ConflictResolver = match change.kind() {
        ChangeKind::Voxel => &VoxelResolver,
        ChangeKind::Inventory => &InventoryResolver,
        ChangeKind::PlayerState => &PlayerStateResolver,
    };

    if existing.change_id() == change.change_id() && existing.payload == change.payload {
        let value = resolver.server_value(&change, existing, player);
        return Resolved::server_wins(&change, value, "change is already authorized".to_string());
    }

    resolver.resolve(&change, existing, player)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ItemStack;
    use serde_json::{Map, Value};
    use skyhold_voxel::BlockPos;

    fn at(player: &str, pos: BlockPos, block: u8, ts: DateTime<Utc>) -> ValidatedChange {
        ValidatedChange {
            position: pos,
            old_block_id: 0,
            new_block_id: block,
            timestamp: ts,
            player_id: player.to_string(),
            payload: ChangePayload::Voxel,
        }
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_newer_entry_conflicts() {
        let t0 = Utc::now();
        let pos = BlockPos::new(5, 1, 5);
        let log = vec![at("a", pos, 7, t0 + chrono::Duration::seconds(1))];
        let mine = at("b", pos, 3, t0 + chrono::Duration::seconds(2));

        let existing = detect_conflict(&log, &[], &mine, t0);
        assert!(existing.is_some());

        let resolved = resolve(mine, existing, &PlayerRecord::new("b"));
        assert_eq!(resolved.resolution.resolution, ResolutionKind::ServerWins);
        assert_eq!(resolved.resolution.server_value, Some(ChangeValue::Block(7)));
        assert_eq!(resolved.resolution.resolved_value, resolved.resolution.server_value);
        assert!(!resolved.needs_write());
    }

    #[test]
    fn test_old_entry_does_not_conflict() {
        let t0 = Utc::now();
        let pos = BlockPos::new(5, 1, 5);
        let log = vec![at("a", pos, 7, t0 - chrono::Duration::seconds(10))];
        let mine = at("b", pos, 3, t0);
        assert!(detect_conflict(&log, &[], &mine, t0).is_none());

        let resolved = resolve(mine, None, &PlayerRecord::new("b"));
        assert_eq!(resolved.resolution.resolution, ResolutionKind::ClientWins);
        assert!(resolved.resolution.server_value.is_none());
        assert!(!resolved.conflicted);
        assert!(resolved.needs_write());
    }

    #[test]
    fn test_retry_conflicts_even_when_older_than_last_sync() {
        let t0 = Utc::now();
        let change = at("a", BlockPos::new(1, 1, 1), 4, t0);
        let log = vec![change.clone()];

        let existing = detect_conflict(&log, &[], &change, t0 + chrono::Duration::seconds(30));
        let resolved = resolve(change, existing, &PlayerRecord::new("a"));
        assert_eq!(resolved.resolution.resolution, ResolutionKind::ServerWins);
        assert_eq!(resolved.resolution.reason, "change is already authorized");
    }

    #[test]
    fn test_kinds_do_not_cross() {
        let t0 = Utc::now();
        let pos = BlockPos::new(0, 0, 0);
        let log = vec![at("a", pos, 1, t0 + chrono::Duration::seconds(1))];
        let mut stack = at("a", pos, 0, t0 + chrono::Duration::seconds(2));
        stack.payload = ChangePayload::Inventory { slot: 0, stack: ItemStack::new(1, 1) };
        assert!(detect_conflict(&log, &[], &stack, t0).is_none());
    }

    #[test]
    fn test_same_block_twice_in_one_batch() {
        let t0 = Utc::now();
        let pos = BlockPos::new(2, 2, 2);
        let place = at("a", pos, 9, t0);
        let dig = at("a", pos, 0, t0 + chrono::Duration::milliseconds(5));
        assert!(detect_conflict(&[], std::slice::from_ref(&place), &dig, t0).is_none());
        assert!(detect_conflict(&[], std::slice::from_ref(&place), &place, t0).is_some());
    }

    #[test]
    fn test_inventory_keyed_by_slot_not_position() {
        let t0 = Utc::now();
        let stack = |pos: BlockPos, slot: u32, ts| {
            let mut change = at("a", pos, 0, ts);
            change.payload = ChangePayload::Inventory { slot, stack: ItemStack::new(5, 1) };
            change
        };
        let log = vec![stack(BlockPos::new(0, 0, 0), 3, t0 + chrono::Duration::seconds(1))];

        let same_slot_elsewhere = stack(BlockPos::new(40, 9, 2), 3, t0 + chrono::Duration::seconds(2));
        assert!(detect_conflict(&log, &[], &same_slot_elsewhere, t0).is_some());

        let other_slot_same_spot = stack(BlockPos::new(0, 0, 0), 4, t0 + chrono::Duration::seconds(2));
        assert!(detect_conflict(&log, &[], &other_slot_same_spot, t0).is_none());
    }

    #[test]
    fn test_player_state_keyed_by_record() {
        let t0 = Utc::now();
        let mut existing = at("a", BlockPos::new(1, 1, 1), 0, t0 + chrono::Duration::seconds(1));
        existing.payload = ChangePayload::PlayerState { fields: fields(&[("title", Value::from("Old"))]) };
        let mut mine = at("a", BlockPos::new(9, 9, 9), 0, t0 + chrono::Duration::seconds(2));
        mine.payload = ChangePayload::PlayerState { fields: fields(&[("motto", Value::from("Up"))]) };

        let log = vec![existing];
        assert!(detect_conflict(&log, &[], &mine, t0).is_some());
        assert!(!same_target(&log[0], &at("a", BlockPos::new(1, 1, 1), 0, t0)));
    }

    #[test]
    fn test_inventory_server_wins_with_directory_value() {
        let t0 = Utc::now();
        let mut existing = at("a", BlockPos::default(), 0, t0 + chrono::Duration::seconds(1));
        existing.payload = ChangePayload::Inventory { slot: 1, stack: ItemStack::new(5, 2) };
        let mut mine = existing.clone();
        mine.timestamp = t0 + chrono::Duration::seconds(2);
        mine.payload = ChangePayload::Inventory { slot: 1, stack: ItemStack::new(5, 64) };

        let mut player = PlayerRecord::new("a");
        player.inventory = vec![ItemStack::default(), ItemStack::new(5, 2)];

        let resolved = resolve(mine, Some(&existing), &player);
        assert_eq!(resolved.resolution.resolution, ResolutionKind::ServerWins);
        assert_eq!(resolved.resolution.resolved_value, Some(ChangeValue::Stack(ItemStack::new(5, 2))));
    }

    #[test]
    fn test_player_state_merges_per_field() {
        let t0 = Utc::now();
        let mut existing = at("a", BlockPos::default(), 0, t0 + chrono::Duration::seconds(1));
        existing.payload = ChangePayload::PlayerState { fields: fields(&[("title", Value::from("Old"))]) };
        let mut mine = existing.clone();
        mine.timestamp = t0 + chrono::Duration::seconds(2);
        mine.payload = ChangePayload::PlayerState { fields: fields(&[("title", Value::from("Builder"))]) };

        let mut player = PlayerRecord::new("a");
        player.currency = 12;
        player.extra.insert("title".into(), Value::from("Old"));

        let resolved = resolve(mine, Some(&existing), &player);
        assert_eq!(resolved.resolution.resolution, ResolutionKind::Merge);
        assert!(resolved.needs_write());
        let Some(ChangeValue::Fields(merged)) = resolved.resolution.resolved_value else {
            panic!("merge must resolve to fields");
        };
        assert_eq!(merged["title"], "Builder");
        assert_eq!(merged["currency"], 12);
    }
}
