//! # Sync Protocol
//!
//! The wire contract between island clients and the authoritative server.
//!
//! ## Shape
//!
//! ```text
//! CLIENT                                   SERVER
//!   |--- SyncRequest ------------------------>|
//!   |    playerId, clientVersion,              | validate
//!   |    lastSyncTimestamp, pendingChanges,    | detect conflicts
//!   |    requestedChunks                       | resolve + apply
//!   |<-- SyncResponse ------------------------|
//!   |    serverVersion, worldUpdates,          |
//!   |    playerUpdates, conflictResolutions,   |
//!   |    rejectedChanges, appliedChanges       |
//! ```
//!
//! Field names are camelCase and instants are RFC 3339 UTC on the wire.
//! Pending changes keep loose numeric fields so that a malformed change is
//! rejected on its own instead of failing the whole request decode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyhold_voxel::{ChunkCoordinate, Vector3, WorldChunk};

/// Category of a pending change. Each category has its own resolver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// A block edit.
    #[default]
    Voxel,
    /// An inventory slot mutation.
    Inventory,
    /// A generic player-state field update.
    PlayerState,
}

/// A stack of items in an inventory slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStack {
    /// The item type id, or 0 for an empty slot.
    pub item_id: u32,
    /// Number of items in this stack.
    pub count: u32,
}

impl ItemStack {
    /// Creates a new item stack.
    #[inline]
    #[must_use]
    pub const fn new(item_id: u32, count: u32) -> Self {
        Self { item_id, count }
    }
}

/// Kind-specific payload of a change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangePayload {
    /// Block edit; the block ids live on the change itself.
    #[default]
    Voxel,
    /// Set an inventory slot to a stack.
    #[serde(rename_all = "camelCase")]
    Inventory {
        /// Slot index.
        slot: u32,
        /// Stack the client wants in that slot.
        stack: ItemStack,
    },
    /// Overwrite a set of player-state fields.
    PlayerState {
        /// Field name to new value.
        fields: Map<String, Value>,
    },
}

impl ChangePayload {
    /// Returns the change category.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Voxel => ChangeKind::Voxel,
            Self::Inventory { .. } => ChangeKind::Inventory,
            Self::PlayerState { .. } => ChangeKind::PlayerState,
        }
    }
}

/// One client-proposed edit, as submitted on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoxelChange {
    /// World position of the edit.
    pub position: Vector3,
    /// Block id the client believes was there.
    pub old_block_id: f64,
    /// Block id the client wants there.
    pub new_block_id: f64,
    /// When the client made the edit.
    pub timestamp: DateTime<Utc>,
    /// Author of the edit.
    pub player_id: String,
    /// Category payload. Absent means a plain block edit.
    #[serde(default)]
    pub payload: ChangePayload,
}

impl VoxelChange {
    /// Creates a plain block edit.
    #[must_use]
    pub fn block(
        player_id: impl Into<String>,
        position: Vector3,
        old_block_id: u8,
        new_block_id: u8,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position,
            old_block_id: f64::from(old_block_id),
            new_block_id: f64::from(new_block_id),
            timestamp,
            player_id: player_id.into(),
            payload: ChangePayload::Voxel,
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: ChangePayload) -> Self {
        self.payload = payload;
        self
    }
}

/// A client's periodic synchronization request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Requesting player.
    pub player_id: String,
    /// Last server version the client applied.
    pub client_version: u64,
    /// Server timestamp of the client's last successful sync.
    pub last_sync_timestamp: DateTime<Utc>,
    /// Edits made since the last sync.
    #[serde(default)]
    pub pending_changes: Vec<VoxelChange>,
    /// Chunks the client wants a fresh copy of.
    #[serde(default)]
    pub requested_chunks: Vec<ChunkCoordinate>,
}

/// Outcome of a resolved change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// The authoritative value stands; the client change is discarded.
    ServerWins,
    /// The client change is applied as submitted.
    ClientWins,
    /// Server fields overlaid with client fields.
    Merge,
}

/// A value on either side of a resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeValue {
    /// A block id.
    Block(u8),
    /// An inventory stack.
    Stack(ItemStack),
    /// Player-state fields.
    Fields(Map<String, Value>),
}

/// How one change was resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    /// Id of the resolved change.
    pub change_id: String,
    /// Outcome.
    pub resolution: ResolutionKind,
    /// Authoritative value, if the server had one.
    pub server_value: Option<ChangeValue>,
    /// Value the client proposed.
    pub client_value: ChangeValue,
    /// Value that now stands.
    pub resolved_value: Option<ChangeValue>,
    /// Human-readable reason.
    pub reason: String,
}

/// Player fields that changed since the previous sync.
///
/// Absent fields are unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdates {
    /// Skill levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<BTreeMap<String, u32>>,
    /// Inventory slots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<ItemStack>>,
    /// Currency balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<i64>,
    /// Last login instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl PlayerUpdates {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_none() && self.inventory.is_none() && self.currency.is_none() && self.last_login.is_none()
    }
}

/// The authoritative answer to a [`SyncRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Whether the request was reconciled.
    pub success: bool,
    /// World version after this request, 0 on failure.
    pub server_version: u64,
    /// Server time of the response.
    pub timestamp: DateTime<Utc>,
    /// Fresh copies of the requested chunks.
    pub world_updates: Vec<WorldChunk>,
    /// Player fields that changed.
    pub player_updates: PlayerUpdates,
    /// Resolutions of detected conflicts.
    pub conflict_resolutions: Vec<ConflictResolution>,
    /// Changes that failed validation or permission checks.
    pub rejected_changes: Vec<VoxelChange>,
    /// Changes committed by this request.
    #[serde(default)]
    pub applied_changes: Vec<VoxelChange>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResponse {
    /// Builds the failure response: nothing applied, every change rejected.
    #[must_use]
    pub fn failure(rejected_changes: Vec<VoxelChange>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            server_version: 0,
            timestamp: Utc::now(),
            world_updates: Vec::new(),
            player_updates: PlayerUpdates::default(),
            conflict_resolutions: Vec::new(),
            rejected_changes,
            applied_changes: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_names() {
        let json = r#"{
            "playerId": "p1",
            "clientVersion": 3,
            "lastSyncTimestamp": "2024-05-01T12:00:00Z",
            "pendingChanges": [{
                "position": {"x": 5, "y": 1, "z": 5},
                "oldBlockId": 0,
                "newBlockId": 3,
                "timestamp": "2024-05-01T12:00:01Z",
                "playerId": "p1"
            }]
        }"#;
        let request: SyncRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.player_id, "p1");
        assert_eq!(request.pending_changes.len(), 1);
        assert_eq!(request.pending_changes[0].payload, ChangePayload::Voxel);
        assert!(request.requested_chunks.is_empty());
    }

    #[test]
    fn test_payload_tagging() {
        let payload: ChangePayload = serde_json::from_str(
            r#"{"kind": "inventory", "slot": 2, "stack": {"itemId": 7, "count": 3}}"#,
        )
        .unwrap();
        assert_eq!(
            payload,
            ChangePayload::Inventory { slot: 2, stack: ItemStack::new(7, 3) }
        );
        assert_eq!(payload.kind(), ChangeKind::Inventory);
    }

    #[test]
    fn test_resolution_kind_wire_form() {
        assert_eq!(serde_json::to_string(&ResolutionKind::ServerWins).unwrap(), r#""server_wins""#);
        assert_eq!(serde_json::to_string(&ResolutionKind::Merge).unwrap(), r#""merge""#);
    }

    #[test]
    fn test_failure_response_shape() {
        let response = SyncResponse::failure(Vec::new(), "player ghost not found");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["serverVersion"], 0);
        assert_eq!(json["playerUpdates"], serde_json::json!({}));
        assert_eq!(json["error"], "player ghost not found");
    }
}
