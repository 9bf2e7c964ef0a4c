//! # Collaborator Interfaces
//!
//! Everything the sync core consumes from the rest of the server.
//!
//! ## Architecture
//!
//! The core never reaches into storage, the player directory or messaging
//! directly. Other services implement these traits and hand them over as
//! a [`Collaborators`] bundle.
//!
//! ```text
//! sync core defines:     other services implement:
//! ┌──────────────────┐   ┌──────────────────┐
//! │ trait WorldStorage│ ←─│ impl WorldStorage │
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! All traits are `Send + Sync`: one service instance is shared by every
//! request thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyhold_voxel::{BlockPos, ChunkCoordinate, WorldChunk};

use crate::error::{BroadcastError, StorageError};
use crate::protocol::ItemStack;
use crate::validation::ValidatedChange;

/// Ownership and placement of a player's island.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandInfo {
    /// Island id.
    pub island_id: String,
    /// Owning player.
    pub owner_id: String,
    /// Messaging zone the island belongs to.
    pub zone_id: String,
    /// Lowest corner (inclusive).
    pub min: BlockPos,
    /// Highest corner (inclusive).
    pub max: BlockPos,
}

impl IslandInfo {
    /// Returns true if the position lies within the island.
    #[must_use]
    pub fn contains(&self, pos: BlockPos) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x)
            && (self.min.y..=self.max.y).contains(&pos.y)
            && (self.min.z..=self.max.z).contains(&pos.z)
    }
}

/// A player record as held by the Player Directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    /// Player id.
    pub player_id: String,
    /// Skill name to level.
    #[serde(default)]
    pub skills: BTreeMap<String, u32>,
    /// Inventory, indexed by slot.
    #[serde(default)]
    pub inventory: Vec<ItemStack>,
    /// Currency balance.
    #[serde(default)]
    pub currency: i64,
    /// Last login instant.
    #[serde(default)]
    pub last_login: DateTime<Utc>,
    /// Any other player-state fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerRecord {
    /// Creates an empty record for a player.
    #[must_use]
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            last_login: Utc::now(),
            ..Self::default()
        }
    }

    /// Returns the stack in a slot (empty if the slot was never filled).
    #[must_use]
    pub fn slot(&self, slot: u32) -> ItemStack {
        self.inventory.get(slot as usize).copied().unwrap_or_default()
    }

    /// Returns the record as a field map.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// World Storage: islands, chunks and durable change writes.
pub trait WorldStorage: Send + Sync {
    /// Returns the island owned by a player.
    ///
    /// # Errors
    ///
    /// Fails if storage is unreachable.
    fn get_player_island(&self, player_id: &str) -> Result<Option<IslandInfo>, StorageError>;

    /// Loads a chunk. `None` if the chunk was never stored.
    ///
    /// # Errors
    ///
    /// Fails if storage is unreachable or the stored chunk is corrupt.
    fn get_chunk(&self, coord: ChunkCoordinate) -> Result<Option<WorldChunk>, StorageError>;

    /// Durably writes resolved changes on behalf of a player.
    ///
    /// # Errors
    ///
    /// Fails if the write did not happen; the caller treats the changes as
    /// unapplied.
    fn save_changes(&self, player_id: &str, changes: &[ValidatedChange]) -> Result<(), StorageError>;
}

/// Player Directory: player records.
pub trait PlayerDirectory: Send + Sync {
    /// Looks up a player.
    ///
    /// # Errors
    ///
    /// Fails if the directory is unreachable.
    fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, StorageError>;
}

/// Permission/Ownership: delegated build rights.
pub trait PermissionService: Send + Sync {
    /// Returns true if the player may modify the position.
    fn can_modify(&self, player_id: &str, position: BlockPos) -> bool;
}

/// Broadcast/Messaging: zone fan-out. At-most-once, no delivery guarantee.
pub trait Broadcaster: Send + Sync {
    /// Sends an event to every client in a zone.
    ///
    /// # Errors
    ///
    /// Fails if the event could not be handed to the messaging layer.
    fn broadcast_to_zone(&self, zone_id: &str, event: &str, payload: &Value) -> Result<(), BroadcastError>;
}

/// The collaborators one service instance works with.
#[derive(Clone)]
pub struct Collaborators {
    /// World Storage.
    pub storage: Arc<dyn WorldStorage>,
    /// Player Directory.
    pub players: Arc<dyn PlayerDirectory>,
    /// Permission/Ownership.
    pub permissions: Arc<dyn PermissionService>,
    /// Broadcast/Messaging.
    pub broadcaster: Arc<dyn Broadcaster>,
}
