//! # In-Memory Collaborators
//!
//! Process-local implementations of the collaborator traits, used by the
//! simulation binary and the tests. Chunks are kept as encoded records, the
//! same bytes a durable store would hold.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use skyhold_voxel::{record, BlockPos, ChunkCoordinate, VoxelResult, WorldChunk};

use crate::broadcast::BroadcastEvent;
use crate::collaborators::{
    Broadcaster, Collaborators, IslandInfo, PermissionService, PlayerDirectory, PlayerRecord, WorldStorage,
};
use crate::error::{BroadcastError, StorageError};
use crate::protocol::ChangePayload;
use crate::validation::ValidatedChange;

/// Islands, players, chunks and build grants held in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorld {
    islands: RwLock<HashMap<String, IslandInfo>>,
    players: RwLock<HashMap<String, PlayerRecord>>,
    chunks: RwLock<HashMap<ChunkCoordinate, Vec<u8>>>,
    // grantee -> owners whose island the grantee may build on
    grants: RwLock<HashMap<String, HashSet<String>>>,
    failing: RwLock<HashSet<BlockPos>>,
    unreadable: RwLock<HashSet<ChunkCoordinate>>,
    saved: Mutex<Vec<ValidatedChange>>,
}

impl InMemoryWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a player and their island in one step.
    pub fn add_player(&self, record: PlayerRecord, island: IslandInfo) {
        self.islands.write().insert(island.owner_id.clone(), island);
        self.players.write().insert(record.player_id.clone(), record);
    }

    /// Registers a player without an island.
    pub fn add_player_record(&self, record: PlayerRecord) {
        self.players.write().insert(record.player_id.clone(), record);
    }

    /// Lets `grantee` build on `owner`'s island.
    pub fn grant(&self, owner: &str, grantee: &str) {
        self.grants
            .write()
            .entry(grantee.to_string())
            .or_default()
            .insert(owner.to_string());
    }

    /// Makes every write at `pos` fail.
    pub fn fail_writes_at(&self, pos: BlockPos) {
        self.failing.write().insert(pos);
    }

    /// Makes every read of the chunk at `coord` fail.
    pub fn fail_reads_at(&self, coord: ChunkCoordinate) {
        self.unreadable.write().insert(coord);
    }

    /// Stores a chunk.
    ///
    /// # Errors
    ///
    /// Fails if the chunk cannot be encoded.
    pub fn put_chunk(&self, chunk: &WorldChunk) -> VoxelResult<()> {
        let bytes = record::encode(chunk)?;
        self.chunks.write().insert(chunk.position(), bytes);
        Ok(())
    }

    /// Returns the stored copy of a player record.
    #[must_use]
    pub fn player(&self, player_id: &str) -> Option<PlayerRecord> {
        self.players.read().get(player_id).cloned()
    }

    /// Every change written so far, in write order.
    #[must_use]
    pub fn saved_changes(&self) -> Vec<ValidatedChange> {
        self.saved.lock().clone()
    }

    /// Bundles this world with a broadcaster.
    #[must_use]
    pub fn collaborators(self: &Arc<Self>, broadcaster: Arc<dyn Broadcaster>) -> Collaborators {
        Collaborators {
            storage: self.clone(),
            players: self.clone(),
            permissions: self.clone(),
            broadcaster,
        }
    }

    fn load_chunk(&self, coord: ChunkCoordinate) -> Result<Option<WorldChunk>, StorageError> {
        if self.unreadable.read().contains(&coord) {
            return Err(StorageError(format!("chunk {coord} unreadable")));
        }
        self.chunks
            .read()
            .get(&coord)
            .map(|bytes| record::decode(bytes))
            .transpose()
            .map_err(|e| StorageError(format!("chunk {coord}: {e}")))
    }

    fn write_one(&self, change: &ValidatedChange) -> Result<(), StorageError> {
        match &change.payload {
            ChangePayload::Voxel => {
                let coord = change.position.chunk();
                // Read-modify-write under one lock so concurrent writers to a chunk do not lose edits.
                let mut chunks = self.chunks.write();
                let mut chunk = match chunks.get(&coord) {
                    Some(bytes) => record::decode(bytes).map_err(|e| StorageError(format!("chunk {coord}: {e}")))?,
                    None => WorldChunk::new(coord),
                };
                chunk
                    .set_voxel_at(change.position, change.new_block_id)
                    .map_err(|e| StorageError(e.to_string()))?;
                chunk.is_dirty = false;
                let bytes = record::encode(&chunk).map_err(|e| StorageError(e.to_string()))?;
                chunks.insert(coord, bytes);
                Ok(())
            }
            ChangePayload::Inventory { slot, stack } => {
                let mut players = self.players.write();
                let record = players
                    .get_mut(&change.player_id)
                    .ok_or_else(|| StorageError(format!("player {} not found", change.player_id)))?;
                let slot = *slot as usize;
                if record.inventory.len() <= slot {
                    record.inventory.resize(slot + 1, Default::default());
                }
                record.inventory[slot] = *stack;
                Ok(())
            }
            ChangePayload::PlayerState { fields } => {
                let mut players = self.players.write();
                let record = players
                    .get_mut(&change.player_id)
                    .ok_or_else(|| StorageError(format!("player {} not found", change.player_id)))?;
                let mut merged = record.to_fields();
                merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                *record = serde_json::from_value(Value::Object(merged))
                    .map_err(|e| StorageError(format!("player {}: {e}", change.player_id)))?;
                Ok(())
            }
        }
    }
}

impl WorldStorage for InMemoryWorld {
    fn get_player_island(&self, player_id: &str) -> Result<Option<IslandInfo>, StorageError> {
        Ok(self.islands.read().get(player_id).cloned())
    }

    fn get_chunk(&self, coord: ChunkCoordinate) -> Result<Option<WorldChunk>, StorageError> {
        self.load_chunk(coord)
    }

    fn save_changes(&self, player_id: &str, changes: &[ValidatedChange]) -> Result<(), StorageError> {
        let failing = self.failing.read();
        if let Some(bad) = changes.iter().find(|c| failing.contains(&c.position)) {
            return Err(StorageError(format!("write for {player_id} at {} refused", bad.position)));
        }
        drop(failing);

        for change in changes {
            self.write_one(change)?;
            self.saved.lock().push(change.clone());
        }
        Ok(())
    }
}

impl PlayerDirectory for InMemoryWorld {
    fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, StorageError> {
        Ok(self.player(player_id))
    }
}

impl PermissionService for InMemoryWorld {
    fn can_modify(&self, player_id: &str, position: BlockPos) -> bool {
        let islands = self.islands.read();
        let owns = islands.get(player_id).is_some_and(|island| island.contains(position));
        owns || self.grants.read().get(player_id).is_some_and(|owners| {
            owners
                .iter()
                .filter_map(|owner| islands.get(owner))
                .any(|island| island.contains(position))
        })
    }
}

/// A broadcaster that remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<BroadcastEvent>>,
    failing: AtomicBool,
}

impl RecordingBroadcaster {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every broadcast fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<BroadcastEvent> {
        self.events.lock().clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast_to_zone(&self, zone_id: &str, event: &str, payload: &Value) -> Result<(), BroadcastError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(BroadcastError(format!("zone {zone_id} unreachable")));
        }
        self.events.lock().push(BroadcastEvent {
            zone_id: zone_id.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
