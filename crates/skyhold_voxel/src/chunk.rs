//! # World Chunk
//!
//! The storage entity for one 16x16x16 cube of the world: its voxel
//! buffer, embedded entities and dirty/modification bookkeeping.
//!
//! The buffer always holds exactly [`VOXELS_PER_CHUNK`] voxels. The field
//! is private and every constructor, including deserialization, enforces
//! that length.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::{BlockPos, ChunkCoordinate, Vector3};
use crate::error::{VoxelError, VoxelResult};
use crate::voxel::{self, empty_chunk_data, voxel_index, VOXELS_PER_CHUNK};

/// An entity record embedded in a chunk (chests, signs, spawners...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntity {
    /// Unique entity id.
    pub entity_id: String,
    /// Entity type tag.
    pub kind: String,
    /// World position of the entity.
    pub position: Vector3,
    /// Free-form entity state.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A chunk of world data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WorldChunkWire")]
pub struct WorldChunk {
    /// Canonical chunk id (`"chunk_{x}_{y}_{z}"`).
    chunk_id: String,
    /// Chunk position in the world.
    position: ChunkCoordinate,
    /// Block ids, indexed as `x + y*16 + z*256`.
    voxel_data: Vec<u8>,
    /// Embedded entity records.
    pub entities: Vec<ChunkEntity>,
    /// Time of the last voxel write.
    pub last_modified: DateTime<Utc>,
    /// Whether the storage layer considers this chunk loaded.
    pub is_loaded: bool,
    /// Whether this chunk has been modified since it was loaded.
    pub is_dirty: bool,
}

/// Unchecked deserialization form of [`WorldChunk`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorldChunkWire {
    position: ChunkCoordinate,
    voxel_data: Vec<u8>,
    #[serde(default)]
    entities: Vec<ChunkEntity>,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    is_loaded: bool,
    #[serde(default)]
    is_dirty: bool,
}

impl TryFrom<WorldChunkWire> for WorldChunk {
    type Error = VoxelError;

    fn try_from(wire: WorldChunkWire) -> VoxelResult<Self> {
        let mut chunk = Self::from_voxels(wire.position, wire.voxel_data)?;
        chunk.entities = wire.entities;
        chunk.last_modified = wire.last_modified;
        chunk.is_loaded = wire.is_loaded;
        chunk.is_dirty = wire.is_dirty;
        Ok(chunk)
    }
}

impl WorldChunk {
    /// Creates a new all-air chunk at the given coordinate.
    #[must_use]
    pub fn new(position: ChunkCoordinate) -> Self {
        Self {
            chunk_id: position.id(),
            position,
            voxel_data: empty_chunk_data(),
            entities: Vec::new(),
            last_modified: Utc::now(),
            is_loaded: true,
            is_dirty: false,
        }
    }

    /// Creates a chunk from an existing voxel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::BufferLength`] unless the buffer holds exactly
    /// one chunk of voxels.
    pub fn from_voxels(position: ChunkCoordinate, voxel_data: Vec<u8>) -> VoxelResult<Self> {
        if voxel_data.len() != VOXELS_PER_CHUNK {
            return Err(VoxelError::BufferLength {
                expected: VOXELS_PER_CHUNK,
                actual: voxel_data.len(),
            });
        }
        Ok(Self {
            voxel_data,
            ..Self::new(position)
        })
    }

    /// Canonical chunk id.
    #[inline]
    #[must_use]
    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    /// Chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> ChunkCoordinate {
        self.position
    }

    /// Read-only view of the voxel buffer.
    #[inline]
    #[must_use]
    pub fn voxels(&self) -> &[u8] {
        &self.voxel_data
    }

    /// Reads the block id at a world position.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::OutsideChunk`] if the position belongs to a
    /// different chunk.
    pub fn voxel_at(&self, pos: BlockPos) -> VoxelResult<u8> {
        let index = self.index_of(pos)?;
        Ok(self.voxel_data[index])
    }

    /// Writes the block id at a world position.
    ///
    /// Marks the chunk dirty and refreshes `last_modified`. Returns the
    /// previous block id.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::OutsideChunk`] if the position belongs to a
    /// different chunk.
    pub fn set_voxel_at(&mut self, pos: BlockPos, block_id: u8) -> VoxelResult<u8> {
        let index = self.index_of(pos)?;
        let previous = std::mem::replace(&mut self.voxel_data[index], block_id);
        self.is_dirty = true;
        self.last_modified = Utc::now();
        Ok(previous)
    }

    /// Returns true if every voxel is air.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        voxel::is_empty(&self.voxel_data)
    }

    /// Counts voxels that are not air.
    #[must_use]
    pub fn non_empty_count(&self) -> usize {
        voxel::non_empty_count(&self.voxel_data)
    }

    fn index_of(&self, pos: BlockPos) -> VoxelResult<usize> {
        if !self.position.contains(pos) {
            return Err(VoxelError::OutsideChunk {
                pos,
                chunk: self.position,
            });
        }
        Ok(voxel_index(pos.local()))
    }
}
