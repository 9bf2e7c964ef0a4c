//! # Voxel Data
//!
//! Dense per-chunk voxel buffers and their index layout.
//!
//! ## Layout
//!
//! A chunk buffer holds 4096 block ids, one byte each. The index of a
//! local position is `x + y*16 + z*256`. Persisted chunk data depends on
//! this exact layout.

use crate::coord::{LocalPos, CHUNK_SIZE};

/// Block id of an empty voxel.
pub const AIR: u8 = 0;

/// Total voxels per chunk (16³).
pub const VOXELS_PER_CHUNK: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

const SIZE: usize = CHUNK_SIZE as usize;

/// Returns a chunk buffer filled with air.
#[must_use]
pub fn empty_chunk_data() -> Vec<u8> {
    vec![AIR; VOXELS_PER_CHUNK]
}

/// Returns the buffer index of a local position.
#[inline]
#[must_use]
pub const fn voxel_index(local: LocalPos) -> usize {
    local.x() as usize + local.y() as usize * SIZE + local.z() as usize * SIZE * SIZE
}

/// Returns the local position stored at a buffer index.
///
/// Exact inverse of [`voxel_index`]. Returns `None` for indices past the
/// end of a chunk.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn position_from_index(index: usize) -> Option<LocalPos> {
    if index >= VOXELS_PER_CHUNK {
        return None;
    }
    LocalPos::new(
        (index % SIZE) as u8,
        ((index / SIZE) % SIZE) as u8,
        (index / (SIZE * SIZE)) as u8,
    )
}

/// Returns true if every voxel is air.
#[must_use]
pub fn is_empty(data: &[u8]) -> bool {
    data.iter().all(|&v| v == AIR)
}

/// Counts voxels that are not air.
#[must_use]
pub fn non_empty_count(data: &[u8]) -> usize {
    data.iter().filter(|&&v| v != AIR).count()
}
