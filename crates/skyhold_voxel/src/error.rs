//! # Voxel Error Types
//!
//! All errors that can occur while addressing, compressing or decoding
//! chunk data.

use thiserror::Error;

use crate::coord::{BlockPos, ChunkCoordinate};

/// Errors that can occur in the voxel storage layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoxelError {
    /// A voxel buffer did not hold exactly one chunk of voxels.
    #[error("invalid voxel buffer length: expected {expected}, got {actual}")]
    BufferLength {
        /// Required length.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// A run-length payload had an odd number of bytes.
    #[error("run-length payload has odd length {0}")]
    OddPayload(usize),

    /// A run-length pair carried a zero count.
    #[error("run-length pair at offset {offset} has zero count")]
    ZeroRun {
        /// Byte offset of the offending pair.
        offset: usize,
    },

    /// A run-length payload expanded past the allowed size.
    #[error("run-length payload expands past {limit} voxels")]
    RunOverflow {
        /// Maximum number of voxels allowed.
        limit: usize,
    },

    /// A world position was addressed against a chunk that does not hold it.
    #[error("position {pos} is outside chunk {chunk}")]
    OutsideChunk {
        /// The position addressed.
        pos: BlockPos,
        /// The chunk it was addressed against.
        chunk: ChunkCoordinate,
    },

    /// A chunk record failed to decode.
    #[error("corrupt chunk record: {0}")]
    CorruptRecord(String),
}

/// Result type for voxel operations.
pub type VoxelResult<T> = Result<T, VoxelError>;
