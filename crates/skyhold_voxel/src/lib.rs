//! # SKYHOLD Voxel
//!
//! Chunk storage primitives for player islands.
//!
//! ## Components
//!
//! - **Coordinates** ([`coord`]): world <-> chunk mapping, chunk ids,
//!   neighbor and distance queries
//! - **Voxel data** ([`voxel`]): dense 4096-byte buffers and their index
//!   layout
//! - **Compression** ([`compression`]): `(value, count)` run-length payload
//! - **Chunks** ([`chunk`]): the storage entity with dirty bookkeeping
//! - **Records** ([`record`]): durable binary chunk form for storage
//!
//! ## Example
//!
//! ```rust
//! use skyhold_voxel::{compress, decompress, BlockPos, ChunkCoordinate, WorldChunk};
//!
//! let pos = BlockPos::new(-1, 5, 20);
//! let mut chunk = WorldChunk::new(pos.chunk());
//! chunk.set_voxel_at(pos, 3).unwrap();
//!
//! let packed = compress(chunk.voxels());
//! assert_eq!(decompress(&packed).unwrap(), chunk.voxels());
//! assert_eq!(chunk.position(), ChunkCoordinate::new(-1, 0, 1));
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod chunk;
pub mod compression;
pub mod coord;
pub mod error;
pub mod record;
pub mod voxel;

pub use chunk::{ChunkEntity, WorldChunk};
pub use compression::{compress, decompress, decompress_chunk};
pub use coord::{BlockPos, ChunkCoordinate, LocalPos, Vector3, CHUNK_SIZE};
pub use error::{VoxelError, VoxelResult};
pub use voxel::{empty_chunk_data, position_from_index, voxel_index, AIR, VOXELS_PER_CHUNK};
