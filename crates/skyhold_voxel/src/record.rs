//! # Chunk Records
//!
//! Durable binary form of a [`WorldChunk`], used by storage backends.
//!
//! ## Record Format
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SKHC"
//! 4       1     format version
//! 5       12    chunk x, y, z (i32 LE)
//! 17      8     last modified, unix millis (i64 LE)
//! 25      4     voxel payload length (u32 LE)
//! 29      n     LZ4(size-prepended) of the run-length voxel payload
//! 29+n    4     entity payload length (u32 LE)
//! 33+n    m     entities as JSON
//! ```
//!
//! Records are written with `is_dirty = false`: a decoded record is, by
//! definition, what storage already holds.

use chrono::DateTime;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::chunk::{ChunkEntity, WorldChunk};
use crate::compression::{compress, decompress_chunk};
use crate::coord::ChunkCoordinate;
use crate::error::{VoxelError, VoxelResult};

/// Record magic bytes.
const MAGIC: &[u8; 4] = b"SKHC";

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Fixed header size before the voxel payload.
const HEADER_SIZE: usize = 29;

/// Encodes a chunk into a durable record.
///
/// # Errors
///
/// Fails only if the entity list cannot be serialized or a payload is
/// larger than 4 GiB.
pub fn encode(chunk: &WorldChunk) -> VoxelResult<Vec<u8>> {
    let voxels = compress_prepend_size(&compress(chunk.voxels()));
    let entities = serde_json::to_vec(&chunk.entities)
        .map_err(|e| VoxelError::CorruptRecord(format!("entity encoding: {e}")))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + voxels.len() + 4 + entities.len());
    let coord = chunk.position();
    buf.extend_from_slice(MAGIC);
    buf.push(RECORD_VERSION);
    buf.extend_from_slice(&coord.x.to_le_bytes());
    buf.extend_from_slice(&coord.y.to_le_bytes());
    buf.extend_from_slice(&coord.z.to_le_bytes());
    buf.extend_from_slice(&chunk.last_modified.timestamp_millis().to_le_bytes());
    push_section(&mut buf, &voxels)?;
    push_section(&mut buf, &entities)?;
    Ok(buf)
}

/// Decodes a durable record back into a chunk.
///
/// # Errors
///
/// Returns [`VoxelError::CorruptRecord`] on a bad magic, unknown version,
/// truncation or undecodable payload, and the underlying run-length error
/// if the voxel payload is not exactly one chunk.
pub fn decode(bytes: &[u8]) -> VoxelResult<WorldChunk> {
    let mut reader = Reader { bytes, offset: 0 };

    if reader.take(4)? != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = reader.take(1)?[0];
    if version != RECORD_VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }
    let coord = ChunkCoordinate::new(reader.i32()?, reader.i32()?, reader.i32()?);
    let millis = reader.i64()?;

    let voxel_section = reader.section()?;
    let rle = decompress_size_prepended(voxel_section)
        .map_err(|e| corrupt(format!("lz4: {e}")))?;
    let voxels = decompress_chunk(&rle)?;

    let entity_section = reader.section()?;
    let entities: Vec<ChunkEntity> = serde_json::from_slice(entity_section)
        .map_err(|e| corrupt(format!("entities: {e}")))?;

    if reader.offset != bytes.len() {
        return Err(corrupt("trailing bytes"));
    }

    let mut chunk = WorldChunk::from_voxels(coord, voxels)?;
    chunk.entities = entities;
    chunk.last_modified = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(format!("timestamp out of range: {millis}")))?;
    chunk.is_dirty = false;
    Ok(chunk)
}

fn push_section(buf: &mut Vec<u8>, section: &[u8]) -> VoxelResult<()> {
    let len = u32::try_from(section.len()).map_err(|_| corrupt("section too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(section);
    Ok(())
}

fn corrupt(reason: impl Into<String>) -> VoxelError {
    VoxelError::CorruptRecord(reason.into())
}

/// Bounds-checked cursor over a record.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> VoxelResult<&'a [u8]> {
        let end = self.offset.checked_add(len).ok_or_else(|| corrupt("truncated"))?;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| corrupt("truncated"))?;
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> VoxelResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> VoxelResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> VoxelResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn section(&mut self) -> VoxelResult<&'a [u8]> {
        let len = u32::from_le_bytes(self.array()?);
        self.take(len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{BlockPos, Vector3};

    fn sample_chunk() -> WorldChunk {
        let mut chunk = WorldChunk::new(ChunkCoordinate::new(-2, 1, 7));
        chunk.set_voxel_at(BlockPos::new(-32, 16, 112), 4).unwrap();
        chunk.set_voxel_at(BlockPos::new(-17, 31, 127), 200).unwrap();
        chunk.entities.push(ChunkEntity {
            entity_id: "chest-1".to_string(),
            kind: "chest".to_string(),
            position: Vector3::new(-30.0, 17.0, 113.0),
            data: serde_json::json!({ "slots": 27 }),
        });
        chunk
    }

    #[test]
    fn test_record_restores_chunk() {
        let chunk = sample_chunk();
        let restored = decode(&encode(&chunk).unwrap()).unwrap();

        assert_eq!(restored.position(), chunk.position());
        assert_eq!(restored.chunk_id(), "chunk_-2_1_7");
        assert_eq!(restored.voxels(), chunk.voxels());
        assert_eq!(restored.entities, chunk.entities);
        assert_eq!(
            restored.last_modified.timestamp_millis(),
            chunk.last_modified.timestamp_millis()
        );
        assert!(!restored.is_dirty);
    }

    #[test]
    fn test_air_chunk_record_is_small() {
        let record = encode(&WorldChunk::new(ChunkCoordinate::default())).unwrap();
        assert!(record.len() < 128, "record was {} bytes", record.len());
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut record = encode(&sample_chunk()).unwrap();
        record[0] = b'X';
        assert!(matches!(decode(&record), Err(VoxelError::CorruptRecord(_))));

        let mut record = encode(&sample_chunk()).unwrap();
        record[4] = 99;
        assert!(matches!(decode(&record), Err(VoxelError::CorruptRecord(_))));
    }

    #[test]
    fn test_rejects_truncation_and_trailing_bytes() {
        let record = encode(&sample_chunk()).unwrap();
        for cut in [0, 3, HEADER_SIZE, record.len() - 1] {
            assert!(decode(&record[..cut]).is_err(), "cut at {cut}");
        }

        let mut padded = record;
        padded.push(0);
        assert!(matches!(decode(&padded), Err(VoxelError::CorruptRecord(_))));
    }
}
