//! # Run-Length Encoding
//!
//! The compact chunk payload shared with clients and storage.
//!
//! ## Format
//!
//! A flat byte sequence of `(value, count)` pairs. `count` is a single
//! byte, so a run of `N` identical voxels takes `ceil(N / 255)` pairs that
//! all carry the same value.

use crate::error::{VoxelError, VoxelResult};
use crate::voxel::VOXELS_PER_CHUNK;

/// Longest run a single pair can describe.
const MAX_RUN: usize = u8::MAX as usize;

/// Compresses voxel data into `(value, count)` pairs.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = data.iter().copied();
    let Some(mut current) = iter.next() else {
        return out;
    };
    let mut run = 1usize;

    for value in iter {
        if value == current && run < MAX_RUN {
            run += 1;
        } else {
            out.push(current);
            out.push(run as u8);
            current = value;
            run = 1;
        }
    }
    out.push(current);
    out.push(run as u8);
    out
}

/// Expands a run-length payload.
///
/// # Errors
///
/// Fails on an odd-length payload or a zero-count pair.
pub fn decompress(bytes: &[u8]) -> VoxelResult<Vec<u8>> {
    decompress_bounded(bytes, usize::MAX)
}

/// Expands a run-length payload that must describe exactly one chunk.
///
/// # Errors
///
/// Fails on malformed pairs or if the payload does not expand to exactly
/// [`VOXELS_PER_CHUNK`] voxels.
pub fn decompress_chunk(bytes: &[u8]) -> VoxelResult<Vec<u8>> {
    let data = decompress_bounded(bytes, VOXELS_PER_CHUNK)?;
    if data.len() != VOXELS_PER_CHUNK {
        return Err(VoxelError::BufferLength {
            expected: VOXELS_PER_CHUNK,
            actual: data.len(),
        });
    }
    Ok(data)
}

fn decompress_bounded(bytes: &[u8], limit: usize) -> VoxelResult<Vec<u8>> {
    if bytes.len() % 2 != 0 {
        return Err(VoxelError::OddPayload(bytes.len()));
    }

    let mut out = Vec::with_capacity(limit.min(VOXELS_PER_CHUNK));
    for (pair, chunk) in bytes.chunks_exact(2).enumerate() {
        let (value, count) = (chunk[0], usize::from(chunk[1]));
        if count == 0 {
            return Err(VoxelError::ZeroRun { offset: pair * 2 });
        }
        if out.len() + count > limit {
            return Err(VoxelError::RunOverflow { limit });
        }
        out.resize(out.len() + count, value);
    }
    Ok(out)
}
