//! # Chunk Coordinate System
//!
//! Pure coordinate math shared by storage and synchronization.
//!
//! ## Conventions
//!
//! - One chunk covers a 16x16x16 cube of world positions.
//! - World to chunk mapping uses floor division, so `-1 -> -1`,
//!   `-16 -> -1` and `-17 -> -2`.
//! - Local positions are always normalized into `[0, 16)`.
//! - Chunk ids are `"chunk_{x}_{y}_{z}"` with signed decimal integers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chunk edge length in voxels.
pub const CHUNK_SIZE: i32 = 16;

/// Prefix of the canonical chunk id.
const CHUNK_ID_PREFIX: &str = "chunk";

/// A world position with loose numeric components.
///
/// This is what clients put on the wire. It only becomes a [`BlockPos`]
/// once every component is a finite integer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component.
    pub x: f64,
    /// Y component (vertical).
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vector3 {
    /// Creates a new vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Converts to an integer block position.
    ///
    /// Returns `None` unless every component is finite, integral and
    /// representable as an `i32`.
    #[must_use]
    pub fn to_block_pos(self) -> Option<BlockPos> {
        Some(BlockPos::new(
            integral_component(self.x)?,
            integral_component(self.y)?,
            integral_component(self.z)?,
        ))
    }
}

impl From<BlockPos> for Vector3 {
    fn from(pos: BlockPos) -> Self {
        Self::new(f64::from(pos.x), f64::from(pos.y), f64::from(pos.z))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral_component(value: f64) -> Option<i32> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return None;
    }
    Some(value as i32)
}

/// An integer world position (one voxel).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate (vertical).
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Creates a new block position.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the chunk containing this position.
    #[inline]
    #[must_use]
    pub const fn chunk(self) -> ChunkCoordinate {
        ChunkCoordinate::containing(self)
    }

    /// Returns this position relative to its chunk's origin.
    #[inline]
    #[must_use]
    pub const fn local(self) -> LocalPos {
        LocalPos::of(self)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A position inside a chunk, each axis in `[0, 16)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LocalPos {
    x: u8,
    y: u8,
    z: u8,
}

impl LocalPos {
    /// Creates a local position.
    ///
    /// Returns `None` if any axis is outside `[0, 16)`.
    #[must_use]
    pub const fn new(x: u8, y: u8, z: u8) -> Option<Self> {
        let size = CHUNK_SIZE as u8;
        if x < size && y < size && z < size {
            Some(Self { x, y, z })
        } else {
            None
        }
    }

    /// Returns the local position of a world position.
    ///
    /// Each axis is taken modulo 16 and normalized into `[0, 16)`,
    /// negative inputs included.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn of(pos: BlockPos) -> Self {
        Self {
            x: pos.x.rem_euclid(CHUNK_SIZE) as u8,
            y: pos.y.rem_euclid(CHUNK_SIZE) as u8,
            z: pos.z.rem_euclid(CHUNK_SIZE) as u8,
        }
    }

    /// Local X.
    #[inline]
    #[must_use]
    pub const fn x(self) -> u8 {
        self.x
    }

    /// Local Y.
    #[inline]
    #[must_use]
    pub const fn y(self) -> u8 {
        self.y
    }

    /// Local Z.
    #[inline]
    #[must_use]
    pub const fn z(self) -> u8 {
        self.z
    }
}

/// Chunk coordinate (identifies a chunk in the world grid).
///
/// The derived ordering (x, then y, then z) is the canonical order in
/// which multiple chunk locks are acquired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoordinate {
    /// X coordinate (in chunks, not blocks).
    pub x: i32,
    /// Y coordinate (in chunks).
    pub y: i32,
    /// Z coordinate (in chunks).
    pub z: i32,
}

impl ChunkCoordinate {
    /// Creates a new chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Converts a world position to the coordinate of its chunk.
    #[inline]
    #[must_use]
    pub const fn containing(pos: BlockPos) -> Self {
        Self {
            x: pos.x.div_euclid(CHUNK_SIZE),
            y: pos.y.div_euclid(CHUNK_SIZE),
            z: pos.z.div_euclid(CHUNK_SIZE),
        }
    }

    /// Returns the world position of the chunk's origin corner.
    ///
    /// Every chunk reached through [`ChunkCoordinate::containing`] has an
    /// exact origin. Coordinates beyond `i32::MAX / 16` in either direction
    /// hold no block position; their origin saturates at the `i32` bounds.
    #[inline]
    #[must_use]
    pub const fn origin(self) -> BlockPos {
        BlockPos::new(
            self.x.saturating_mul(CHUNK_SIZE),
            self.y.saturating_mul(CHUNK_SIZE),
            self.z.saturating_mul(CHUNK_SIZE),
        )
    }

    /// Returns true if the world position lies inside this chunk.
    #[inline]
    #[must_use]
    pub fn contains(self, pos: BlockPos) -> bool {
        Self::containing(pos) == self
    }

    /// Returns the canonical chunk id, `"chunk_{x}_{y}_{z}"`.
    #[must_use]
    pub fn id(self) -> String {
        self.to_string()
    }

    /// Parses a canonical chunk id.
    ///
    /// Total: a wrong prefix, wrong segment count or non-integer segment
    /// yields `None`.
    #[must_use]
    pub fn parse_id(id: &str) -> Option<Self> {
        let mut parts = id.split('_');
        if parts.next()? != CHUNK_ID_PREFIX {
            return None;
        }
        let x = parts.next()?.parse().ok()?;
        let y = parts.next()?.parse().ok()?;
        let z = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(x, y, z))
    }

    /// Horizontal chunk distance.
    ///
    /// Euclidean distance over the x and z axes only. The vertical axis is
    /// ignored on purpose; callers depend on this metric.
    #[must_use]
    pub fn horizontal_distance(self, other: Self) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dz = f64::from(self.z) - f64::from(other.z);
        (dx * dx + dz * dz).sqrt()
    }

    /// Chebyshev distance over all three axes.
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        self.x
            .abs_diff(other.x)
            .max(self.y.abs_diff(other.y))
            .max(self.z.abs_diff(other.z))
    }

    /// Returns the 26 chunks at Chebyshev distance 1 (never `self`).
    ///
    /// At the edge of the `i32` grid the neighbors that would fall off it
    /// are left out.
    #[must_use]
    pub fn neighbors(self) -> Vec<Self> {
        let mut out = Vec::with_capacity(26);
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let (Some(x), Some(y), Some(z)) =
                        (self.x.checked_add(dx), self.y.checked_add(dy), self.z.checked_add(dz))
                    else {
                        continue;
                    };
                    out.push(Self::new(x, y, z));
                }
            }
        }
        out
    }
}

impl fmt::Display for ChunkCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CHUNK_ID_PREFIX}_{}_{}_{}", self.x, self.y, self.z)
    }
}
