//! # Resident Chunk Table
//!
//! Chunks that reconciliations are currently touching, each behind its own
//! mutex. Edits from different players can land in the same chunk, so the
//! voxel buffer is never shared mutably without that lock.
//!
//! ## Lock order
//!
//! A reconciliation that writes to several chunks locks them in ascending
//! [`ChunkCoordinate`] order. [`ChunkSet`] is a `BTreeMap`, so iterating it
//! yields that order and two writers can never wait on each other in a cycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use skyhold_voxel::{ChunkCoordinate, WorldChunk};

use crate::collaborators::WorldStorage;
use crate::error::SyncResult;

/// A chunk shared between reconciliations.
pub type ChunkHandle = Arc<Mutex<WorldChunk>>;

/// Checked-out chunks in canonical lock order.
pub type ChunkSet = BTreeMap<ChunkCoordinate, ChunkHandle>;

#[derive(Debug)]
struct Resident {
    chunk: ChunkHandle,
    last_used: Instant,
}

/// Table of resident chunks.
#[derive(Debug)]
pub struct ChunkTable {
    resident: Mutex<HashMap<ChunkCoordinate, Resident>>,
    idle_timeout: Duration,
}

impl ChunkTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            resident: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Returns the resident chunk, loading it from storage on first use.
    ///
    /// A chunk storage has never seen starts out empty.
    ///
    /// # Errors
    ///
    /// Fails if storage cannot be read.
    pub fn checkout(&self, coord: ChunkCoordinate, storage: &dyn WorldStorage) -> SyncResult<ChunkHandle> {
        Ok(self
            .checkout_existing(coord, storage)?
            .unwrap_or_else(|| self.insert(coord, WorldChunk::new(coord))))
    }

    /// Returns the resident chunk, or the stored one, or `None` if the
    /// chunk does not exist anywhere.
    ///
    /// # Errors
    ///
    /// Fails if storage cannot be read.
    pub fn checkout_existing(&self, coord: ChunkCoordinate, storage: &dyn WorldStorage) -> SyncResult<Option<ChunkHandle>> {
        if let Some(resident) = self.resident.lock().get_mut(&coord) {
            resident.last_used = Instant::now();
            return Ok(Some(Arc::clone(&resident.chunk)));
        }

        // Load without holding the table lock; storage may be slow.
        let Some(mut chunk) = storage.get_chunk(coord)? else {
            return Ok(None);
        };
        chunk.is_loaded = true;
        Ok(Some(self.insert(coord, chunk)))
    }

    /// Checks out every chunk in `coords`, keyed in lock order.
    ///
    /// # Errors
    ///
    /// Fails on the first storage error.
    pub fn checkout_all(
        &self,
        coords: impl IntoIterator<Item = ChunkCoordinate>,
        storage: &dyn WorldStorage,
    ) -> SyncResult<ChunkSet> {
        let mut set = ChunkSet::new();
        for coord in coords {
            if !set.contains_key(&coord) {
                let handle = self.checkout(coord, storage)?;
                set.insert(coord, handle);
            }
        }
        Ok(set)
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resident.lock().len()
    }

    /// Returns true if no chunk is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resident.lock().is_empty()
    }

    /// Releases chunks nobody holds that have sat unused past the timeout.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut resident = self.resident.lock();
        let before = resident.len();
        resident.retain(|_, r| {
            Arc::strong_count(&r.chunk) > 1 || now.saturating_duration_since(r.last_used) < self.idle_timeout
        });
        before - resident.len()
    }

    fn insert(&self, coord: ChunkCoordinate, chunk: WorldChunk) -> ChunkHandle {
        let mut resident = self.resident.lock();
        let entry = resident.entry(coord).or_insert_with(|| Resident {
            chunk: Arc::new(Mutex::new(chunk)),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Arc::clone(&entry.chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWorld;
    use skyhold_voxel::BlockPos;

    #[test]
    fn test_unknown_chunk_starts_empty() {
        let world = InMemoryWorld::new();
        let table = ChunkTable::new(Duration::from_secs(60));
        let coord = ChunkCoordinate::new(3, 0, -2);

        assert!(table.checkout_existing(coord, &world).unwrap().is_none());
        let chunk = table.checkout(coord, &world).unwrap();
        assert!(chunk.lock().is_empty());
        assert_eq!(chunk.lock().position(), coord);
    }

    #[test]
    fn test_checkout_shares_one_buffer() {
        let world = InMemoryWorld::new();
        let table = ChunkTable::new(Duration::from_secs(60));
        let coord = ChunkCoordinate::new(0, 0, 0);

        let a = table.checkout(coord, &world).unwrap();
        let b = table.checkout(coord, &world).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.lock().set_voxel_at(BlockPos::new(1, 1, 1), 9).unwrap();
        assert_eq!(b.lock().voxel_at(BlockPos::new(1, 1, 1)).unwrap(), 9);
    }

    #[test]
    fn test_checkout_all_is_sorted() {
        let world = InMemoryWorld::new();
        let table = ChunkTable::new(Duration::from_secs(60));
        let coords = [ChunkCoordinate::new(2, 0, 0), ChunkCoordinate::new(-1, 0, 0), ChunkCoordinate::new(2, 0, 0)];

        let set = table.checkout_all(coords, &world).unwrap();
        let keys: Vec<_> = set.keys().copied().collect();
        assert_eq!(keys, vec![ChunkCoordinate::new(-1, 0, 0), ChunkCoordinate::new(2, 0, 0)]);
    }

    #[test]
    fn test_evicts_unheld_idle_chunks() {
        let world = InMemoryWorld::new();
        let table = ChunkTable::new(Duration::from_secs(1));
        let held = table.checkout(ChunkCoordinate::new(0, 0, 0), &world).unwrap();
        drop(table.checkout(ChunkCoordinate::new(1, 0, 0), &world).unwrap());

        assert_eq!(table.evict_idle(Instant::now() + Duration::from_secs(2)), 1);
        assert_eq!(table.len(), 1);
        drop(held);
        assert_eq!(table.evict_idle(Instant::now() + Duration::from_secs(2)), 1);
        assert!(table.is_empty());
    }
}
