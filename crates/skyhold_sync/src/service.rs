//! # Synchronization Service
//!
//! The reconciliation engine. Takes a client's pending edits and last-known
//! version, returns an authoritative response the client applies verbatim.
//!
//! ## Pipeline
//!
//! ```text
//! SyncRequest
//!     │
//!     ├─ resolve player + island ........ NotFound fails the request
//!     │
//!     ├─ lock player session ............ one reconciliation per player
//!     │    ├─ validate each change ...... failures → rejectedChanges
//!     │    ├─ detect + resolve conflicts
//!     │    ├─ check out touched chunks
//!     │    ├─ lock touched chunks ....... ascending coordinate order
//!     │    │    ├─ persist winners ...... failures dropped from applied
//!     │    │    └─ update chunk buffers
//!     │    ├─ diff player record
//!     │    ├─ commit: versions, log
//!     │    └─ rate check (advisory)
//!     │
//!     └─ broadcast applied changes ...... best effort, never fails
//! ```
//!
//! Everything before the first write either succeeds or leaves storage and
//! the session untouched. From the first write on nothing can fail.
//!
//! A chunk's lock is held across both the storage write and the resident
//! buffer update, so for any block the last write to storage is also the
//! last write to the resident copy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use skyhold_voxel::{ChunkCoordinate, WorldChunk};

use crate::broadcast::QueuedBroadcaster;
use crate::chunk_table::{ChunkHandle, ChunkTable};
use crate::collaborators::{Collaborators, IslandInfo, PlayerRecord};
use crate::config::SyncConfig;
use crate::error::{BroadcastError, SyncError, SyncResult};
use crate::protocol::{ChangeKind, PlayerUpdates, SyncRequest, SyncResponse, VoxelChange};
use crate::resolver::{detect_conflict, resolve, Resolved};
use crate::session::{ServerState, SessionPhase, SessionState, SessionStats, SessionStore};
use crate::validation::{ChangeValidator, RateVerdict, ValidatedChange};

/// What an eviction pass released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Player sessions evicted.
    pub sessions: usize,
    /// Resident chunks released.
    pub chunks: usize,
}

/// A committed reconciliation, before its broadcast.
struct Committed {
    response: SyncResponse,
    zone_id: String,
    island_id: String,
}

/// The authoritative world-state synchronizer.
///
/// One instance serves every player; share it behind an `Arc`.
pub struct SynchronizationService {
    config: SyncConfig,
    validator: ChangeValidator,
    sessions: SessionStore,
    chunks: ChunkTable,
    collaborators: Collaborators,
}

impl SynchronizationService {
    /// Creates a service that broadcasts inline on the request thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is inconsistent.
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            validator: ChangeValidator::new(&config),
            sessions: SessionStore::new(&config),
            chunks: ChunkTable::new(config.chunk_idle_timeout()),
            config,
            collaborators,
        })
    }

    /// Creates a service whose broadcasts go through a [`QueuedBroadcaster`]
    /// sized by `broadcast_queue_capacity`.
    ///
    /// # Errors
    ///
    /// Fails on an inconsistent configuration or if the broadcast worker
    /// cannot be started.
    pub fn with_broadcast_queue(config: SyncConfig, mut collaborators: Collaborators) -> SyncResult<Self> {
        config.validate()?;
        let queue = QueuedBroadcaster::spawn(Arc::clone(&collaborators.broadcaster), config.broadcast_queue_capacity)
            .map_err(|e| SyncError::Broadcast(BroadcastError(format!("cannot start broadcast worker: {e}"))))?;
        collaborators.broadcaster = Arc::new(queue);
        Self::new(config, collaborators)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Reconciles one request.
    ///
    /// Never fails: a request-fatal error becomes a failure response with
    /// every pending change rejected and nothing applied.
    pub fn sync(&self, request: &SyncRequest) -> SyncResponse {
        match self.reconcile(request) {
            Ok(committed) => {
                self.broadcast(&request.player_id, &committed);
                committed.response
            }
            Err(err) => {
                tracing::error!(player_id = %request.player_id, error = %err, "sync failed");
                SyncResponse::failure(request.pending_changes.clone(), err.to_string())
            }
        }
    }

    /// Reconciles a JSON-encoded request and returns the JSON response.
    #[must_use]
    pub fn sync_json(&self, body: &str) -> String {
        let response = match serde_json::from_str::<SyncRequest>(body) {
            Ok(request) => self.sync(&request),
            Err(e) => {
                let err = SyncError::MalformedRequest(e.to_string());
                tracing::error!(error = %err, "sync failed");
                SyncResponse::failure(Vec::new(), err.to_string())
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            json!({ "success": false, "serverVersion": 0, "error": format!("response encoding: {e}") }).to_string()
        })
    }

    /// Copy of a player's authoritative state, if a session is live.
    #[must_use]
    pub fn server_state(&self, player_id: &str) -> Option<ServerState> {
        self.sessions.get(player_id).map(|session| {
            let state = session.lock();
            state.server.clone()
        })
    }

    /// Current phase of a player's session.
    #[must_use]
    pub fn session_phase(&self, player_id: &str) -> Option<SessionPhase> {
        self.sessions.get(player_id).map(|session| {
            let state = session.lock();
            state.phase
        })
    }

    /// Changes counted against a player's current rate window, if a
    /// session is live.
    #[must_use]
    pub fn changes_in_window(&self, player_id: &str) -> Option<usize> {
        self.sessions.get(player_id).map(|session| {
            let state = session.lock();
            state.limiter.in_window()
        })
    }

    /// Session counters.
    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        self.sessions.stats()
    }

    /// Number of chunks currently resident.
    #[must_use]
    pub fn resident_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Evicts idle sessions and releases idle chunks.
    pub fn evict_idle(&self, now: Instant) -> EvictionReport {
        EvictionReport {
            sessions: self.sessions.evict_idle(now),
            chunks: self.chunks.evict_idle(now),
        }
    }

    fn reconcile(&self, request: &SyncRequest) -> SyncResult<Committed> {
        let player_id = request.player_id.as_str();
        if player_id.trim().is_empty() {
            return Err(SyncError::MalformedRequest("playerId is empty".into()));
        }
        let limit = self.config.max_pending_changes;
        if request.pending_changes.len() > limit {
            return Err(SyncError::RequestTooLarge {
                count: request.pending_changes.len(),
                limit,
            });
        }

        let player = self
            .collaborators
            .players
            .get_player(player_id)?
            .ok_or_else(|| SyncError::NotFound(format!("player {player_id}")))?;
        let island = self
            .collaborators
            .storage
            .get_player_island(player_id)?
            .ok_or_else(|| SyncError::NotFound(format!("island of player {player_id}")))?;

        let session = self.sessions.get_or_create(player_id);
        let mut state = session.lock();
        let previous = state.phase;
        state.phase = SessionPhase::Reconciling;
        state.last_active = Instant::now();

        let result = self.reconcile_locked(request, player, &island, &mut state);
        state.phase = if result.is_ok() { SessionPhase::Initialized } else { previous };
        drop(state);

        result.map(|response| Committed {
            response,
            zone_id: island.zone_id,
            island_id: island.island_id,
        })
    }

    fn reconcile_locked(
        &self,
        request: &SyncRequest,
        player: PlayerRecord,
        island: &IslandInfo,
        state: &mut SessionState,
    ) -> SyncResult<SyncResponse> {
        let player_id = request.player_id.as_str();
        let now = Utc::now();
        let storage = self.collaborators.storage.as_ref();

        let (valid, rejected) = self.validate_all(player_id, &request.pending_changes, now);
        let resolved = resolve_all(&state.server.authorized_changes, valid, request.last_sync_timestamp, &player);

        // Fallible reads happen before any write so a failure here leaves
        // storage and the session untouched.
        let write_coords = resolved
            .iter()
            .filter(|r| r.needs_write() && r.change.kind() == ChangeKind::Voxel)
            .map(|r| r.change.position.chunk());
        let writes = self.chunks.checkout_all(write_coords, storage)?;
        let requested = self.checkout_requested(&request.requested_chunks)?;

        let applied = {
            let mut guards: BTreeMap<_, _> = writes.iter().map(|(coord, chunk)| (*coord, chunk.lock())).collect();
            let applied = self.persist(player_id, &resolved);
            for change in applied.iter().filter(|c| c.kind() == ChangeKind::Voxel) {
                if let Some(chunk) = guards.get_mut(&change.position.chunk()) {
                    if let Err(err) = chunk.set_voxel_at(change.position, change.new_block_id) {
                        tracing::error!(player_id = %player_id, error = %err, "resident chunk out of step");
                    }
                }
            }
            applied
        };

        let current = match self.collaborators.players.get_player(player_id) {
            Ok(Some(record)) => record,
            Ok(None) | Err(_) => {
                tracing::warn!(player_id = %player_id, "player record unavailable after write; reporting stale values");
                player
            }
        };
        let player_updates = player_updates(state.server.last_player_snapshot.as_ref(), &current);

        // Commit.
        let server = &mut state.server;
        server.world_version += 1;
        server.player_version += 1;
        server.authorized_changes.extend(applied.iter().cloned());
        server.last_update_timestamp = now;
        server.last_player_snapshot = Some(current);

        // Only committed requests count against the window.
        if let RateVerdict::Exceeded { count, limit } = state.limiter.record(Instant::now(), request.pending_changes.len()) {
            tracing::warn!(player_id = %player_id, count, limit, "change rate above limit");
        }

        let world_updates: Vec<WorldChunk> = requested.iter().map(|(_, chunk)| chunk.lock().clone()).collect();
        let conflict_resolutions: Vec<_> = resolved
            .iter()
            .filter(|r| r.conflicted)
            .map(|r| r.resolution.clone())
            .collect();

        tracing::debug!(
            player_id = %player_id,
            island_id = %island.island_id,
            server_version = server.world_version,
            rejected = rejected.len(),
            conflicts = conflict_resolutions.len(),
            applied = applied.len(),
            "reconciled"
        );

        Ok(SyncResponse {
            success: true,
            server_version: server.world_version,
            timestamp: now,
            world_updates,
            player_updates,
            conflict_resolutions,
            rejected_changes: rejected,
            applied_changes: applied.iter().map(ValidatedChange::to_wire).collect(),
            error: None,
        })
    }

    fn validate_all(
        &self,
        player_id: &str,
        pending: &[VoxelChange],
        now: DateTime<Utc>,
    ) -> (Vec<ValidatedChange>, Vec<VoxelChange>) {
        let permissions = self.collaborators.permissions.as_ref();
        let mut valid = Vec::with_capacity(pending.len());
        let mut rejected = Vec::new();
        for (index, change) in pending.iter().enumerate() {
            match self.validator.validate(change, player_id, now, permissions) {
                Ok(change) => valid.push(change),
                Err(err) => {
                    tracing::debug!(player_id = %player_id, index, error = %err, "change rejected");
                    rejected.push(change.clone());
                }
            }
        }
        (valid, rejected)
    }

    /// Requested chunks in request order, skipping ones that do not exist.
    fn checkout_requested(&self, coords: &[ChunkCoordinate]) -> SyncResult<Vec<(ChunkCoordinate, ChunkHandle)>> {
        let storage = self.collaborators.storage.as_ref();
        let mut chunks: Vec<(ChunkCoordinate, ChunkHandle)> = Vec::with_capacity(coords.len());
        for &coord in coords {
            if chunks.iter().any(|(c, _)| *c == coord) {
                continue;
            }
            if let Some(chunk) = self.chunks.checkout_existing(coord, storage)? {
                chunks.push((coord, chunk));
            }
        }
        Ok(chunks)
    }

    /// Writes every change that needs it, one at a time. Returns the ones
    /// that made it.
    fn persist(&self, player_id: &str, resolved: &[Resolved]) -> Vec<ValidatedChange> {
        let storage = self.collaborators.storage.as_ref();
        let mut applied = Vec::new();
        for outcome in resolved.iter().filter(|r| r.needs_write()) {
            match storage.save_changes(player_id, std::slice::from_ref(&outcome.change)) {
                Ok(()) => applied.push(outcome.change.clone()),
                Err(err) => {
                    let err = SyncError::Persistence(err.0);
                    tracing::warn!(
                        player_id = %player_id,
                        change_id = %outcome.resolution.change_id,
                        error = %err,
                        "change dropped"
                    );
                }
            }
        }
        applied
    }

    fn broadcast(&self, player_id: &str, committed: &Committed) {
        let response = &committed.response;
        if response.applied_changes.is_empty() {
            return;
        }
        let payload = json!({
            "playerId": player_id,
            "islandId": committed.island_id,
            "serverVersion": response.server_version,
            "timestamp": response.timestamp,
            "changes": response.applied_changes,
        });
        if let Err(err) = self.collaborators.broadcaster.broadcast_to_zone(
            &committed.zone_id,
            &self.config.broadcast_event,
            &payload,
        ) {
            let err = SyncError::from(err);
            tracing::warn!(player_id = %player_id, zone_id = %committed.zone_id, error = %err, "broadcast swallowed");
        }
    }
}

/// Detects and resolves every valid change, in input order.
fn resolve_all(
    log: &[ValidatedChange],
    valid: Vec<ValidatedChange>,
    last_sync: DateTime<Utc>,
    player: &PlayerRecord,
) -> Vec<Resolved> {
    let mut resolved = Vec::with_capacity(valid.len());
    let mut batch: Vec<ValidatedChange> = Vec::new();
    for change in valid {
        let existing = detect_conflict(log, &batch, &change, last_sync);
        let outcome = resolve(change, existing, player);
        if outcome.needs_write() {
            batch.push(outcome.change.clone());
        }
        resolved.push(outcome);
    }
    resolved
}

/// Player fields that differ from the previous snapshot. Everything on the
/// first sync.
fn player_updates(previous: Option<&PlayerRecord>, current: &PlayerRecord) -> PlayerUpdates {
    let Some(previous) = previous else {
        return PlayerUpdates {
            skills: Some(current.skills.clone()),
            inventory: Some(current.inventory.clone()),
            currency: Some(current.currency),
            last_login: Some(current.last_login),
        };
    };
    PlayerUpdates {
        skills: (previous.skills != current.skills).then(|| current.skills.clone()),
        inventory: (previous.inventory != current.inventory).then(|| current.inventory.clone()),
        currency: (previous.currency != current.currency).then_some(current.currency),
        last_login: (previous.last_login != current.last_login).then_some(current.last_login),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ItemStack;

    #[test]
    fn test_first_snapshot_reports_everything() {
        let record = PlayerRecord::new("p");
        let updates = player_updates(None, &record);
        assert!(updates.skills.is_some());
        assert!(updates.inventory.is_some());
        assert_eq!(updates.currency, Some(0));
        assert_eq!(updates.last_login, Some(record.last_login));
    }

    #[test]
    fn test_only_changed_fields_reported() {
        let before = PlayerRecord::new("p");
        let mut after = before.clone();
        after.inventory.push(ItemStack::new(3, 1));

        let updates = player_updates(Some(&before), &after);
        assert_eq!(updates.inventory, Some(vec![ItemStack::new(3, 1)]));
        assert!(updates.skills.is_none());
        assert!(updates.currency.is_none());
        assert!(updates.last_login.is_none());
        assert!(player_updates(Some(&after), &after).is_empty());
    }
}
