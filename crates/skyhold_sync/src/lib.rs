//! # SKYHOLD Sync
//!
//! Authoritative world-state synchronization for player islands.
//!
//! Clients edit their island locally and periodically submit the edits in a
//! [`SyncRequest`]. The [`SynchronizationService`] validates every edit,
//! detects conflicts with what the server already authorized, resolves
//! them by policy, applies the winners, and answers with a
//! [`SyncResponse`] the client applies verbatim. Applied edits are fanned
//! out to the rest of the island's zone.
//!
//! ## Modules
//!
//! - [`protocol`]: wire types
//! - [`validation`] / [`preflight`]: server and client change checks
//! - [`resolver`]: conflict detection and per-kind resolution
//! - [`session`] / [`chunk_table`]: per-player and per-chunk locking
//! - [`service`]: the reconciliation pipeline
//! - [`collaborators`]: what the service needs from the rest of the server
//! - [`broadcast`]: off-thread zone fan-out
//! - [`memory`]: in-process collaborators for tests and simulation
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use skyhold_sync::memory::{InMemoryWorld, RecordingBroadcaster};
//! use skyhold_sync::{IslandInfo, PlayerRecord, SyncConfig, SyncRequest, SynchronizationService, VoxelChange};
//! use skyhold_voxel::{BlockPos, Vector3};
//!
//! let world = Arc::new(InMemoryWorld::new());
//! world.add_player(
//!     PlayerRecord::new("p1"),
//!     IslandInfo {
//!         island_id: "isle-1".into(),
//!         owner_id: "p1".into(),
//!         zone_id: "zone-1".into(),
//!         min: BlockPos::new(0, 0, 0),
//!         max: BlockPos::new(63, 255, 63),
//!     },
//! );
//! let service = SynchronizationService::new(
//!     SyncConfig::default(),
//!     world.collaborators(Arc::new(RecordingBroadcaster::new())),
//! )
//! .unwrap();
//!
//! let t0 = Utc::now();
//! let response = service.sync(&SyncRequest {
//!     player_id: "p1".into(),
//!     client_version: 1,
//!     last_sync_timestamp: t0,
//!     pending_changes: vec![VoxelChange::block("p1", Vector3::new(5.0, 1.0, 5.0), 0, 3, t0)],
//!     requested_chunks: Vec::new(),
//! });
//! assert!(response.success);
//! assert!(response.conflict_resolutions.is_empty());
//! assert_eq!(response.applied_changes.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod broadcast;
pub mod chunk_table;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod memory;
pub mod preflight;
pub mod protocol;
pub mod resolver;
pub mod service;
pub mod session;
pub mod validation;

pub use broadcast::{BroadcastEvent, QueuedBroadcaster};
pub use collaborators::{
    Broadcaster, Collaborators, IslandInfo, PermissionService, PlayerDirectory, PlayerRecord, WorldStorage,
};
pub use config::SyncConfig;
pub use error::{BroadcastError, StorageError, SyncError, SyncResult, ValidationError};
pub use preflight::{PreflightReport, PreflightValidator};
pub use protocol::{
    ChangeKind, ChangePayload, ChangeValue, ConflictResolution, ItemStack, PlayerUpdates, ResolutionKind, SyncRequest,
    SyncResponse, VoxelChange,
};
pub use resolver::{ConflictResolver, InventoryResolver, PlayerStateResolver, Resolved, VoxelResolver};
pub use service::{EvictionReport, SynchronizationService};
pub use session::{ServerState, SessionPhase, SessionStats};
pub use validation::{ChangeValidator, RateLimiter, RateVerdict, ValidatedChange};
