//! # Sync Error Types
//!
//! ## Taxonomy
//!
//! | Error         | Scope       | Effect                                         |
//! |---------------|-------------|------------------------------------------------|
//! | `Validation`  | per change  | change rejected, siblings proceed              |
//! | `Permission`  | per change  | change rejected, siblings proceed              |
//! | `NotFound`    | per request | whole request fails                            |
//! | `Persistence` | per change  | dropped from the applied set, request succeeds |
//! | `Broadcast`   | side effect | logged and swallowed                           |
//!
//! The service never retries. Clients retry with the same
//! `lastSyncTimestamp`, which is safe because an already-authorized change
//! resolves to `server_wins`.

use skyhold_voxel::{BlockPos, VoxelError};
use thiserror::Error;

/// A structural or semantic problem with one pending change.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A position component was not a finite integer.
    #[error("position ({x}, {y}, {z}) is not an integer position")]
    NonIntegralPosition {
        /// X as submitted.
        x: f64,
        /// Y as submitted.
        y: f64,
        /// Z as submitted.
        z: f64,
    },

    /// The position lies outside the configured world bounds.
    #[error("position {0} is outside the world bounds")]
    OutOfBounds(BlockPos),

    /// A block id was non-integral or outside `[0, 255]`.
    #[error("{field} {value} is not a block id in [0, 255]")]
    InvalidBlockId {
        /// Which field failed.
        field: &'static str,
        /// The value submitted.
        value: f64,
    },

    /// The change had no author.
    #[error("change has an empty player id")]
    EmptyPlayerId,

    /// The change claims to come from the future.
    #[error("change timestamp is {ahead_secs}s ahead of server time")]
    FutureTimestamp {
        /// How far ahead, in seconds.
        ahead_secs: i64,
    },

    /// The kind-specific payload is unusable.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Too many changes inside the rate window (pre-flight only).
    #[error("rate limit exceeded: {count} changes in window, limit {limit}")]
    RateLimited {
        /// Changes counted in the window.
        count: usize,
        /// Allowed changes per window.
        limit: usize,
    },
}

/// Failure reported by the World Storage or Player Directory collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StorageError(pub String);

/// Failure reported by the Broadcast collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BroadcastError(pub String);

/// Errors that can occur while synchronizing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A change failed validation.
    #[error("invalid change: {0}")]
    Validation(#[from] ValidationError),

    /// The requester may not submit this change.
    #[error("player {requester} may not submit a change by {author} at {position}")]
    Permission {
        /// Player that submitted the request.
        requester: String,
        /// Author named on the change.
        author: String,
        /// Position of the change.
        position: BlockPos,
    },

    /// The player or their island could not be resolved.
    #[error("{0} not found")]
    NotFound(String),

    /// The request carries more changes than allowed.
    #[error("request carries {count} changes, limit is {limit}")]
    RequestTooLarge {
        /// Changes submitted.
        count: usize,
        /// Allowed changes per request.
        limit: usize,
    },

    /// The request body could not be decoded.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A resolved change failed to write.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// A broadcast could not be delivered.
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),

    /// A collaborator read failed.
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Chunk data was inconsistent.
    #[error(transparent)]
    Voxel(#[from] VoxelError),
}

impl SyncError {
    /// Returns true if this error fails the whole request rather than a
    /// single change.
    #[must_use]
    pub const fn is_request_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_) | Self::Permission { .. } | Self::Persistence(_) | Self::Broadcast(_)
        )
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
