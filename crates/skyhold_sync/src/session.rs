//! # Player Sessions
//!
//! Authoritative per-player state, owned by one service instance.
//!
//! ## Lifecycle
//!
//! ```text
//! UNINITIALIZED ──first sync──▶ RECONCILING ──▶ INITIALIZED
//!                                   ▲                │
//!                                   └────next sync───┘
//! ```
//!
//! A session is created on first use and evicted after sitting idle for
//! the configured timeout. Each session has its own mutex: a player's
//! reconciliations run one at a time, different players in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::collaborators::PlayerRecord;
use crate::config::SyncConfig;
use crate::validation::{RateLimiter, ValidatedChange};

/// Authoritative state for one player.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerState {
    /// Owner.
    pub player_id: String,
    /// Server time of the last committed reconciliation.
    pub last_update_timestamp: DateTime<Utc>,
    /// World generation counter. Starts at 1, never decreases.
    pub world_version: u64,
    /// Player generation counter. Starts at 1, never decreases.
    pub player_version: u64,
    /// Append-only history of authorized changes.
    pub authorized_changes: Vec<ValidatedChange>,
    /// Player record as of the last reconciliation, for computing deltas.
    pub last_player_snapshot: Option<PlayerRecord>,
}

impl ServerState {
    /// Fresh state for a player's first sync.
    #[must_use]
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            last_update_timestamp: Utc::now(),
            world_version: 1,
            player_version: 1,
            authorized_changes: Vec::new(),
            last_player_snapshot: None,
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Created, no reconciliation has completed yet.
    Uninitialized,
    /// A reconciliation is in flight.
    Reconciling,
    /// Idle between reconciliations.
    Initialized,
}

/// Mutable part of a session, reached through [`Session::lock`].
#[derive(Debug)]
pub struct SessionState {
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Authoritative state.
    pub server: ServerState,
    /// Advisory change-rate counter.
    pub limiter: RateLimiter,
    /// Last time a request touched this session.
    pub last_active: Instant,
}

/// One player's session.
#[derive(Debug)]
pub struct Session {
    player_id: String,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(player_id: &str, limiter: RateLimiter) -> Self {
        Self {
            player_id: player_id.to_string(),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Uninitialized,
                server: ServerState::new(player_id),
                limiter,
                last_active: Instant::now(),
            }),
        }
    }

    /// Owner.
    #[must_use]
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Locks the session for the duration of one reconciliation.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }
}

/// Counters describing the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Live sessions.
    pub sessions: usize,
    /// Sessions with a reconciliation in flight.
    pub reconciling: usize,
    /// Sessions that completed at least one reconciliation.
    pub initialized: usize,
    /// Authorized changes held across all sessions.
    pub authorized_changes: usize,
    /// Sessions evicted since startup.
    pub evicted: u64,
}

/// All live sessions, keyed by player id.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    idle_timeout: Duration,
    rate_window: Duration,
    rate_limit: usize,
    evicted: Mutex<u64>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: config.session_idle_timeout(),
            rate_window: config.rate_window(),
            rate_limit: config.max_changes_per_window,
            evicted: Mutex::new(0),
        }
    }

    /// Returns the player's session, creating it on first use.
    pub fn get_or_create(&self, player_id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().get(player_id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write();
        let session = sessions.entry(player_id.to_string()).or_insert_with(|| {
            tracing::info!(player_id = %player_id, "session created");
            Arc::new(Session::new(player_id, RateLimiter::new(self.rate_window, self.rate_limit)))
        });
        Arc::clone(session)
    }

    /// Returns the player's session if one is live.
    #[must_use]
    pub fn get(&self, player_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(player_id).cloned()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Evicts sessions idle for longer than the timeout. Returns the count.
    ///
    /// A session that is locked or referenced by a request in flight is
    /// never evicted.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|player_id, session| {
            if Arc::strong_count(session) > 1 {
                return true;
            }
            let Some(state) = session.state.try_lock() else {
                return true;
            };
            let idle = now.saturating_duration_since(state.last_active);
            let keep = state.phase == SessionPhase::Reconciling || idle < self.idle_timeout;
            if !keep {
                tracing::info!(player_id = %player_id, idle_secs = idle.as_secs(), "session evicted");
            }
            keep
        });
        let evicted = before - sessions.len();
        *self.evicted.lock() += evicted as u64;
        evicted
    }

    /// Snapshot of the store counters.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read();
        let mut stats = SessionStats {
            sessions: sessions.len(),
            evicted: *self.evicted.lock(),
            ..SessionStats::default()
        };
        for session in sessions.values() {
            let state = session.lock();
            match state.phase {
                SessionPhase::Reconciling => stats.reconciling += 1,
                SessionPhase::Initialized => stats.initialized += 1,
                SessionPhase::Uninitialized => {}
            }
            stats.authorized_changes += state.server.authorized_changes.len();
        }
        stats
    }
}
