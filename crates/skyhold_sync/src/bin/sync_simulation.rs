//! # Sync Simulation
//!
//! Many players editing overlapping chunks against one service.
//!
//! Every player thread runs the client loop: pre-flight its edits, submit,
//! adopt the returned version. Now and then a client slips an invalid edit
//! past pre-flight or retries a batch the server already took, so
//! rejections and `server_wins` resolutions show up in the numbers.
//!
//! Usage: `sync_simulation [config.toml]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skyhold_sync::memory::{InMemoryWorld, RecordingBroadcaster};
use skyhold_sync::{
    IslandInfo, PlayerRecord, PreflightValidator, SyncConfig, SyncRequest, SynchronizationService, VoxelChange,
};
use skyhold_voxel::{BlockPos, ChunkCoordinate, Vector3};

const PLAYERS: usize = 16;
const ROUNDS: usize = 200;
const EDITS_PER_ROUND: usize = 8;
const SEED: u64 = 0x5EED;

#[derive(Default)]
struct Tally {
    requests: AtomicU64,
    failed: AtomicU64,
    applied: AtomicU64,
    rejected: AtomicU64,
    conflicts: AtomicU64,
    held_back: AtomicU64,
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         SKYHOLD - SYNC SIMULATION                                ║");
    println!("║         MANY HANDS, ONE WORLD                                    ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let config = match std::env::args().nth(1) {
        Some(path) => match SyncConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                println!("Error: {e}");
                return;
            }
        },
        None => SyncConfig {
            max_changes_per_window: 1_000,
            ..SyncConfig::default()
        },
    };

    let world = Arc::new(InMemoryWorld::new());
    for i in 0..PLAYERS {
        let player_id = format!("player-{i}");
        world.add_player(
            PlayerRecord::new(player_id.clone()),
            IslandInfo {
                island_id: format!("isle-{i}"),
                owner_id: player_id,
                zone_id: "zone-commons".to_string(),
                min: BlockPos::new(-32, 0, -32),
                max: BlockPos::new(31, 63, 31),
            },
        );
    }

    let broadcaster = Arc::new(RecordingBroadcaster::new());
    let service = match SynchronizationService::with_broadcast_queue(
        config.clone(),
        world.collaborators(broadcaster.clone()),
    ) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Players:            {PLAYERS}");
    println!("│ Rounds:             {ROUNDS}");
    println!("│ Edits per Round:    {EDITS_PER_ROUND}");
    println!("│ Rate Limit:         {} per {} ms", config.max_changes_per_window, config.rate_window_ms);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("Starting simulation...");

    let tally = Arc::new(Tally::default());
    let start = Instant::now();

    let handles: Vec<_> = (0..PLAYERS)
        .map(|i| {
            let service = Arc::clone(&service);
            let tally = Arc::clone(&tally);
            std::thread::spawn(move || run_player(i, &service, &tally))
        })
        .collect();
    for handle in handles {
        if handle.join().is_err() {
            println!("Error: a player thread panicked");
        }
    }

    let elapsed = start.elapsed();
    let stats = service.session_stats();
    let requests = tally.requests.load(Ordering::Relaxed);
    drop(service);

    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SIMULATION RESULTS                            ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ THROUGHPUT ────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {:.2} seconds", elapsed.as_secs_f64());
    println!("│ Requests:           {requests}");
    println!("│ Requests/sec:       {:.0}", requests as f64 / elapsed.as_secs_f64());
    println!("│ Failed Requests:    {}", tally.failed.load(Ordering::Relaxed));
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("┌─ CHANGES ───────────────────────────────────────────────────────┐");
    println!("│ Applied:            {}", tally.applied.load(Ordering::Relaxed));
    println!("│ Rejected (server):  {}", tally.rejected.load(Ordering::Relaxed));
    println!("│ Held Back (client): {}", tally.held_back.load(Ordering::Relaxed));
    println!("│ Conflicts:          {}", tally.conflicts.load(Ordering::Relaxed));
    println!("│ Authorized Log:     {}", stats.authorized_changes);
    println!("│ Sessions:           {}", stats.sessions);
    println!("│ Broadcasts:         {}", broadcaster.events().len());
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let origin = ChunkCoordinate::new(0, 0, 0);
    match skyhold_sync::WorldStorage::get_chunk(world.as_ref(), origin) {
        Ok(Some(chunk)) => println!("✓ {} holds {} solid voxels", chunk.chunk_id(), chunk.non_empty_count()),
        Ok(None) => println!("⚠ {origin} was never written"),
        Err(e) => println!("⚠ {origin} unreadable: {e}"),
    }
}

fn run_player(index: usize, service: &SynchronizationService, tally: &Tally) {
    let player_id = format!("player-{index}");
    let mut rng = StdRng::seed_from_u64(SEED + index as u64);
    let mut preflight = PreflightValidator::new(player_id.clone(), service.config());
    let mut last_sync = Utc::now() - chrono::Duration::seconds(1);
    let mut client_version = 0;
    let mut last_applied: Vec<VoxelChange> = Vec::new();

    for round in 0..ROUNDS {
        let now = Utc::now();
        let edits: Vec<VoxelChange> = (0..EDITS_PER_ROUND)
            .map(|_| {
                let position = Vector3::new(
                    f64::from(rng.gen_range(-24..24)),
                    f64::from(rng.gen_range(0..32)),
                    f64::from(rng.gen_range(-24..24)),
                );
                VoxelChange::block(player_id.clone(), position, 0, rng.gen_range(1..=255), now)
            })
            .collect();

        let report = preflight.check_batch(&edits);
        tally.held_back.fetch_add(report.rejected.len() as u64, Ordering::Relaxed);
        let mut pending = report.accepted;

        if rng.gen_bool(0.05) {
            pending.push(VoxelChange::block(player_id.clone(), Vector3::new(0.0, 400.0, 0.0), 0, 1, now));
        }
        if round % 10 == 9 {
            pending.extend(last_applied.iter().cloned());
        }

        let response = service.sync(&SyncRequest {
            player_id: player_id.clone(),
            client_version,
            last_sync_timestamp: last_sync,
            pending_changes: pending,
            requested_chunks: vec![ChunkCoordinate::new(0, 0, 0)],
        });

        tally.requests.fetch_add(1, Ordering::Relaxed);
        if !response.success {
            tally.failed.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        tally.applied.fetch_add(response.applied_changes.len() as u64, Ordering::Relaxed);
        tally.rejected.fetch_add(response.rejected_changes.len() as u64, Ordering::Relaxed);
        tally.conflicts.fetch_add(response.conflict_resolutions.len() as u64, Ordering::Relaxed);

        last_sync = response.timestamp;
        client_version = response.server_version;
        last_applied = response.applied_changes;
    }
}
