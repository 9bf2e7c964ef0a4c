//! # Broadcast Queue
//!
//! Moves zone fan-out off the request path.
//!
//! ```text
//! sync threads ──try_send──▶ [bounded channel] ──▶ worker ──▶ inner Broadcaster
//! ```
//!
//! Enqueueing never blocks. A full queue drops the event and reports a
//! [`BroadcastError`], which the service logs and swallows: delivery is
//! at-most-once anyway.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde_json::Value;

use crate::collaborators::Broadcaster;
use crate::error::BroadcastError;

/// One queued zone broadcast.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastEvent {
    /// Target zone.
    pub zone_id: String,
    /// Event name.
    pub event: String,
    /// JSON payload.
    pub payload: Value,
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    /// Events handed to the inner broadcaster successfully.
    pub delivered: AtomicU64,
    /// Events the inner broadcaster refused.
    pub failed: AtomicU64,
    /// Events dropped because the queue was full.
    pub dropped: AtomicU64,
}

/// A [`Broadcaster`] that hands events to a worker thread.
pub struct QueuedBroadcaster {
    sender: Option<Sender<BroadcastEvent>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<BroadcastStats>,
}

impl QueuedBroadcaster {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn(inner: Arc<dyn Broadcaster>, capacity: usize) -> io::Result<Self> {
        let (sender, receiver) = bounded::<BroadcastEvent>(capacity);
        let stats = Arc::new(BroadcastStats::default());
        let worker_stats = Arc::clone(&stats);

        let worker = std::thread::Builder::new()
            .name("skyhold-broadcast".to_string())
            .spawn(move || {
                // Ends once every sender is gone and the queue is drained.
                for event in receiver {
                    match inner.broadcast_to_zone(&event.zone_id, &event.event, &event.payload) {
                        Ok(()) => {
                            worker_stats.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(zone_id = %event.zone_id, error = %err, "broadcast failed");
                        }
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            stats,
        })
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    /// Stops accepting events, drains the queue and joins the worker.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("broadcast worker panicked");
            }
        }
    }
}

impl Broadcaster for QueuedBroadcaster {
    fn broadcast_to_zone(&self, zone_id: &str, event: &str, payload: &Value) -> Result<(), BroadcastError> {
        let Some(sender) = &self.sender else {
            return Err(BroadcastError("broadcast queue is shut down".into()));
        };
        let queued = BroadcastEvent {
            zone_id: zone_id.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        };
        match sender.try_send(queued) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(BroadcastError(format!("broadcast queue full, dropped event for zone {zone_id}")))
            }
            Err(TrySendError::Disconnected(_)) => Err(BroadcastError("broadcast worker has stopped".into())),
        }
    }
}

impl Drop for QueuedBroadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingBroadcaster;
    use serde_json::json;

    #[test]
    fn test_events_reach_inner_in_order() {
        let inner = Arc::new(RecordingBroadcaster::new());
        let mut queue = QueuedBroadcaster::spawn(inner.clone(), 16).unwrap();
        for i in 0..5 {
            queue.broadcast_to_zone("zone-a", "world_update", &json!({ "n": i })).unwrap();
        }
        queue.shutdown();

        let events = inner.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[4].payload["n"], 4);
        assert_eq!(queue.stats().delivered.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_inner_failures_are_counted() {
        let inner = Arc::new(RecordingBroadcaster::new());
        inner.set_failing(true);
        let mut queue = QueuedBroadcaster::spawn(inner, 4).unwrap();
        queue.broadcast_to_zone("z", "e", &Value::Null).unwrap();
        queue.shutdown();
        assert_eq!(queue.stats().failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let mut queue = QueuedBroadcaster::spawn(Arc::new(RecordingBroadcaster::new()), 4).unwrap();
        queue.shutdown();
        assert!(queue.broadcast_to_zone("z", "e", &Value::Null).is_err());
    }
}
