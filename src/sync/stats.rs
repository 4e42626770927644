//! Observable queue statistics.
//!
//! The orchestrator recomputes a `QueueStats` snapshot after every
//! state-changing operation and pushes it to all subscribers. This is the
//! only user-visible sync signal; surfacing is delegated to the presentation
//! layer.

use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::core::Timestamp;
use crate::store::ItemCounts;

/// One published snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueStats {
    pub fn from_counts(
        counts: ItemCounts,
        last_synced_at: Option<Timestamp>,
        last_error: Option<String>,
    ) -> Self {
        Self {
            pending: counts.pending,
            processing: counts.processing,
            done: counts.done,
            failed: counts.failed,
            last_synced_at,
            last_error,
        }
    }
}

/// A live subscription. Dropping it unsubscribes on the next publish.
pub struct StatsSubscription {
    receiver: Receiver<QueueStats>,
}

impl StatsSubscription {
    pub fn recv(&self) -> Result<QueueStats, crossbeam::channel::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Option<QueueStats> {
        self.receiver.try_recv().ok()
    }

    /// Drain to the most recent snapshot, if any arrived.
    pub fn latest(&self) -> Option<QueueStats> {
        let mut latest = None;
        while let Ok(stats) = self.receiver.try_recv() {
            latest = Some(stats);
        }
        latest
    }
}

/// Fan-out of stats snapshots to subscribers.
///
/// Bounded per-subscriber buffers; a subscriber that stops draining loses
/// intermediate snapshots but stats are idempotent summaries, so only the
/// latest matters.
#[derive(Clone)]
pub struct StatsBroadcaster {
    inner: Arc<Mutex<Vec<Sender<QueueStats>>>>,
    buffer: usize,
}

impl StatsBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> StatsSubscription {
        let (tx, rx) = crossbeam::channel::bounded(self.buffer);
        if let Ok(mut subscribers) = self.inner.lock() {
            subscribers.push(tx);
        }
        StatsSubscription { receiver: rx }
    }

    pub fn publish(&self, stats: &QueueStats) {
        let Ok(mut subscribers) = self.inner.lock() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(stats.clone()) {
            Ok(()) => true,
            // Full buffer: drop the snapshot, keep the subscriber.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for StatsBroadcaster {
    fn default() -> Self {
        Self::new(32)
    }
}
