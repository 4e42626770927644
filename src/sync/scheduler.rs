//! Debounce/retry timers.
//!
//! Two single-shot timer kinds exist: a per-plan debounce timer for coalesced
//! chapter toggles and one retry timer for backoff. Timers reset rather than
//! stack - scheduling a kind again supersedes its pending deadline. Firing is
//! delivered over a channel; stale thread wakeups (from a superseded deadline)
//! are filtered by `should_fire`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use crate::core::PlanId;

/// What a timer completion means.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Coalesced chapter-toggle debounce for one plan.
    Debounce(PlanId),
    /// Backoff retry for the whole queue.
    Retry,
}

/// Manages the single-shot timers that trigger drains.
pub struct SyncScheduler {
    /// Pending timers: kind -> deadline.
    pending: HashMap<TimerKind, Instant>,

    /// Channel to send timer completions.
    timer_tx: Sender<TimerKind>,
}

impl SyncScheduler {
    pub fn new(timer_tx: Sender<TimerKind>) -> Self {
        SyncScheduler {
            pending: HashMap::new(),
            timer_tx,
        }
    }

    /// Schedule a timer after `delay`, superseding any pending deadline of
    /// the same kind (reset semantics - a repeated toggle pushes the debounce
    /// window out).
    pub fn schedule_after(&mut self, kind: TimerKind, delay: Duration) {
        let fire_at = Instant::now() + delay;
        self.pending.insert(kind.clone(), fire_at);

        // Spawn timer thread; stale wakeups are filtered by should_fire.
        let tx = self.timer_tx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            // Ignore send errors - receiver may have been dropped
            let _ = tx.send(kind);
        });
    }

    /// Check whether a delivered completion is current.
    ///
    /// Returns true and clears the entry if the kind's deadline has passed;
    /// returns false for wakeups superseded by a later reschedule.
    pub fn should_fire(&mut self, kind: &TimerKind) -> bool {
        if let Some(&fire_at) = self.pending.get(kind) {
            if Instant::now() >= fire_at {
                self.pending.remove(kind);
                return true;
            }
        }
        false
    }

    /// Cancel a pending timer.
    pub fn cancel(&mut self, kind: &TimerKind) {
        self.pending.remove(kind);
    }

    pub fn is_pending(&self, kind: &TimerKind) -> bool {
        self.pending.contains_key(kind)
    }
}
