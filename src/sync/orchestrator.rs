//! The sync orchestrator.
//!
//! One instance per process, constructed with injected storage, network
//! adapter, connectivity, and clock. Local stores are written immediately;
//! remote reconciliation drains the durable queue under a single-flight flag.
//!
//! Drain states: idle -> draining -> idle. A drain is skipped silently when
//! the device is offline or unauthenticated. Per-item errors never escape the
//! drain loop; the only fail-fast is parking an item that exhausted its
//! attempts, which ends the current pass (later passes resume the backlog).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::core::{
    plan_definition_hash, ActionKind, ChapterKey, Clock, ConflictRecord, PlanId, PlanMetadata,
    PlanStatus, ProgressEntry, Timestamp, UserId,
};
use crate::error::Error;
use crate::store::{
    IdempotencyLedger, ItemStatus, KvStore, Mutation, PlanStore, ProgressStore, QueueItem,
    SyncQueue,
};

use super::adapter::{Connectivity, NetworkAdapter, RemotePlanRow};
use super::backoff::jittered_delay;
use super::scheduler::{SyncScheduler, TimerKind};
use super::stats::{QueueStats, StatsBroadcaster, StatsSubscription};

/// Result of one drain request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Network unreachable; nothing attempted.
    Offline,
    /// No authenticated session; nothing attempted.
    NoSession,
    /// Another drain is in flight; this call was a no-op.
    Busy,
    /// A timer wakeup superseded by a later reset; dropped.
    Stale,
    /// A pass ran to its end (or to a parked item).
    Drained {
        sent: usize,
        already_applied: usize,
        parked_failed: bool,
    },
}

/// Result of an immediate (queue-bypassing) full re-sync of one plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncOutcome {
    pub entries_pushed: usize,
    pub plan_pushed: bool,
    pub conflicts: Vec<ConflictRecord>,
    pub redundant_items_completed: usize,
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    adapter: Arc<dyn NetworkAdapter>,
    connectivity: Arc<dyn Connectivity>,
    progress: ProgressStore,
    plans: PlanStore,
    queue: SyncQueue,
    ledger: IdempotencyLedger,
    scheduler: Mutex<SyncScheduler>,
    timer_tx: Sender<TimerKind>,
    timer_rx: Receiver<TimerKind>,
    broadcaster: StatsBroadcaster,
    draining: AtomicBool,
    last_synced_at: Mutex<Option<Timestamp>>,
}

impl SyncOrchestrator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        adapter: Arc<dyn NetworkAdapter>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let (timer_tx, timer_rx) = crossbeam::channel::unbounded();
        let broadcaster = StatsBroadcaster::new(config.stats_buffer);
        Self {
            scheduler: Mutex::new(SyncScheduler::new(timer_tx.clone())),
            progress: ProgressStore::new(Arc::clone(&kv)),
            plans: PlanStore::new(Arc::clone(&kv)),
            queue: SyncQueue::with_max_attempts(Arc::clone(&kv), config.max_attempts),
            ledger: IdempotencyLedger::new(kv),
            config,
            clock,
            adapter,
            connectivity,
            timer_tx,
            timer_rx,
            broadcaster,
            draining: AtomicBool::new(false),
            last_synced_at: Mutex::new(None),
        }
    }

    pub fn progress_store(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn plan_store(&self) -> &PlanStore {
        &self.plans
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    // ------------------------------------------------------------------
    // Local mutations (immediate) + enqueue
    // ------------------------------------------------------------------

    /// Activate a plan locally and queue its metadata for sync.
    pub fn activate_plan(
        &self,
        plan_id: PlanId,
        definition: &Value,
        plan_version: u32,
    ) -> Result<PlanMetadata, Error> {
        let now = self.clock.now();
        let metadata = PlanMetadata::new(
            plan_id,
            plan_definition_hash(definition),
            plan_version,
            now,
        );
        self.plans.upsert(&metadata)?;
        self.enqueue_and_kick(Mutation::PlanStatusChange {
            metadata: metadata.clone(),
        })?;
        Ok(metadata)
    }

    /// Toggle one chapter: local append, coalescing enqueue, debounced drain.
    pub fn toggle_chapter(
        &self,
        plan_id: &PlanId,
        day_number: u32,
        chapters: &[ChapterKey],
        target: &ChapterKey,
        kind: ActionKind,
    ) -> Result<ProgressEntry, Error> {
        let now = self.clock.now();
        let entry = self
            .progress
            .set_chapter_action(plan_id, day_number, chapters, target, kind, now)?;
        self.queue.enqueue(
            Mutation::ChapterToggle {
                entry: entry.clone(),
            },
            crate::store::MutationKind::ChapterToggle.default_priority(),
            now,
        )?;
        self.publish_stats();

        // Repeated toggles within the window reset the timer.
        if let Ok(mut scheduler) = self.scheduler.lock() {
            scheduler.schedule_after(TimerKind::Debounce(plan_id.clone()), self.config.debounce());
        }
        Ok(entry)
    }

    /// Mark a whole day complete: local force-complete, immediate drain.
    pub fn complete_day(
        &self,
        plan_id: &PlanId,
        day_number: u32,
        chapters: &[ChapterKey],
    ) -> Result<ProgressEntry, Error> {
        let now = self.clock.now();
        let entry = self
            .progress
            .mark_day_complete(plan_id, day_number, chapters, now)?;
        self.enqueue_and_kick(Mutation::DayComplete {
            entry: entry.clone(),
        })?;
        Ok(entry)
    }

    /// Attach a catch-up adjustment to the plan and queue it.
    pub fn apply_catch_up(
        &self,
        plan_id: &PlanId,
        adjustment: Value,
    ) -> Result<PlanMetadata, Error> {
        let mut metadata = self.plans.get(plan_id)?.ok_or_else(|| {
            Error::Core(
                crate::core::InvalidId::Plan {
                    raw: plan_id.to_string(),
                    reason: "unknown plan".into(),
                }
                .into(),
            )
        })?;
        metadata.catch_up_adjustment = Some(adjustment);
        self.plans.upsert(&metadata)?;
        self.enqueue_and_kick(Mutation::CatchUpApplied {
            metadata: metadata.clone(),
        })?;
        Ok(metadata)
    }

    /// Change plan lifecycle status (transition-checked) and queue it.
    pub fn change_plan_status(
        &self,
        plan_id: &PlanId,
        status: PlanStatus,
    ) -> Result<PlanMetadata, Error> {
        let metadata = self.plans.set_status(plan_id, status, self.clock.now())?;
        self.enqueue_and_kick(Mutation::PlanStatusChange {
            metadata: metadata.clone(),
        })?;
        Ok(metadata)
    }

    fn enqueue_and_kick(&self, mutation: Mutation) -> Result<(), Error> {
        let priority = mutation.kind().default_priority();
        self.queue.enqueue(mutation, priority, self.clock.now())?;
        self.publish_stats();
        // Non-coalesced kinds drain immediately; skips are silent.
        let _ = self.drain()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Draining
    // ------------------------------------------------------------------

    /// One drain pass. Re-entrant calls while draining are no-ops.
    pub fn drain(&self) -> Result<DrainOutcome, Error> {
        if !self.connectivity.is_online() {
            debug!("drain skipped: offline");
            return Ok(DrainOutcome::Offline);
        }
        let Some(user) = self.connectivity.session() else {
            debug!("drain skipped: no session");
            return Ok(DrainOutcome::NoSession);
        };

        if self.draining.swap(true, Ordering::SeqCst) {
            return Ok(DrainOutcome::Busy);
        }
        let result = self.drain_pass(&user);
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    fn drain_pass(&self, user: &UserId) -> Result<DrainOutcome, Error> {
        // Single-flight means a processing item here is a leftover from a
        // crashed run; resubmit it. Duplicate remote effects are ruled out by
        // the ledger and the backend's operation dedup.
        let requeued = self.queue.requeue_processing()?;
        if requeued > 0 {
            info!(requeued, "requeued items stranded in processing");
        }

        let items = self.queue.pending_sorted()?;
        debug!(items = items.len(), "drain pass starting");

        let mut sent = 0;
        let mut already_applied = 0;
        let mut parked_failed = false;

        for item in items {
            // A prior attempt may have succeeded remotely while the local
            // acknowledgment was lost: the ledger says so.
            if self.ledger.is_applied(item.operation_id)? {
                debug!(operation = %item.operation_id, "already applied, marking done");
                self.queue.mark_done(item.id)?;
                already_applied += 1;
                self.publish_stats();
                continue;
            }

            self.queue.mark_processing(item.id, self.clock.now())?;
            self.publish_stats();

            match self.execute(&item, user) {
                Ok(()) => {
                    let applied_at = self.clock.now();
                    self.ledger.record(item.operation_id, applied_at)?;
                    self.queue.mark_done(item.id)?;
                    self.plans
                        .touch_last_synced(item.mutation.plan_id(), applied_at)?;
                    self.set_last_synced(applied_at);
                    sent += 1;
                    self.publish_stats();
                }
                Err(err) => {
                    warn!(
                        item = %item.id,
                        kind = %item.mutation.kind(),
                        error = %err,
                        "item attempt failed"
                    );
                    let status =
                        self.queue
                            .record_failure(item.id, &err.to_string(), self.clock.now())?;
                    self.publish_stats();
                    match status {
                        ItemStatus::Pending => {
                            let attempts = self
                                .queue
                                .get(item.id)?
                                .map(|i| i.attempts)
                                .unwrap_or(1);
                            let delay = jittered_delay(attempts);
                            debug!(delay_ms = delay.as_millis() as u64, "retry scheduled");
                            if let Ok(mut scheduler) = self.scheduler.lock() {
                                scheduler.schedule_after(TimerKind::Retry, delay);
                            }
                        }
                        ItemStatus::Failed => {
                            // Fail-fast per pass: a parked item ends this
                            // drain so the failure surfaces instead of
                            // re-grinding the backlog behind it.
                            warn!(item = %item.id, "attempts exhausted, parking as failed");
                            parked_failed = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        let pruned = self.queue.prune_done()?;
        if pruned > 0 {
            debug!(pruned, "pruned confirmed queue items");
            self.publish_stats();
        }

        Ok(DrainOutcome::Drained {
            sent,
            already_applied,
            parked_failed,
        })
    }

    /// Execute one item's remote call and fold the authoritative row back in.
    ///
    /// Adapter and store errors alike count as one failed attempt.
    fn execute(&self, item: &QueueItem, user: &UserId) -> Result<(), Error> {
        match &item.mutation {
            Mutation::ChapterToggle { entry } | Mutation::DayComplete { entry } => {
                let row = self
                    .adapter
                    .upsert_reading_progress(item.operation_id, user, entry)?;
                let (_, conflict) = self.progress.merge_remote(&row.entry)?;
                if let Some(conflict) = conflict {
                    info!(
                        plan = %conflict.plan_id,
                        day = conflict.day_number,
                        "completion conflict recorded during merge"
                    );
                    self.plans
                        .record_conflicts(item.mutation.plan_id(), &[conflict])?;
                }
            }
            Mutation::CatchUpApplied { metadata } | Mutation::PlanStatusChange { metadata } => {
                let row = self
                    .adapter
                    .upsert_plan_metadata(item.operation_id, user, metadata)?;
                self.merge_plan_row(&row)?;
            }
        }
        Ok(())
    }

    /// Fold an authoritative plan row into the local store, keeping the union
    /// of conflict records.
    fn merge_plan_row(&self, row: &RemotePlanRow) -> Result<(), Error> {
        let mut merged = PlanMetadata {
            plan_id: row.plan_id.clone(),
            status: row.status,
            plan_definition_hash: row.plan_definition_hash.clone(),
            plan_version: row.plan_version,
            activated_at: row.activated_at,
            archived_at: row.archived_at,
            last_synced_at: row.last_synced_at,
            sync_conflicts: row.sync_conflicts.clone(),
            catch_up_adjustment: row.catch_up_adjustment.clone(),
        };
        if let Some(local) = self.plans.get(&row.plan_id)? {
            for conflict in local.sync_conflicts {
                if !merged.sync_conflicts.contains(&conflict) {
                    merged.sync_conflicts.push(conflict);
                }
            }
            // The watermark only moves forward.
            merged.last_synced_at = match (local.last_synced_at, merged.last_synced_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        self.plans.upsert(&merged)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Handle one timer completion. Stale wakeups (superseded by a reset) are
    /// dropped.
    pub fn handle_timer(&self, kind: TimerKind) -> Result<DrainOutcome, Error> {
        let fire = match self.scheduler.lock() {
            Ok(mut scheduler) => scheduler.should_fire(&kind),
            Err(_) => false,
        };
        if fire {
            self.drain()
        } else {
            Ok(DrainOutcome::Stale)
        }
    }

    /// Receiver of timer completions, for a host-owned event loop.
    pub fn timer_events(&self) -> Receiver<TimerKind> {
        self.timer_rx.clone()
    }

    /// Block servicing timers until the sender side is gone.
    pub fn run_timer_loop(&self) {
        while let Ok(kind) = self.timer_rx.recv() {
            if let Err(err) = self.handle_timer(kind) {
                warn!(error = %err, "timer-triggered drain failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Reset all failed items to pending (clearing errors) and drain.
    pub fn retry_failed(&self) -> Result<usize, Error> {
        let reset = self.queue.retry_failed()?;
        info!(reset, "failed items reset to pending");
        self.publish_stats();
        if reset > 0 {
            let _ = self.drain()?;
        }
        Ok(reset)
    }

    /// Queue-bypassing full re-sync of one plan's progress and metadata.
    ///
    /// Used for explicit "force sync" actions; errors propagate to the caller
    /// instead of being folded into queue state. Pending items for the plan
    /// are redundant afterward and get marked done.
    pub fn run_immediate_sync(&self, plan_id: &PlanId, reason: &str) -> Result<SyncOutcome, Error> {
        let Some(user) = self.connectivity.session() else {
            return Err(Error::Adapter(super::adapter::AdapterError::Network {
                reason: "no authenticated session".into(),
            }));
        };
        if !self.connectivity.is_online() {
            return Err(Error::Adapter(super::adapter::AdapterError::Network {
                reason: "offline".into(),
            }));
        }
        info!(plan = %plan_id, reason, "immediate sync starting");

        let mut outcome = SyncOutcome::default();
        for entry in self.progress.entries_for_plan(plan_id)? {
            let row = self
                .adapter
                .upsert_reading_progress(crate::core::OperationId::random(), &user, &entry)?;
            let (_, conflict) = self.progress.merge_remote(&row.entry)?;
            if let Some(conflict) = conflict {
                outcome.conflicts.push(conflict);
            }
            outcome.entries_pushed += 1;
        }
        if !outcome.conflicts.is_empty() {
            self.plans.record_conflicts(plan_id, &outcome.conflicts)?;
        }

        if let Some(metadata) = self.plans.get(plan_id)? {
            let row = self.adapter.upsert_plan_metadata(
                crate::core::OperationId::random(),
                &user,
                &metadata,
            )?;
            self.merge_plan_row(&row)?;
            outcome.plan_pushed = true;
        }

        let now = self.clock.now();
        self.plans.touch_last_synced(plan_id, now)?;
        self.set_last_synced(now);
        outcome.redundant_items_completed = self.queue.complete_pending_for_plan(plan_id)?;
        self.queue.prune_done()?;
        self.publish_stats();
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    pub fn subscribe_stats(&self) -> StatsSubscription {
        self.broadcaster.subscribe()
    }

    pub fn stats(&self) -> Result<QueueStats, Error> {
        Ok(QueueStats::from_counts(
            self.queue.counts()?,
            self.last_synced(),
            self.queue.last_error()?,
        ))
    }

    fn publish_stats(&self) {
        match self.stats() {
            Ok(stats) => self.broadcaster.publish(&stats),
            Err(err) => debug!(error = %err, "stats snapshot unavailable"),
        }
    }

    fn set_last_synced(&self, at: Timestamp) {
        if let Ok(mut guard) = self.last_synced_at.lock() {
            if guard.map_or(true, |prev| at > prev) {
                *guard = Some(at);
            }
        }
    }

    fn last_synced(&self) -> Option<Timestamp> {
        self.last_synced_at.lock().ok().and_then(|g| *g)
    }

    /// Sender half of the timer channel, for hosts that drive their own
    /// timers (mobile shells with platform alarms).
    pub fn timer_sender(&self) -> Sender<TimerKind> {
        self.timer_tx.clone()
    }
}
