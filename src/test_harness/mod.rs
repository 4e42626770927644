//! Deterministic test harness: manual clock, scriptable fake backend, and a
//! `TestWorld` that wires an orchestrator over in-memory storage.
//!
//! Compiled into the crate (not behind `cfg(test)`) so integration tests and
//! downstream embedders can drive the engine without a real backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::SyncConfig;
use crate::core::{
    ActionKind, ChapterKey, Clock, OperationId, PlanId, PlanMetadata, ProgressEntry, Timestamp,
    UserId,
};
use crate::store::MemoryKv;
use crate::sync::adapter::{
    AdapterError, Connectivity, NetworkAdapter, RemotePlanRow, RemoteProgressRow,
};
use crate::sync::SyncOrchestrator;

#[derive(Clone)]
pub struct TestClock {
    now: Arc<AtomicU64>,
}

impl TestClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now_ms())
    }
}

/// Host connectivity with test-togglable state.
#[derive(Clone)]
pub struct TestConnectivity {
    online: Arc<AtomicBool>,
    session: Arc<Mutex<Option<UserId>>>,
}

impl TestConnectivity {
    pub fn online_as(user: UserId) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
            session: Arc::new(Mutex::new(Some(user))),
        }
    }

    pub fn offline() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(false)),
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_session(&self, user: Option<UserId>) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = user;
        }
    }
}

impl Connectivity for TestConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn session(&self) -> Option<UserId> {
        self.session.lock().ok().and_then(|g| g.clone())
    }
}

#[derive(Default)]
struct FakeBackendState {
    // Natural-key tables, as the real backend keeps them.
    progress: BTreeMap<(UserId, PlanId, u32), ProgressEntry>,
    plans: BTreeMap<(UserId, PlanId), PlanMetadata>,
    // Server-side dedup of (operation_id, user_id).
    seen_ops: HashSet<(OperationId, UserId)>,
    // Scripted failures consumed one per call, in order.
    failures: Vec<ScriptedFailure>,
    calls: u64,
}

#[derive(Clone, Debug)]
pub enum ScriptedFailure {
    /// Request never reaches the backend; no state change.
    NetworkDown,
    /// Backend applies the write, then the acknowledgment is lost.
    AckLost,
    /// Backend rejects with the given status; no state change.
    Remote { status: u16, message: String },
}

/// In-memory stand-in for the remote backend.
///
/// Honors both idempotency guards: upserts are keyed by natural identity,
/// and a replayed `(operation_id, user_id)` pair is a no-op that still
/// returns the current row.
#[derive(Clone, Default)]
pub struct FakeAdapter {
    state: Arc<Mutex<FakeBackendState>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next calls to fail, in order. Each failure is consumed by
    /// exactly one call.
    pub fn fail_next(&self, failures: Vec<ScriptedFailure>) {
        if let Ok(mut state) = self.state.lock() {
            state.failures = failures;
        }
    }

    pub fn calls(&self) -> u64 {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }

    pub fn progress_row(
        &self,
        user: &UserId,
        plan: &PlanId,
        day_number: u32,
    ) -> Option<ProgressEntry> {
        self.state
            .lock()
            .ok()?
            .progress
            .get(&(user.clone(), plan.clone(), day_number))
            .cloned()
    }

    pub fn plan_row(&self, user: &UserId, plan: &PlanId) -> Option<PlanMetadata> {
        self.state
            .lock()
            .ok()?
            .plans
            .get(&(user.clone(), plan.clone()))
            .cloned()
    }

    /// Seed a row directly, as if another device had synced it.
    pub fn seed_progress(&self, user: &UserId, entry: ProgressEntry) {
        if let Ok(mut state) = self.state.lock() {
            state.progress.insert(
                (user.clone(), entry.plan_id.clone(), entry.day_number),
                entry,
            );
        }
    }

    pub fn applied_operations(&self) -> usize {
        self.state.lock().map(|s| s.seen_ops.len()).unwrap_or(0)
    }
}

fn locked(
    state: &Arc<Mutex<FakeBackendState>>,
) -> Result<std::sync::MutexGuard<'_, FakeBackendState>, AdapterError> {
    state.lock().map_err(|_| AdapterError::Network {
        reason: "fake backend poisoned".into(),
    })
}

impl NetworkAdapter for FakeAdapter {
    fn upsert_reading_progress(
        &self,
        operation_id: OperationId,
        user_id: &UserId,
        entry: &ProgressEntry,
    ) -> Result<RemoteProgressRow, AdapterError> {
        let mut state = locked(&self.state)?;
        state.calls += 1;

        let mut ack_lost = false;
        if !state.failures.is_empty() {
            match state.failures.remove(0) {
                ScriptedFailure::NetworkDown => {
                    return Err(AdapterError::Network {
                        reason: "scripted network failure".into(),
                    });
                }
                ScriptedFailure::Remote { status, message } => {
                    return Err(AdapterError::Remote { status, message });
                }
                ScriptedFailure::AckLost => ack_lost = true,
            }
        }

        let dedup_key = (operation_id, user_id.clone());
        let natural_key = (user_id.clone(), entry.plan_id.clone(), entry.day_number);
        if state.seen_ops.insert(dedup_key) {
            state.progress.insert(natural_key.clone(), entry.clone());
        }
        let row = state
            .progress
            .get(&natural_key)
            .cloned()
            .ok_or_else(|| AdapterError::Remote {
                status: 500,
                message: "row vanished".into(),
            })?;

        if ack_lost {
            return Err(AdapterError::Network {
                reason: "scripted lost acknowledgment".into(),
            });
        }
        Ok(RemoteProgressRow {
            user_id: user_id.clone(),
            entry: row,
            updated_at: Timestamp(state.calls),
        })
    }

    fn upsert_plan_metadata(
        &self,
        operation_id: OperationId,
        user_id: &UserId,
        metadata: &PlanMetadata,
    ) -> Result<RemotePlanRow, AdapterError> {
        let mut state = locked(&self.state)?;
        state.calls += 1;

        let mut ack_lost = false;
        if !state.failures.is_empty() {
            match state.failures.remove(0) {
                ScriptedFailure::NetworkDown => {
                    return Err(AdapterError::Network {
                        reason: "scripted network failure".into(),
                    });
                }
                ScriptedFailure::Remote { status, message } => {
                    return Err(AdapterError::Remote { status, message });
                }
                ScriptedFailure::AckLost => ack_lost = true,
            }
        }

        let dedup_key = (operation_id, user_id.clone());
        let natural_key = (user_id.clone(), metadata.plan_id.clone());
        if state.seen_ops.insert(dedup_key) {
            state.plans.insert(natural_key.clone(), metadata.clone());
        }
        let row = state
            .plans
            .get(&natural_key)
            .cloned()
            .ok_or_else(|| AdapterError::Remote {
                status: 500,
                message: "row vanished".into(),
            })?;

        if ack_lost {
            return Err(AdapterError::Network {
                reason: "scripted lost acknowledgment".into(),
            });
        }
        Ok(RemotePlanRow {
            user_id: user_id.clone(),
            plan_id: row.plan_id.clone(),
            status: row.status,
            plan_definition_hash: row.plan_definition_hash.clone(),
            plan_version: row.plan_version,
            activated_at: row.activated_at,
            archived_at: row.archived_at,
            last_synced_at: row.last_synced_at,
            sync_conflicts: row.sync_conflicts.clone(),
            catch_up_adjustment: row.catch_up_adjustment.clone(),
            updated_at: Timestamp(state.calls),
        })
    }
}

/// One device: orchestrator + fakes, sharing a backend with other devices
/// built from the same `FakeAdapter`.
pub struct TestWorld {
    pub clock: TestClock,
    pub adapter: FakeAdapter,
    pub connectivity: TestConnectivity,
    pub orchestrator: SyncOrchestrator,
}

impl TestWorld {
    pub fn new(user: &str, start_ms: u64) -> Self {
        Self::with_backend(user, start_ms, FakeAdapter::new())
    }

    /// Build a second device against an existing backend.
    pub fn with_backend(user: &str, start_ms: u64, adapter: FakeAdapter) -> Self {
        let user = UserId::new(user).unwrap_or_else(|_| {
            panic!("test user id must be non-empty");
        });
        let clock = TestClock::new(start_ms);
        let connectivity = TestConnectivity::online_as(user);
        let orchestrator = SyncOrchestrator::new(
            Arc::new(MemoryKv::new()),
            Arc::new(adapter.clone()),
            Arc::new(connectivity.clone()),
            Arc::new(clock.clone()),
            SyncConfig::default(),
        );
        Self {
            clock,
            adapter,
            connectivity,
            orchestrator,
        }
    }

    pub fn plan_id(raw: &str) -> PlanId {
        PlanId::new(raw).unwrap_or_else(|_| panic!("test plan id must be non-empty"))
    }

    pub fn chapter(book: &str, chapter: u32) -> ChapterKey {
        ChapterKey::new(book, chapter)
            .unwrap_or_else(|_| panic!("test chapter key must be valid"))
    }

    pub fn check(&self, plan: &PlanId, day: u32, chapters: &[ChapterKey], target: &ChapterKey) {
        self.orchestrator
            .toggle_chapter(plan, day, chapters, target, ActionKind::Checked)
            .unwrap_or_else(|e| panic!("toggle failed: {e}"));
    }
}
