//! Durable mutation queue.
//!
//! Each item is one not-yet-confirmed logical mutation. Chapter toggles
//! coalesce per plan so rapid toggling occupies one queue slot; every other
//! kind appends. Status transitions happen only through this type's methods,
//! and only the orchestrator calls them.
//!
//! Keys: `queue/{item_id}`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{OperationId, PlanId, PlanMetadata, ProgressEntry, Timestamp};

use super::kv::{decode, encode, KvStore, StoreError};

const PREFIX: &str = "queue/";

/// Attempt ceiling: after this many failed attempts an item parks as `failed`
/// until the user retries it explicitly.
pub const MAX_ATTEMPTS: u32 = 5;

/// Queue slot identifier. Identifies the slot, not the logical mutation;
/// the idempotency key is the item's `operation_id`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One logical mutation, tagged by kind. Payloads are snapshots taken at
/// enqueue time; a coalescing enqueue replaces the snapshot wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Mutation {
    /// Latest chapter-toggle state for one day. Coalesced per plan.
    ChapterToggle { entry: ProgressEntry },
    /// Day force-completed.
    DayComplete { entry: ProgressEntry },
    /// Catch-up adjustment applied to the plan.
    CatchUpApplied { metadata: PlanMetadata },
    /// Plan lifecycle change.
    PlanStatusChange { metadata: PlanMetadata },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    ChapterToggle,
    DayComplete,
    CatchUpApplied,
    PlanStatusChange,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::ChapterToggle => "chapter-toggle",
            MutationKind::DayComplete => "day-complete",
            MutationKind::CatchUpApplied => "catch-up-applied",
            MutationKind::PlanStatusChange => "plan-status-change",
        }
    }

    /// Lower value drains first. Lifecycle changes land before bulk progress;
    /// coalesced toggles form the tail.
    pub fn default_priority(self) -> u8 {
        match self {
            MutationKind::PlanStatusChange => 1,
            MutationKind::CatchUpApplied => 2,
            MutationKind::DayComplete => 2,
            MutationKind::ChapterToggle => 3,
        }
    }

    /// Only chapter toggles coalesce (and debounce).
    pub fn coalesces(self) -> bool {
        matches!(self, MutationKind::ChapterToggle)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::ChapterToggle { .. } => MutationKind::ChapterToggle,
            Mutation::DayComplete { .. } => MutationKind::DayComplete,
            Mutation::CatchUpApplied { .. } => MutationKind::CatchUpApplied,
            Mutation::PlanStatusChange { .. } => MutationKind::PlanStatusChange,
        }
    }

    pub fn plan_id(&self) -> &PlanId {
        match self {
            Mutation::ChapterToggle { entry } | Mutation::DayComplete { entry } => &entry.plan_id,
            Mutation::CatchUpApplied { metadata } | Mutation::PlanStatusChange { metadata } => {
                &metadata.plan_id
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        }
    }
}

/// One durable queue slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub mutation: Mutation,
    pub operation_id: OperationId,
    pub priority: u8,
    pub created_at: Timestamp,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<Timestamp>,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Counts per status, for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SyncQueue {
    kv: Arc<dyn KvStore>,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_max_attempts(kv, MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(kv: Arc<dyn KvStore>, max_attempts: u32) -> Self {
        Self {
            kv,
            max_attempts: max_attempts.max(1),
        }
    }

    fn key(id: ItemId) -> String {
        format!("{PREFIX}{}", id)
    }

    fn put(&self, item: &QueueItem) -> Result<(), StoreError> {
        self.kv.put(&Self::key(item.id), encode(item)?)
    }

    pub fn get(&self, id: ItemId) -> Result<Option<QueueItem>, StoreError> {
        let key = Self::key(id);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn all(&self) -> Result<Vec<QueueItem>, StoreError> {
        self.kv
            .scan_prefix(PREFIX)?
            .into_iter()
            .map(|(key, bytes)| decode(&key, &bytes))
            .collect()
    }

    /// Append a pending item, or coalesce a chapter toggle into the existing
    /// pending slot for the same plan (payload replaced, `created_at`
    /// refreshed, `last_error` cleared, `operation_id` reissued).
    ///
    /// The fresh `operation_id` matters: a prior attempt may have landed
    /// server-side with the acknowledgment lost, and replaying the old id
    /// would make the backend dedup away the superseding payload.
    pub fn enqueue(
        &self,
        mutation: Mutation,
        priority: u8,
        now: Timestamp,
    ) -> Result<QueueItem, StoreError> {
        if mutation.kind().coalesces() {
            let existing = self.all()?.into_iter().find(|item| {
                item.status == ItemStatus::Pending
                    && item.mutation.kind() == mutation.kind()
                    && item.mutation.plan_id() == mutation.plan_id()
            });
            if let Some(mut item) = existing {
                item.mutation = mutation;
                item.operation_id = OperationId::random();
                item.priority = priority;
                item.created_at = now;
                item.last_error = None;
                self.put(&item)?;
                return Ok(item);
            }
        }

        let item = QueueItem {
            id: ItemId::random(),
            mutation,
            operation_id: OperationId::random(),
            priority,
            created_at: now,
            attempts: 0,
            last_attempt_at: None,
            status: ItemStatus::Pending,
            last_error: None,
        };
        self.put(&item)?;
        Ok(item)
    }

    /// All pending items, `(priority asc, created_at asc)`, id as final
    /// tiebreak for determinism.
    pub fn pending_sorted(&self) -> Result<Vec<QueueItem>, StoreError> {
        let mut items: Vec<QueueItem> = self
            .all()?
            .into_iter()
            .filter(|item| item.status == ItemStatus::Pending)
            .collect();
        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(items)
    }

    pub fn mark_processing(&self, id: ItemId, now: Timestamp) -> Result<(), StoreError> {
        self.transition(id, |item| {
            item.status = ItemStatus::Processing;
            item.last_attempt_at = Some(now);
        })
    }

    pub fn mark_done(&self, id: ItemId) -> Result<(), StoreError> {
        self.transition(id, |item| {
            item.status = ItemStatus::Done;
            item.last_error = None;
        })
    }

    /// Record a failed attempt: bump `attempts`, park as `failed` at the
    /// ceiling, otherwise return to `pending`. Returns the resulting status.
    pub fn record_failure(
        &self,
        id: ItemId,
        error: &str,
        now: Timestamp,
    ) -> Result<ItemStatus, StoreError> {
        let mut status = ItemStatus::Pending;
        self.transition(id, |item| {
            item.attempts += 1;
            item.last_attempt_at = Some(now);
            item.last_error = Some(error.to_string());
            item.status = if item.attempts >= self.max_attempts {
                ItemStatus::Failed
            } else {
                ItemStatus::Pending
            };
            status = item.status;
        })?;
        Ok(status)
    }

    /// Crash recovery: return every `processing` item to `pending`.
    ///
    /// The drain is single-flight, so a `processing` item seen at the start
    /// of a pass can only be a leftover from a process that died mid-item.
    /// Resubmitting is safe: a write that landed before the crash is caught
    /// by the ledger or the backend's operation dedup. Returns how many were
    /// requeued.
    pub fn requeue_processing(&self) -> Result<usize, StoreError> {
        let mut requeued = 0;
        for mut item in self.all()? {
            if item.status == ItemStatus::Processing {
                item.status = ItemStatus::Pending;
                self.put(&item)?;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Manual recovery: every failed item back to pending with a fresh
    /// attempt budget and no stale error. Returns how many were reset.
    pub fn retry_failed(&self) -> Result<usize, StoreError> {
        let mut reset = 0;
        for mut item in self.all()? {
            if item.status == ItemStatus::Failed {
                item.status = ItemStatus::Pending;
                item.attempts = 0;
                item.last_error = None;
                self.put(&item)?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// After an immediate full re-sync of a plan, its pending items are
    /// redundant: the remote already holds newer state. Returns how many were
    /// marked done.
    pub fn complete_pending_for_plan(&self, plan_id: &PlanId) -> Result<usize, StoreError> {
        let mut completed = 0;
        for mut item in self.all()? {
            if item.status == ItemStatus::Pending && item.mutation.plan_id() == plan_id {
                item.status = ItemStatus::Done;
                item.last_error = None;
                self.put(&item)?;
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Delete confirmed items so the keyspace tracks the backlog, not the
    /// full history. Done items carry no information the ledger does not.
    /// Returns how many were removed.
    pub fn prune_done(&self) -> Result<usize, StoreError> {
        let mut pruned = 0;
        for item in self.all()? {
            if item.status == ItemStatus::Done {
                self.kv.remove(&Self::key(item.id))?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    pub fn counts(&self) -> Result<ItemCounts, StoreError> {
        let mut counts = ItemCounts::default();
        for item in self.all()? {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Done => counts.done += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Most recent `last_error` across the queue, if any.
    pub fn last_error(&self) -> Result<Option<String>, StoreError> {
        let mut latest: Option<(Timestamp, String)> = None;
        for item in self.all()? {
            if let (Some(at), Some(err)) = (item.last_attempt_at, item.last_error) {
                if latest.as_ref().map_or(true, |(prev, _)| at > *prev) {
                    latest = Some((at, err));
                }
            }
        }
        Ok(latest.map(|(_, err)| err))
    }

    fn transition(
        &self,
        id: ItemId,
        apply: impl FnOnce(&mut QueueItem),
    ) -> Result<(), StoreError> {
        if let Some(mut item) = self.get(id)? {
            apply(&mut item);
            self.put(&item)?;
        }
        Ok(())
    }

    /// Serialized payload view, for callers that log or export queue contents.
    pub fn payload_json(item: &QueueItem) -> Value {
        serde_json::to_value(&item.mutation).unwrap_or(Value::Null)
    }
}
