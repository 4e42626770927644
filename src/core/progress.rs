//! Per-day reading progress as an append-only log of chapter actions.
//!
//! The action log is the ground truth. `completed`/`completed_at` are derived
//! caches recomputed from the full set of chapter logs, never edited directly
//! except by `force_complete` (day-level "mark complete").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identity::{ChapterKey, PlanId};
use super::time::Timestamp;

/// What a single chapter action did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Checked,
    Unchecked,
}

/// One checked/unchecked event. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterAction {
    pub kind: ActionKind,
    pub at: Timestamp,
}

impl ChapterAction {
    pub fn new(kind: ActionKind, at: Timestamp) -> Self {
        Self { kind, at }
    }
}

/// Append-only, timestamp-ordered action log for one chapter of one day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterProgress {
    #[serde(flatten)]
    pub key: ChapterKey,
    pub actions: Vec<ChapterAction>,
}

impl ChapterProgress {
    pub fn empty(key: ChapterKey) -> Self {
        Self {
            key,
            actions: Vec::new(),
        }
    }

    /// Append one action, keeping the log time-sorted.
    ///
    /// Appends are stable: an action with the same timestamp as the current
    /// tail lands after it, preserving local arrival order.
    pub fn append(&mut self, action: ChapterAction) {
        let pos = self
            .actions
            .iter()
            .rposition(|a| a.at <= action.at)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.actions.insert(pos, action);
    }

    pub fn latest(&self) -> Option<&ChapterAction> {
        self.actions.last()
    }

    /// Current chapter state: latest action wins.
    pub fn is_checked(&self) -> bool {
        matches!(self.latest(), Some(a) if a.kind == ActionKind::Checked)
    }
}

/// Key of a progress entry: (plan, day), globally unique.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub plan_id: PlanId,
    pub day_number: u32,
}

impl DayKey {
    pub fn new(plan_id: PlanId, day_number: u32) -> Self {
        Self {
            plan_id,
            day_number,
        }
    }
}

/// Reading progress for one day of one plan.
///
/// Created lazily on first chapter interaction; never deleted, only
/// appended-to. `completed` is true iff every chapter log is non-empty and
/// its latest action is `checked`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub plan_id: PlanId,
    pub day_number: u32,
    pub completed: bool,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_reading_at: Option<Timestamp>,
    pub chapters_read: Vec<ChapterProgress>,
    /// Opaque catch-up payload owned by plan generation; round-tripped only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch_up_adjustment: Option<Value>,
}

impl ProgressEntry {
    /// Fresh entry with empty per-chapter logs for the supplied chapter list.
    pub fn new(plan_id: PlanId, day_number: u32, chapters: &[ChapterKey], now: Timestamp) -> Self {
        Self {
            plan_id,
            day_number,
            completed: false,
            created_at: now,
            completed_at: None,
            started_reading_at: None,
            chapters_read: chapters
                .iter()
                .cloned()
                .map(ChapterProgress::empty)
                .collect(),
            catch_up_adjustment: None,
        }
    }

    pub fn key(&self) -> DayKey {
        DayKey::new(self.plan_id.clone(), self.day_number)
    }

    pub fn chapter(&self, key: &ChapterKey) -> Option<&ChapterProgress> {
        self.chapters_read.iter().find(|c| &c.key == key)
    }

    fn chapter_mut(&mut self, key: &ChapterKey) -> &mut ChapterProgress {
        if let Some(pos) = self.chapters_read.iter().position(|c| &c.key == key) {
            &mut self.chapters_read[pos]
        } else {
            // First touch of a chapter not in the original list.
            self.chapters_read.push(ChapterProgress::empty(key.clone()));
            self.chapters_read
                .last_mut()
                .unwrap_or_else(|| unreachable!("just pushed"))
        }
    }

    /// Append one action to the named chapter's log and recompute completion.
    pub fn append_action(&mut self, target: &ChapterKey, kind: ActionKind, now: Timestamp) {
        if self.started_reading_at.is_none() {
            self.started_reading_at = Some(now);
        }
        self.chapter_mut(target)
            .append(ChapterAction::new(kind, now));
        self.recompute_completion(now);
    }

    /// Day-level "mark complete": append a synthetic checked action to every
    /// chapter and force the completion flag.
    pub fn force_complete(&mut self, now: Timestamp) {
        if self.started_reading_at.is_none() {
            self.started_reading_at = Some(now);
        }
        for chapter in &mut self.chapters_read {
            chapter.append(ChapterAction::new(ActionKind::Checked, now));
        }
        self.completed = true;
        self.completed_at = Some(now);
    }

    /// Recompute `completed`/`completed_at` from the full chapter set.
    ///
    /// Invariant maintained: completed implies completed_at set; not
    /// completed implies completed_at absent.
    pub fn recompute_completion(&mut self, now: Timestamp) {
        let all_checked =
            !self.chapters_read.is_empty() && self.chapters_read.iter().all(|c| c.is_checked());
        if all_checked {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
            self.completed = true;
        } else {
            self.completed = false;
            self.completed_at = None;
        }
    }
}
