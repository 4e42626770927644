//! Two-sided progress merge.
//!
//! Reconciles a local and a remote log of per-day progress into one. Chapter
//! action lists are unioned and time-sorted - no action is ever discarded.
//! Completion is a derived convenience field: when the two sides disagree on
//! `completed_at`, the greater timestamp wins (absent treated as 0) and the
//! disagreement is surfaced as a `ConflictRecord` without blocking the merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identity::{ChapterKey, PlanId};
use super::progress::{ChapterAction, ChapterProgress, DayKey, ProgressEntry};
use super::time::Timestamp;

/// A completion disagreement observed during merge. Observability only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub plan_id: PlanId,
    pub day_number: u32,
    pub local_completed_at: Option<Timestamp>,
    pub incoming_completed_at: Option<Timestamp>,
}

/// Result of merging two progress logs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutcome {
    pub entries: Vec<ProgressEntry>,
    pub conflicts: Vec<ConflictRecord>,
}

/// Merge two progress logs, grouping entries by (plan, day).
///
/// Entries present on only one side are kept unmodified. Entries present on
/// both are merged with `merge_entry`. Output is ordered by (plan, day).
pub fn merge_progress(local: &[ProgressEntry], cloud: &[ProgressEntry]) -> MergeOutcome {
    let mut by_key: BTreeMap<DayKey, (Option<&ProgressEntry>, Option<&ProgressEntry>)> =
        BTreeMap::new();
    for entry in local {
        by_key.entry(entry.key()).or_default().0 = Some(entry);
    }
    for entry in cloud {
        by_key.entry(entry.key()).or_default().1 = Some(entry);
    }

    let mut outcome = MergeOutcome::default();
    for (_, sides) in by_key {
        match sides {
            (Some(l), Some(c)) => {
                let (merged, conflict) = merge_entry(l, c);
                outcome.entries.push(merged);
                if let Some(conflict) = conflict {
                    outcome.conflicts.push(conflict);
                }
            }
            (Some(only), None) | (None, Some(only)) => outcome.entries.push(only.clone()),
            (None, None) => {}
        }
    }
    outcome
}

/// Merge one day present on both sides.
///
/// Returns the merged entry and a conflict record when the two sides disagreed
/// on `completed_at`.
pub fn merge_entry(
    local: &ProgressEntry,
    cloud: &ProgressEntry,
) -> (ProgressEntry, Option<ConflictRecord>) {
    debug_assert_eq!(local.key(), cloud.key(), "merge_entry requires same day");

    let mut merged = local.clone();
    merged.created_at = local.created_at.min(cloud.created_at);
    merged.started_reading_at = min_opt(local.started_reading_at, cloud.started_reading_at);
    merged.chapters_read = merge_chapters(&local.chapters_read, &cloud.chapters_read);

    // Carry a catch-up payload from whichever side has one; prefer local.
    if merged.catch_up_adjustment.is_none() {
        merged.catch_up_adjustment = cloud.catch_up_adjustment.clone();
    }

    let conflict = if local.completed_at == cloud.completed_at {
        merged.completed = local.completed;
        merged.completed_at = local.completed_at;
        None
    } else {
        // Greater completed_at wins, absent treated as 0.
        let local_ms = local.completed_at.unwrap_or(Timestamp::ZERO);
        let cloud_ms = cloud.completed_at.unwrap_or(Timestamp::ZERO);
        let winner = if local_ms >= cloud_ms { local } else { cloud };
        merged.completed = winner.completed;
        merged.completed_at = winner.completed_at;
        Some(ConflictRecord {
            plan_id: local.plan_id.clone(),
            day_number: local.day_number,
            local_completed_at: local.completed_at,
            incoming_completed_at: cloud.completed_at,
        })
    };

    (merged, conflict)
}

/// Union chapter logs by chapter key; each merged log is the deduplicated,
/// time-sorted concatenation of both sides' actions for that chapter.
pub fn merge_chapters(local: &[ChapterProgress], cloud: &[ChapterProgress]) -> Vec<ChapterProgress> {
    let mut by_key: BTreeMap<ChapterKey, Vec<ChapterAction>> = BTreeMap::new();
    for chapter in local.iter().chain(cloud) {
        by_key
            .entry(chapter.key.clone())
            .or_default()
            .extend(chapter.actions.iter().cloned());
    }

    by_key
        .into_iter()
        .map(|(key, mut actions)| {
            actions.sort_by_key(|a| a.at);
            actions.dedup();
            ChapterProgress { key, actions }
        })
        .collect()
}

fn min_opt(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
