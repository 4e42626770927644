//! Typed store for per-day reading progress.
//!
//! Keys: `progress/{plan_id}/{day:010}` - padding to full `u32` width keeps
//! prefix scans per plan in day order, which doubles as the plan-scoped
//! secondary index.

use std::sync::Arc;

use crate::core::{
    merge_entry, ActionKind, ChapterKey, ConflictRecord, PlanId, ProgressEntry, Timestamp,
};

use super::kv::{decode, encode, KvStore, StoreError};

const PREFIX: &str = "progress/";

/// Authoritative local store of progress entries.
///
/// All mutations are local and immediate; queueing a remote sync is the
/// caller's responsibility.
#[derive(Clone)]
pub struct ProgressStore {
    kv: Arc<dyn KvStore>,
}

impl ProgressStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(plan_id: &PlanId, day_number: u32) -> String {
        format!("{PREFIX}{}/{:010}", plan_id, day_number)
    }

    pub fn get(
        &self,
        plan_id: &PlanId,
        day_number: u32,
    ) -> Result<Option<ProgressEntry>, StoreError> {
        let key = Self::key(plan_id, day_number);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// All entries for one plan, day-ordered.
    pub fn entries_for_plan(&self, plan_id: &PlanId) -> Result<Vec<ProgressEntry>, StoreError> {
        let prefix = format!("{PREFIX}{}/", plan_id);
        self.kv
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, bytes)| decode(&key, &bytes))
            .collect()
    }

    /// Idempotent: returns the existing entry or creates one with empty
    /// per-chapter logs for the supplied chapter list.
    pub fn ensure_day_progress(
        &self,
        plan_id: &PlanId,
        day_number: u32,
        chapters: &[ChapterKey],
        now: Timestamp,
    ) -> Result<ProgressEntry, StoreError> {
        if let Some(existing) = self.get(plan_id, day_number)? {
            return Ok(existing);
        }
        let entry = ProgressEntry::new(plan_id.clone(), day_number, chapters, now);
        self.put(&entry)?;
        Ok(entry)
    }

    /// Append one action to the named chapter's log (creating the day entry
    /// and the chapter log on first touch) and recompute completion.
    pub fn set_chapter_action(
        &self,
        plan_id: &PlanId,
        day_number: u32,
        chapters: &[ChapterKey],
        target: &ChapterKey,
        kind: ActionKind,
        now: Timestamp,
    ) -> Result<ProgressEntry, StoreError> {
        let mut entry = self.ensure_day_progress(plan_id, day_number, chapters, now)?;
        entry.append_action(target, kind, now);
        self.put(&entry)?;
        Ok(entry)
    }

    /// Append a synthetic checked action to every chapter of the day and
    /// force-set completion.
    pub fn mark_day_complete(
        &self,
        plan_id: &PlanId,
        day_number: u32,
        chapters: &[ChapterKey],
        now: Timestamp,
    ) -> Result<ProgressEntry, StoreError> {
        let mut entry = self.ensure_day_progress(plan_id, day_number, chapters, now)?;
        entry.force_complete(now);
        self.put(&entry)?;
        Ok(entry)
    }

    /// Attach an opaque catch-up payload to a day entry.
    pub fn set_catch_up_adjustment(
        &self,
        plan_id: &PlanId,
        day_number: u32,
        adjustment: serde_json::Value,
        now: Timestamp,
    ) -> Result<ProgressEntry, StoreError> {
        let mut entry = self.ensure_day_progress(plan_id, day_number, &[], now)?;
        entry.catch_up_adjustment = Some(adjustment);
        self.put(&entry)?;
        Ok(entry)
    }

    /// Merge an authoritative remote entry into the local row, never losing
    /// locally appended actions. Returns the stored entry and any completion
    /// conflict observed.
    pub fn merge_remote(
        &self,
        remote: &ProgressEntry,
    ) -> Result<(ProgressEntry, Option<ConflictRecord>), StoreError> {
        match self.get(&remote.plan_id, remote.day_number)? {
            Some(local) => {
                let (merged, conflict) = merge_entry(&local, remote);
                self.put(&merged)?;
                Ok((merged, conflict))
            }
            None => {
                self.put(remote)?;
                Ok((remote.clone(), None))
            }
        }
    }

    fn put(&self, entry: &ProgressEntry) -> Result<(), StoreError> {
        let key = Self::key(&entry.plan_id, entry.day_number);
        self.kv.put(&key, encode(entry)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKv;

    fn store() -> ProgressStore {
        ProgressStore::new(Arc::new(MemoryKv::new()))
    }

    fn plan() -> PlanId {
        PlanId::new("p1").unwrap()
    }

    fn chapters() -> Vec<ChapterKey> {
        vec![
            ChapterKey::new("Genesis", 1).unwrap(),
            ChapterKey::new("Genesis", 2).unwrap(),
        ]
    }

    #[test]
    fn ensure_is_idempotent() {
        let store = store();
        let first = store
            .ensure_day_progress(&plan(), 1, &chapters(), Timestamp(10))
            .unwrap();
        let second = store
            .ensure_day_progress(&plan(), 1, &[], Timestamp(99))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.created_at, Timestamp(10));
    }

    #[test]
    fn set_chapter_action_persists_and_derives_completion() {
        let store = store();
        let chs = chapters();
        store
            .set_chapter_action(&plan(), 1, &chs, &chs[0], ActionKind::Checked, Timestamp(100))
            .unwrap();
        let entry = store
            .set_chapter_action(&plan(), 1, &chs, &chs[1], ActionKind::Checked, Timestamp(200))
            .unwrap();
        assert!(entry.completed);

        let reloaded = store.get(&plan(), 1).unwrap().unwrap();
        assert_eq!(reloaded, entry);
    }

    #[test]
    fn entries_for_plan_scans_in_day_order() {
        let store = store();
        let chs = chapters();
        // 99_999 vs 100_000 would invert under narrower zero-padding.
        for day in [3u32, 1, 100_000, 2, 11, 99_999] {
            store
                .ensure_day_progress(&plan(), day, &chs, Timestamp(day as u64))
                .unwrap();
        }
        let days: Vec<u32> = store
            .entries_for_plan(&plan())
            .unwrap()
            .iter()
            .map(|e| e.day_number)
            .collect();
        assert_eq!(days, vec![1, 2, 3, 11, 99_999, 100_000]);
    }

    #[test]
    fn merge_remote_keeps_local_actions() {
        let store = store();
        let chs = chapters();
        store
            .set_chapter_action(&plan(), 2, &chs, &chs[0], ActionKind::Checked, Timestamp(100))
            .unwrap();

        let mut remote = ProgressEntry::new(plan(), 2, &chs, Timestamp(50));
        remote.append_action(&chs[1], ActionKind::Checked, Timestamp(200));

        let (merged, conflict) = store.merge_remote(&remote).unwrap();
        assert!(conflict.is_none());
        assert!(merged.chapter(&chs[0]).unwrap().is_checked());
        assert!(merged.chapter(&chs[1]).unwrap().is_checked());
        assert_eq!(store.get(&plan(), 2).unwrap().unwrap(), merged);
    }
}
