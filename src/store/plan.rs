//! Typed store for plan metadata.
//!
//! Keys: `plan/{plan_id}`. The status index is a scan-side filter; plan
//! counts per user are small enough that a dedicated index key would be
//! ceremony.

use std::sync::Arc;

use crate::core::{ConflictRecord, CoreError, PlanId, PlanMetadata, PlanStatus, Timestamp};
use crate::error::Error;

use super::kv::{decode, encode, KvStore, StoreError};

const PREFIX: &str = "plan/";

#[derive(Clone)]
pub struct PlanStore {
    kv: Arc<dyn KvStore>,
}

impl PlanStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(plan_id: &PlanId) -> String {
        format!("{PREFIX}{}", plan_id)
    }

    pub fn get(&self, plan_id: &PlanId) -> Result<Option<PlanMetadata>, StoreError> {
        let key = Self::key(plan_id);
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn upsert(&self, metadata: &PlanMetadata) -> Result<(), StoreError> {
        self.kv.put(&Self::key(&metadata.plan_id), encode(metadata)?)
    }

    pub fn by_status(&self, status: PlanStatus) -> Result<Vec<PlanMetadata>, StoreError> {
        let rows = self.kv.scan_prefix(PREFIX)?;
        let mut plans = Vec::new();
        for (key, bytes) in rows {
            let metadata: PlanMetadata = decode(&key, &bytes)?;
            if metadata.status == status {
                plans.push(metadata);
            }
        }
        Ok(plans)
    }

    /// Transition-checked status change. Stamps `archived_at` when entering
    /// `archived`. Unknown plan is a `CoreError` at the seam above, so this
    /// requires the row to exist.
    pub fn set_status(
        &self,
        plan_id: &PlanId,
        status: PlanStatus,
        now: Timestamp,
    ) -> Result<PlanMetadata, Error> {
        let mut metadata = self.get(plan_id)?.ok_or_else(|| {
            Error::Core(CoreError::InvalidId(
                crate::core::InvalidId::Plan {
                    raw: plan_id.to_string(),
                    reason: "unknown plan".into(),
                },
            ))
        })?;
        metadata.status.check_transition(status)?;
        if status == PlanStatus::Archived && metadata.archived_at.is_none() {
            metadata.archived_at = Some(now);
        }
        metadata.status = status;
        self.upsert(&metadata)?;
        Ok(metadata)
    }

    /// Monotone "last synced at" watermark.
    pub fn touch_last_synced(&self, plan_id: &PlanId, at: Timestamp) -> Result<(), StoreError> {
        if let Some(mut metadata) = self.get(plan_id)? {
            if metadata.last_synced_at.map_or(true, |prev| at > prev) {
                metadata.last_synced_at = Some(at);
                self.upsert(&metadata)?;
            }
        }
        Ok(())
    }

    /// Record completion conflicts observed while merging remote rows.
    pub fn record_conflicts(
        &self,
        plan_id: &PlanId,
        conflicts: &[ConflictRecord],
    ) -> Result<(), StoreError> {
        if conflicts.is_empty() {
            return Ok(());
        }
        if let Some(mut metadata) = self.get(plan_id)? {
            for conflict in conflicts {
                if !metadata.sync_conflicts.contains(conflict) {
                    metadata.sync_conflicts.push(conflict.clone());
                }
            }
            self.upsert(&metadata)?;
        }
        Ok(())
    }
}
