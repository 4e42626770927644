//! Plan lifecycle metadata and divergence detection.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::{CoreError, InvalidTransition};
use super::identity::PlanId;
use super::merge::ConflictRecord;
use super::time::Timestamp;

/// Plan lifecycle state. `archived` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Completed,
    Archived,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Completed => "completed",
            PlanStatus::Archived => "archived",
        }
    }

    /// Legal transitions: active -> completed, active -> archived,
    /// completed -> archived. Self-transitions are no-ops and allowed.
    pub fn can_transition_to(self, to: PlanStatus) -> bool {
        use PlanStatus::*;
        match (self, to) {
            (a, b) if a == b => true,
            (Active, Completed) | (Active, Archived) | (Completed, Archived) => true,
            _ => false,
        }
    }

    pub fn check_transition(self, to: PlanStatus) -> Result<(), CoreError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            }
            .into())
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-plan lifecycle record. Identity = plan id (unique per user).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub plan_definition_hash: String,
    pub plan_version: u32,
    pub activated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_conflicts: Vec<ConflictRecord>,
    /// Opaque catch-up payload owned by plan generation; round-tripped only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch_up_adjustment: Option<Value>,
}

impl PlanMetadata {
    pub fn new(
        plan_id: PlanId,
        plan_definition_hash: String,
        plan_version: u32,
        activated_at: Timestamp,
    ) -> Self {
        Self {
            plan_id,
            status: PlanStatus::Active,
            plan_definition_hash,
            plan_version,
            activated_at,
            archived_at: None,
            last_synced_at: None,
            sync_conflicts: Vec::new(),
            catch_up_adjustment: None,
        }
    }
}

/// Hash of a plan definition, used to detect divergence between devices that
/// activated nominally identical plans.
///
/// Hex of SHA-256 over canonical (sorted-key) JSON bytes, so two devices that
/// serialized the same definition in different field orders still agree.
pub fn plan_definition_hash(definition: &Value) -> String {
    let canonical = canonicalize(definition);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        use fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json::Map preserves insertion order; rebuild sorted.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
