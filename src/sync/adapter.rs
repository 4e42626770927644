//! Remote seam.
//!
//! Two idempotent remote procedures, upsert-keyed by natural identity
//! ((user, plan, day) for progress, (user, plan) for metadata). The backend
//! additionally records `(operation_id, user_id)` exactly once before
//! applying, so a duplicate delivery is a guaranteed no-op even if the local
//! ledger check were bypassed. Calls are a "set", not a "merge": the client
//! merges before calling.

use serde_json::Value;
use thiserror::Error;

use crate::core::{
    ConflictRecord, OperationId, PlanId, PlanStatus, ProgressEntry, Timestamp, UserId,
};
use crate::error::{Effect, Transience};

/// Authoritative progress row returned by the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteProgressRow {
    pub user_id: UserId,
    pub entry: ProgressEntry,
    pub updated_at: Timestamp,
}

/// Authoritative plan metadata row returned by the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RemotePlanRow {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub plan_definition_hash: String,
    pub plan_version: u32,
    pub activated_at: Timestamp,
    pub archived_at: Option<Timestamp>,
    pub last_synced_at: Option<Timestamp>,
    pub sync_conflicts: Vec<ConflictRecord>,
    pub catch_up_adjustment: Option<Value>,
    pub updated_at: Timestamp,
}

/// Errors crossing the network seam.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// Request never reached the backend (DNS, socket, timeout).
    #[error("network failure: {reason}")]
    Network { reason: String },

    /// Backend answered with a non-success status.
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    /// We could not build a valid request from the payload.
    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },
}

impl AdapterError {
    pub fn transience(&self) -> Transience {
        match self {
            AdapterError::Network { .. } => Transience::Retryable,
            AdapterError::Remote { status, .. } if *status >= 500 => Transience::Retryable,
            AdapterError::Remote { .. } => Transience::Unknown,
            AdapterError::InvalidPayload { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // The request may or may not have landed before the failure.
            AdapterError::Network { .. } => Effect::Unknown,
            AdapterError::Remote { .. } => Effect::Unknown,
            AdapterError::InvalidPayload { .. } => Effect::None,
        }
    }
}

/// The two remote procedures. Implementations must be idempotent on both the
/// natural key and the operation id.
pub trait NetworkAdapter: Send + Sync {
    fn upsert_reading_progress(
        &self,
        operation_id: OperationId,
        user_id: &UserId,
        entry: &ProgressEntry,
    ) -> Result<RemoteProgressRow, AdapterError>;

    fn upsert_plan_metadata(
        &self,
        operation_id: OperationId,
        user_id: &UserId,
        metadata: &crate::core::PlanMetadata,
    ) -> Result<RemotePlanRow, AdapterError>;
}

/// Network reachability and session state, owned by the host app.
///
/// When either is missing a drain is skipped silently - that is not an error.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
    fn session(&self) -> Option<UserId>;
}
