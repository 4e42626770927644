//! Local persistence over a generic durable key-value seam.
//!
//! The actual storage engine is an external collaborator; everything here is
//! a typed wrapper that owns one keyspace prefix and its merge/transition
//! semantics. The orchestrator is the only component that transitions queue
//! item status.

pub mod kv;
pub mod ledger;
pub mod plan;
pub mod progress;
pub mod queue;

pub use kv::{KvStore, MemoryKv, StoreError};
pub use ledger::IdempotencyLedger;
pub use plan::PlanStore;
pub use progress::ProgressStore;
pub use queue::{
    ItemCounts, ItemId, ItemStatus, Mutation, MutationKind, QueueItem, SyncQueue, MAX_ATTEMPTS,
};
