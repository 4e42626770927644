#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod test_harness;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    ActionKind, ChapterAction, ChapterKey, ChapterProgress, Clock, ConflictRecord, DayKey,
    MergeOutcome, OperationId, PlanId, PlanMetadata, PlanStatus, ProgressEntry, SystemClock,
    Timestamp, UserId,
};
pub use crate::store::{ItemId, ItemStatus, QueueItem, SyncQueue};
pub use crate::sync::{
    Mutation, MutationKind, NetworkAdapter, QueueStats, SyncOrchestrator, SyncOutcome,
};
