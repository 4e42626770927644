//! Domain layer: identities, time, progress logs, plan lifecycle, merge.
//!
//! Everything in this module is pure data plus pure functions. Persistence
//! lives in `crate::store`; side effects live in `crate::sync`.

pub mod error;
pub mod identity;
pub mod merge;
pub mod plan;
pub mod progress;
pub mod time;

pub use error::{CoreError, InvalidId, InvalidTransition, RangeError};
pub use identity::{ChapterKey, OperationId, PlanId, UserId};
pub use merge::{merge_entry, merge_progress, ConflictRecord, MergeOutcome};
pub use plan::{plan_definition_hash, PlanMetadata, PlanStatus};
pub use progress::{ActionKind, ChapterAction, ChapterProgress, DayKey, ProgressEntry};
pub use time::{Clock, SystemClock, Timestamp};
