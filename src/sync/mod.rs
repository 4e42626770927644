//! Sync orchestration: the drain state machine, its remote seam, timers, and
//! observable queue statistics.

pub mod adapter;
pub mod backoff;
pub mod orchestrator;
pub mod scheduler;
pub mod stats;

pub use adapter::{
    AdapterError, Connectivity, NetworkAdapter, RemotePlanRow, RemoteProgressRow,
};
pub use backoff::{jittered_delay, retry_delay, BACKOFF_CAP_MS, JITTER_MS};
pub use orchestrator::{DrainOutcome, SyncOrchestrator, SyncOutcome};
pub use scheduler::{SyncScheduler, TimerKind};
pub use stats::{QueueStats, StatsBroadcaster, StatsSubscription};

pub use crate::store::{Mutation, MutationKind};
