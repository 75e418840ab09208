//! Tiered cleanup of the cache key space.

mod scheduler;
mod sweeper;

pub use scheduler::{
    until_next_daily, CleanupScheduler, RunOutcome, SchedulerConfig, DEFAULT_DEEP_INTERVAL_SECS,
    DEFAULT_RUN_TIMEOUT_SECS, DEFAULT_SHALLOW_INTERVAL_SECS,
};
pub use sweeper::Sweeper;
