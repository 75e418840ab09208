//! Weather data cache for Skycast
//!
//! Keyed storage of upstream weather payloads with per-type expiry, a
//! retrieval façade that degrades every failure to a miss, and tiered
//! background cleanup.

pub mod cleanup;
pub mod clock;
pub mod error;
pub mod events;
pub mod policy;
pub mod service;
pub mod store;
pub mod types;

pub use cleanup::{CleanupScheduler, RunOutcome, SchedulerConfig, Sweeper};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use events::{
    CacheCensus, CacheEvent, ChannelSink, DeepSweepReport, EventSink, MaintenanceReport,
    MultiSink, NullSink, ShallowSweepReport, SweepTier, TracingSink,
};
pub use policy::{default_ttl, is_expired, CachePolicy, KeyClass, LongLivedClass};
pub use service::{CacheResult, CacheStats, WeatherCache};
pub use store::{CacheStore, MemoryStore, SqliteStore, UsageCounters, UsageSnapshot};
pub use types::{CacheEntry, CacheKey, DataType, EntryMetadata, KeyFilter, ScannedEntry};
