//! Cache store trait and backends.
//!
//! This module defines the `CacheStore` trait that abstracts over the
//! storage holding cached payloads and their metadata. Both backends give
//! per-key atomicity; neither holds a keyspace-wide lock across a scan.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::types::{CacheEntry, DataType, EntryMetadata, KeyFilter, ScannedEntry};

/// Trait for cache storage backends.
///
/// Expiry is checked on every read through [`crate::policy::is_expired`], so
/// a logically expired entry is never returned even before a sweep removes it.
pub trait CacheStore: Send + Sync {
    /// Short backend identifier for logging.
    fn backend_name(&self) -> &'static str;

    /// Insert or overwrite an entry.
    ///
    /// Overwriting discards the previous entry entirely: timestamps and the
    /// access count reflect only this write.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidTtl` if `ttl` is shorter than one millisecond.
    fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        data_type: Option<DataType>,
        location_id: Option<&str>,
        ttl: Duration,
    ) -> StoreResult<EntryMetadata>;

    /// Get a live entry of any data type, incrementing its access count.
    ///
    /// Absent, expired and malformed entries all read as `None`.
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        self.get_as(key, None)
    }

    /// Like [`CacheStore::get`], but when `data_type` is given a live entry
    /// stored under another data type also reads as `None`. Such an entry
    /// counts as a miss and keeps its access count.
    fn get_as(&self, key: &str, data_type: Option<DataType>) -> StoreResult<Option<CacheEntry>>;

    /// Delete one key. Returns the number of entries removed (0 or 1).
    fn delete(&self, key: &str) -> StoreResult<usize>;

    /// Delete every entry matching `filter`.
    fn delete_matching(&self, filter: &KeyFilter) -> StoreResult<usize>;

    /// Delete `key` only if it is still expired at `now`.
    ///
    /// Sweeps use this so a write racing with the sweep is never lost.
    fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Delete `key` only if it still fails to decode.
    ///
    /// A valid write that replaced the row since it was scanned survives.
    fn delete_malformed(&self, key: &str) -> StoreResult<bool>;

    /// Metadata for every entry matching `filter`.
    fn scan(&self, filter: &KeyFilter) -> StoreResult<Vec<ScannedEntry>>;

    /// Lower the expiry of `key` to `cap` if it currently expires later.
    fn cap_expiry(&self, key: &str, cap: DateTime<Utc>) -> StoreResult<bool>;

    /// Best-effort hint to reclaim space.
    fn compact(&self) -> StoreResult<()>;

    /// Rolling usage counters owned by this store.
    fn usage(&self) -> &UsageCounters;
}

/// Whether an entry satisfies the data type a caller asked for.
pub(crate) fn type_matches(metadata: &EntryMetadata, requested: Option<DataType>) -> bool {
    requested.map_or(true, |t| metadata.data_type == Some(t))
}

/// Compute `now + ttl`, rejecting sub-millisecond or overflowing TTLs.
///
/// Timestamps are persisted at millisecond precision, so anything shorter
/// would store `expires_at == cached_at`.
pub(crate) fn expiry_for(now: DateTime<Utc>, ttl: Duration) -> StoreResult<DateTime<Utc>> {
    if ttl < Duration::milliseconds(1) {
        return Err(StoreError::InvalidTtl(ttl.num_milliseconds()));
    }
    now.checked_add_signed(ttl)
        .ok_or(StoreError::InvalidTtl(ttl.num_milliseconds()))
}

/// Hit/miss/write/delete counters, reset by daily maintenance.
#[derive(Debug, Default)]
pub struct UsageCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletions: AtomicU64,
}

/// Point-in-time copy of [`UsageCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletions: u64,
}

impl UsageSnapshot {
    /// Fraction of lookups that hit, 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

impl UsageCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Turn a store-level hit into a miss after the caller rejected the entry.
    pub fn reject_hit(&self) {
        let _ = self
            .hits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| h.checked_sub(1));
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletions(&self, count: usize) {
        self.deletions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter, returning the values they held.
    pub fn reset(&self) -> UsageSnapshot {
        UsageSnapshot {
            hits: self.hits.swap(0, Ordering::Relaxed),
            misses: self.misses.swap(0, Ordering::Relaxed),
            writes: self.writes.swap(0, Ordering::Relaxed),
            deletions: self.deletions.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_expiry_for_rejects_non_positive() {
        let now = Utc::now();
        assert_eq!(
            expiry_for(now, Duration::zero()),
            Err(StoreError::InvalidTtl(0))
        );
        assert!(expiry_for(now, Duration::seconds(-5)).is_err());
        assert_eq!(
            expiry_for(now, Duration::microseconds(500)),
            Err(StoreError::InvalidTtl(0))
        );
        assert!(expiry_for(now, Duration::milliseconds(1)).is_ok());
        assert_eq!(
            expiry_for(now, Duration::seconds(10)).unwrap(),
            now + Duration::seconds(10)
        );
    }

    #[test]
    fn test_usage_reset_returns_previous() {
        let usage = UsageCounters::default();
        usage.record_hit();
        usage.record_hit();
        usage.record_miss();
        usage.record_deletions(3);

        let before = usage.reset();
        assert_eq!(before.hits, 2);
        assert_eq!(before.deletions, 3);
        assert!((before.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(usage.snapshot(), UsageSnapshot::default());
    }

    #[test]
    fn test_reject_hit_moves_count_to_misses() {
        let usage = UsageCounters::default();
        usage.record_hit();
        usage.reject_hit();
        let snapshot = usage.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 1);

        // Never underflows after a reset
        usage.reset();
        usage.reject_hit();
        assert_eq!(usage.snapshot().hits, 0);
    }

    #[test]
    fn test_hit_rate_without_lookups() {
        assert_eq!(UsageSnapshot::default().hit_rate(), 0.0);
    }
}
