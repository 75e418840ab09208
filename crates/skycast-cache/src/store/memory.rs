//! In-memory cache store.
//!
//! Uses `DashMap` so every operation locks a single shard; scans walk the
//! shards one at a time and never block writers on other shards.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::{expiry_for, type_matches, CacheStore, UsageCounters};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::policy::is_expired;
use crate::types::{CacheEntry, DataType, EntryMetadata, KeyFilter, ScannedEntry};

pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    usage: UsageCounters,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            usage: UsageCounters::default(),
        }
    }

    /// Number of physically present entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        data_type: Option<DataType>,
        location_id: Option<&str>,
        ttl: Duration,
    ) -> StoreResult<EntryMetadata> {
        let now = self.clock.now();
        let expires_at = expiry_for(now, ttl)?;

        let metadata = EntryMetadata {
            key: key.to_string(),
            data_type,
            location_id: location_id.map(str::to_string),
            cached_at: now,
            expires_at,
            access_count: 0,
            payload_bytes: payload.len(),
        };

        // Replaces the whole value under the shard lock.
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                metadata: metadata.clone(),
                payload,
            },
        );
        self.usage.record_write();
        Ok(metadata)
    }

    fn get_as(&self, key: &str, data_type: Option<DataType>) -> StoreResult<Option<CacheEntry>> {
        let now = self.clock.now();

        let found = match self.entries.get_mut(key) {
            Some(mut entry) if !is_expired(entry.metadata.expires_at, now) => {
                if !type_matches(&entry.metadata, data_type) {
                    tracing::debug!(
                        key,
                        requested = ?data_type,
                        stored = ?entry.metadata.data_type,
                        "Cached entry has a different data type"
                    );
                    self.usage.record_miss();
                    return Ok(None);
                }
                entry.metadata.access_count += 1;
                Some(entry.clone())
            }
            Some(_) => None,
            None => {
                self.usage.record_miss();
                return Ok(None);
            }
        };

        match found {
            Some(entry) => {
                self.usage.record_hit();
                Ok(Some(entry))
            }
            None => {
                // Lazy removal; the shard guard above is already released.
                if self
                    .entries
                    .remove_if(key, |_, e| is_expired(e.metadata.expires_at, now))
                    .is_some()
                {
                    self.usage.record_deletions(1);
                }
                self.usage.record_miss();
                Ok(None)
            }
        }
    }

    fn delete(&self, key: &str) -> StoreResult<usize> {
        let removed = usize::from(self.entries.remove(key).is_some());
        self.usage.record_deletions(removed);
        Ok(removed)
    }

    fn delete_matching(&self, filter: &KeyFilter) -> StoreResult<usize> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let matched = filter.matches(&entry.metadata);
            if matched {
                removed += 1;
            }
            !matched
        });
        self.usage.record_deletions(removed);
        Ok(removed)
    }

    fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, e| is_expired(e.metadata.expires_at, now))
            .is_some();
        if removed {
            self.usage.record_deletions(1);
        }
        Ok(removed)
    }

    /// Entries are typed in memory, so there is never anything to delete.
    fn delete_malformed(&self, _key: &str) -> StoreResult<bool> {
        Ok(false)
    }

    fn scan(&self, filter: &KeyFilter) -> StoreResult<Vec<ScannedEntry>> {
        if let KeyFilter::Keys(keys) = filter {
            return Ok(keys
                .iter()
                .filter_map(|k| self.entries.get(k))
                .map(|e| ScannedEntry::Valid(e.metadata.clone()))
                .collect());
        }

        Ok(self
            .entries
            .iter()
            .filter(|e| filter.matches(&e.metadata))
            .map(|e| ScannedEntry::Valid(e.metadata.clone()))
            .collect())
    }

    fn cap_expiry(&self, key: &str, cap: DateTime<Utc>) -> StoreResult<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry)
                if entry.metadata.expires_at > cap && cap > entry.metadata.cached_at =>
            {
                entry.metadata.expires_at = cap;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn compact(&self) -> StoreResult<()> {
        self.entries.shrink_to_fit();
        Ok(())
    }

    fn usage(&self) -> &UsageCounters {
        &self.usage
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_put_sets_expiry_from_ttl() {
        let (clock, store) = store();
        let meta = store
            .put("current:paris", b"{}".to_vec(), Some(DataType::Current), Some("paris"), Duration::minutes(15))
            .unwrap();
        assert_eq!(meta.cached_at, clock.now());
        assert_eq!(meta.expires_at - meta.cached_at, Duration::minutes(15));
        assert_eq!(meta.access_count, 0);
    }

    #[test]
    fn test_get_increments_access_count() {
        let (_, store) = store();
        store
            .put("current:paris", b"a".to_vec(), Some(DataType::Current), None, Duration::minutes(1))
            .unwrap();
        store.get("current:paris").unwrap().unwrap();
        let entry = store.get("current:paris").unwrap().unwrap();
        assert_eq!(entry.metadata.access_count, 2);
        assert_eq!(store.usage().snapshot().hits, 2);
    }

    #[test]
    fn test_expired_entry_reads_as_absent_and_is_removed() {
        let (clock, store) = store();
        store
            .put("current:paris", b"a".to_vec(), Some(DataType::Current), None, Duration::minutes(1))
            .unwrap();
        clock.advance(Duration::minutes(1));

        assert!(store.get("current:paris").unwrap().is_none());
        assert!(store.is_empty());
        assert_eq!(store.usage().snapshot().misses, 1);
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let (clock, store) = store();
        store
            .put("forecast:oslo", b"v1".to_vec(), Some(DataType::Forecast), None, Duration::seconds(10))
            .unwrap();
        store.get("forecast:oslo").unwrap();
        store
            .put("forecast:oslo", b"v2".to_vec(), Some(DataType::Forecast), None, Duration::seconds(100))
            .unwrap();

        let scanned = store.scan(&KeyFilter::All).unwrap();
        assert_eq!(scanned.len(), 1);
        let ScannedEntry::Valid(meta) = &scanned[0] else {
            panic!("expected a valid entry");
        };
        assert_eq!(meta.expires_at, clock.now() + Duration::seconds(100));
        assert_eq!(meta.access_count, 0);
        assert_eq!(store.get("forecast:oslo").unwrap().unwrap().payload, b"v2");
    }

    #[test]
    fn test_delete_matching_by_location() {
        let (_, store) = store();
        let ttl = Duration::minutes(5);
        store.put("current:a", vec![], Some(DataType::Current), Some("loc-1"), ttl).unwrap();
        store.put("forecast:a", vec![], Some(DataType::Forecast), Some("loc-1"), ttl).unwrap();
        store.put("current:b", vec![], Some(DataType::Current), Some("loc-2"), ttl).unwrap();

        let removed = store.delete_matching(&KeyFilter::Location("loc-1".into())).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_expired_keeps_fresh_write() {
        let (clock, store) = store();
        store.put("hourly:x", vec![], Some(DataType::Hourly), None, Duration::seconds(1)).unwrap();
        let sweep_time = clock.now() + Duration::seconds(2);
        clock.advance(Duration::seconds(2));
        // A writer refreshes the key before the sweep gets to it.
        store.put("hourly:x", vec![1], Some(DataType::Hourly), None, Duration::minutes(15)).unwrap();

        assert!(!store.delete_expired("hourly:x", sweep_time).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cap_expiry_only_lowers() {
        let (clock, store) = store();
        store.put("analytics:x", vec![], None, None, Duration::days(30)).unwrap();
        let cap = clock.now() + Duration::hours(24);
        assert!(store.cap_expiry("analytics:x", cap).unwrap());
        assert!(!store.cap_expiry("analytics:x", cap + Duration::hours(1)).unwrap());
        assert!(!store.cap_expiry("missing", cap).unwrap());
    }

    #[test]
    fn test_put_rejects_zero_ttl() {
        let (_, store) = store();
        assert!(store.put("current:x", vec![], None, None, Duration::zero()).is_err());
        assert!(store.is_empty());
    }
}
