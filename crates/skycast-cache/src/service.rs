//! Retrieval façade over a cache store.
//!
//! `WeatherCache` never fails its caller: any storage problem is reported as
//! a [`CacheEvent`] and surfaces as a miss, so the caller falls back to the
//! upstream fetch. It never performs that fetch itself.

use std::sync::Arc;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::events::{CacheEvent, EventSink};
use crate::policy::CachePolicy;
use crate::store::CacheStore;
use crate::types::{DataType, EntryMetadata, KeyFilter};

/// Outcome of a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheResult {
    pub hit: bool,
    pub payload: Option<Vec<u8>>,
    pub metadata: Option<EntryMetadata>,
}

impl CacheResult {
    pub fn miss() -> Self {
        Self::default()
    }
}

/// Hit/miss counters since the last daily reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct WeatherCache {
    store: Arc<dyn CacheStore>,
    policy: Arc<CachePolicy>,
    events: Arc<dyn EventSink>,
}

impl WeatherCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        policy: Arc<CachePolicy>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    pub fn store_backend(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<CachePolicy> {
        &self.policy
    }

    /// Look up `key`, counting it a hit only if the stored entry is live and
    /// of the requested data type.
    pub fn fetch_or_miss(&self, key: &str, data_type: DataType) -> CacheResult {
        match self.store.get_as(key, Some(data_type)) {
            Ok(Some(entry)) => CacheResult {
                hit: true,
                payload: Some(entry.payload),
                metadata: Some(entry.metadata),
            },
            Ok(None) => CacheResult::miss(),
            Err(e) => {
                self.store.usage().record_miss();
                self.unavailable("get", &e);
                CacheResult::miss()
            }
        }
    }

    /// Cache `payload` under the data type's policy TTL.
    pub fn store(
        &self,
        key: &str,
        payload: Vec<u8>,
        data_type: DataType,
        location_id: Option<&str>,
    ) -> Option<EntryMetadata> {
        let ttl = self.policy.ttl_for(data_type);
        self.store_with_ttl(key, payload, Some(data_type), location_id, ttl)
    }

    /// Cache `payload` with an explicit TTL; used for long-lived classes.
    pub fn store_with_ttl(
        &self,
        key: &str,
        payload: Vec<u8>,
        data_type: Option<DataType>,
        location_id: Option<&str>,
        ttl: Duration,
    ) -> Option<EntryMetadata> {
        match self.store.put(key, payload, data_type, location_id, ttl) {
            Ok(metadata) => {
                tracing::trace!(%key, expires_at = %metadata.expires_at, "Cached entry");
                Some(metadata)
            }
            Err(e) => {
                self.unavailable("put", &e);
                None
            }
        }
    }

    /// Typed lookup. A payload that does not deserialize is deleted and
    /// reported as a miss.
    pub fn fetch_json<T: DeserializeOwned>(&self, key: &str, data_type: DataType) -> Option<T> {
        let result = self.fetch_or_miss(key, data_type);
        let payload = result.payload?;

        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.store.usage().reject_hit();
                self.events.emit(CacheEvent::MalformedPayload {
                    key: key.to_string(),
                    error: e.to_string(),
                });
                if let Err(e) = self.store.delete(key) {
                    self.unavailable("delete", &e);
                }
                None
            }
        }
    }

    pub fn store_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        data_type: DataType,
        location_id: Option<&str>,
    ) -> Option<EntryMetadata> {
        match serde_json::to_vec(value) {
            Ok(payload) => self.store(key, payload, data_type, location_id),
            Err(e) => {
                self.events.emit(CacheEvent::MalformedPayload {
                    key: key.to_string(),
                    error: StoreError::from(e).to_string(),
                });
                None
            }
        }
    }

    /// Remove one key. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        match self.store.delete(key) {
            Ok(removed) => removed > 0,
            Err(e) => {
                self.unavailable("delete", &e);
                false
            }
        }
    }

    /// Remove every entry tagged with `location_id`.
    pub fn invalidate_location(&self, location_id: &str) -> usize {
        match self
            .store
            .delete_matching(&KeyFilter::Location(location_id.to_string()))
        {
            Ok(removed) => {
                tracing::debug!(%location_id, removed, "Invalidated location");
                removed
            }
            Err(e) => {
                self.unavailable("delete_matching", &e);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let usage = self.store.usage().snapshot();
        CacheStats {
            hits: usage.hits,
            misses: usage.misses,
            hit_rate: usage.hit_rate(),
        }
    }

    fn unavailable(&self, operation: &str, error: &StoreError) {
        self.events.emit(CacheEvent::StoreUnavailable {
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }
}
