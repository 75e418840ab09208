//! Synchronous sweep logic for the three cleanup tiers.
//!
//! Every sweep is idempotent: expired deletions go through
//! [`CacheStore::delete_expired`], which re-checks expiry under the key's
//! lock, so a second pass with no intervening writes deletes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreResult;
use crate::events::{
    CacheCensus, CacheEvent, DeepSweepReport, EventSink, MaintenanceReport, ShallowSweepReport,
    SweepTier,
};
use crate::policy::{is_expired, CachePolicy, KeyClass};
use crate::store::CacheStore;
use crate::types::{DataType, KeyFilter, ScannedEntry};

pub struct Sweeper {
    store: Arc<dyn CacheStore>,
    policy: Arc<CachePolicy>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn CacheStore>,
        policy: Arc<CachePolicy>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            events,
        }
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one tier, reporting a failure as a `SweepFailed` event.
    pub fn run_tier(&self, tier: SweepTier) -> StoreResult<()> {
        tracing::debug!(%tier, backend = self.store.backend_name(), "Starting cache sweep");
        let result = match tier {
            SweepTier::Shallow => self.shallow_sweep().map(|_| ()),
            SweepTier::Deep => self.deep_sweep().map(|_| ()),
            SweepTier::Daily => self.daily_maintenance().map(|_| ()),
        };
        if let Err(e) = &result {
            self.events.emit(CacheEvent::SweepFailed {
                tier,
                error: e.to_string(),
            });
        }
        result
    }

    /// Delete expired entries under every data-type prefix.
    pub fn shallow_sweep(&self) -> StoreResult<ShallowSweepReport> {
        let prefixes: Vec<&str> = DataType::ALL.iter().map(|t| t.prefix()).collect();
        let report = self.delete_expired_under(&prefixes)?;
        self.events
            .emit(CacheEvent::ShallowSweepCompleted(report.clone()));
        Ok(report)
    }

    /// Expired deletion for all recognized prefixes, then orphan and
    /// malformed deletion across the whole key space, a compaction hint, and
    /// a census.
    pub fn deep_sweep(&self) -> StoreResult<DeepSweepReport> {
        let expired = self.delete_expired_under(&self.policy.recognized_prefixes())?;

        let mut orphans = Vec::new();
        let mut malformed = Vec::new();
        for entry in self.store.scan(&KeyFilter::All)? {
            match entry {
                ScannedEntry::Malformed { key, reason } => {
                    tracing::debug!(%key, %reason, "Deleting malformed cache entry");
                    malformed.push(key);
                }
                ScannedEntry::Valid(meta) if self.policy.is_orphan(&meta.key) => {
                    orphans.push(meta.key);
                }
                ScannedEntry::Valid(_) => {}
            }
        }

        let orphans_deleted = if orphans.is_empty() {
            0
        } else {
            self.store.delete_matching(&KeyFilter::Keys(orphans))?
        };
        let mut malformed_deleted = 0;
        for key in &malformed {
            if self.store.delete_malformed(key)? {
                malformed_deleted += 1;
            }
        }

        let compacted = match self.store.compact() {
            Ok(()) => true,
            Err(e) => {
                self.events.emit(CacheEvent::CompactionFailed {
                    error: e.to_string(),
                });
                false
            }
        };

        let census = self.census()?;
        self.events.emit(CacheEvent::Census(census.clone()));

        let report = DeepSweepReport {
            expired,
            orphans_deleted,
            malformed_deleted,
            compacted,
            census,
        };
        self.events
            .emit(CacheEvent::DeepSweepCompleted(report.clone()));
        Ok(report)
    }

    /// Recap long-lived classes and reset the rolling usage counters.
    pub fn daily_maintenance(&self) -> StoreResult<MaintenanceReport> {
        let now = self.clock.now();
        let mut recapped_by_prefix = BTreeMap::new();

        for class in self.policy.long_lived() {
            if class.prefix.is_empty() {
                continue;
            }
            let mut recapped = 0;
            for entry in self.store.scan(&KeyFilter::prefix(class.prefix.as_str()))? {
                let ScannedEntry::Valid(meta) = entry else {
                    continue;
                };
                if let Some(cap) = self.policy.recap_target(&meta, now) {
                    if self.store.cap_expiry(&meta.key, cap)? {
                        recapped += 1;
                    }
                }
            }
            recapped_by_prefix.insert(class.prefix.clone(), recapped);
        }

        let report = MaintenanceReport {
            recapped_by_prefix,
            usage_before_reset: self.store.usage().reset(),
        };
        self.events
            .emit(CacheEvent::MaintenanceCompleted(report.clone()));
        Ok(report)
    }

    /// Count entries per recognized prefix, plus orphans and expired ones.
    pub fn census(&self) -> StoreResult<CacheCensus> {
        let now = self.clock.now();
        let mut census = CacheCensus {
            taken_at: Some(now),
            entries_by_prefix: self
                .policy
                .recognized_prefixes()
                .into_iter()
                .map(|p| (p.to_string(), 0))
                .collect(),
            ..CacheCensus::default()
        };

        for entry in self.store.scan(&KeyFilter::All)? {
            census.total_entries += 1;
            let meta = match entry {
                ScannedEntry::Valid(meta) => meta,
                ScannedEntry::Malformed { .. } => {
                    census.malformed += 1;
                    continue;
                }
            };

            census.total_payload_bytes += meta.payload_bytes;
            if is_expired(meta.expires_at, now) {
                census.expired += 1;
            }

            let prefix = match self.policy.classify(&meta.key) {
                KeyClass::DataType(t) => t.prefix(),
                KeyClass::LongLived(class) => class.prefix.as_str(),
                KeyClass::Orphan => {
                    census.orphans += 1;
                    continue;
                }
            };
            *census.entries_by_prefix.entry(prefix.to_string()).or_insert(0) += 1;
        }

        Ok(census)
    }

    fn delete_expired_under(&self, prefixes: &[&str]) -> StoreResult<ShallowSweepReport> {
        let now = self.clock.now();
        let mut report = ShallowSweepReport::default();

        for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
            let mut deleted = 0;
            for entry in self.store.scan(&KeyFilter::prefix(*prefix))? {
                if let ScannedEntry::Valid(meta) = entry {
                    if is_expired(meta.expires_at, now) && self.store.delete_expired(&meta.key, now)? {
                        deleted += 1;
                    }
                }
            }
            report.deleted_by_prefix.insert(prefix.to_string(), deleted);
        }

        Ok(report)
    }
}
