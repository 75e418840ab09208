//! One-way observability events emitted by sweeps and the retrieval façade.
//!
//! Delivery is best-effort: sinks must never fail the operation that emitted
//! the event.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::store::UsageSnapshot;

/// The three cleanup tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepTier {
    Shallow,
    Deep,
    Daily,
}

impl SweepTier {
    pub const ALL: [SweepTier; 3] = [SweepTier::Shallow, SweepTier::Deep, SweepTier::Daily];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Deep => "deep",
            Self::Daily => "daily",
        }
    }
}

impl fmt::Display for SweepTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expired entries removed per data-type prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShallowSweepReport {
    pub deleted_by_prefix: BTreeMap<String, usize>,
}

impl ShallowSweepReport {
    pub fn total_deleted(&self) -> usize {
        self.deleted_by_prefix.values().sum()
    }
}

/// Snapshot of what the key space holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCensus {
    pub taken_at: Option<DateTime<Utc>>,
    /// Entry counts per recognized prefix (zero-count prefixes included)
    pub entries_by_prefix: BTreeMap<String, usize>,
    pub orphans: usize,
    pub malformed: usize,
    /// Present but logically expired
    pub expired: usize,
    pub total_entries: usize,
    pub total_payload_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepSweepReport {
    pub expired: ShallowSweepReport,
    pub orphans_deleted: usize,
    pub malformed_deleted: usize,
    pub compacted: bool,
    pub census: CacheCensus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Entries recapped per long-lived class prefix
    pub recapped_by_prefix: BTreeMap<String, usize>,
    /// Usage counters as they stood before the reset
    pub usage_before_reset: UsageSnapshot,
}

impl MaintenanceReport {
    pub fn total_recapped(&self) -> usize {
        self.recapped_by_prefix.values().sum()
    }
}

/// Events emitted by the cache core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    ShallowSweepCompleted(ShallowSweepReport),
    DeepSweepCompleted(DeepSweepReport),
    MaintenanceCompleted(MaintenanceReport),
    Census(CacheCensus),
    CompactionFailed { error: String },
    SweepFailed { tier: SweepTier, error: String },
    /// A trigger fired while the previous run of the same tier was in flight
    RunSkipped { tier: SweepTier },
    RunTimedOut { tier: SweepTier, timeout_secs: u64 },
    /// The façade recovered a storage failure as a miss
    StoreUnavailable { operation: String, error: String },
    MalformedPayload { key: String, error: String },
}

/// Receiver of cache events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CacheEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: CacheEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CacheEvent) {
        match &event {
            CacheEvent::ShallowSweepCompleted(report) => tracing::info!(
                deleted = report.total_deleted(),
                by_prefix = ?report.deleted_by_prefix,
                "Shallow cache sweep completed"
            ),
            CacheEvent::DeepSweepCompleted(report) => tracing::info!(
                expired = report.expired.total_deleted(),
                orphans = report.orphans_deleted,
                malformed = report.malformed_deleted,
                compacted = report.compacted,
                "Deep cache sweep completed"
            ),
            CacheEvent::MaintenanceCompleted(report) => tracing::info!(
                recapped = report.total_recapped(),
                hits = report.usage_before_reset.hits,
                misses = report.usage_before_reset.misses,
                hit_rate = report.usage_before_reset.hit_rate(),
                "Daily cache maintenance completed"
            ),
            CacheEvent::Census(census) => tracing::info!(
                total = census.total_entries,
                bytes = census.total_payload_bytes,
                orphans = census.orphans,
                expired = census.expired,
                by_prefix = ?census.entries_by_prefix,
                "Cache census"
            ),
            CacheEvent::CompactionFailed { error } => {
                tracing::warn!(%error, "Cache compaction failed")
            }
            CacheEvent::SweepFailed { tier, error } => {
                tracing::error!(%tier, %error, "Cache sweep failed")
            }
            CacheEvent::RunSkipped { tier } => {
                tracing::warn!(%tier, "Previous sweep still running, skipping trigger")
            }
            CacheEvent::RunTimedOut { tier, timeout_secs } => {
                tracing::warn!(%tier, timeout_secs, "Cache sweep exceeded its time box")
            }
            CacheEvent::StoreUnavailable { operation, error } => {
                tracing::warn!(%operation, %error, "Cache store unavailable, treating as miss")
            }
            CacheEvent::MalformedPayload { key, error } => {
                tracing::warn!(%key, %error, "Discarding malformed cache payload")
            }
        }
    }
}

/// Forwards events over a channel; a dropped receiver is ignored.
pub struct ChannelSink {
    tx: Mutex<mpsc::Sender<CacheEvent>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<CacheEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    /// Sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::Receiver<CacheEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: CacheEvent) {
        let _ = self.tx.lock().send(event);
    }
}

/// Fans events out to several sinks.
pub struct MultiSink(pub Vec<std::sync::Arc<dyn EventSink>>);

impl EventSink for MultiSink {
    fn emit(&self, event: CacheEvent) {
        for sink in &self.0 {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, rx) = ChannelSink::channel();
        sink.emit(CacheEvent::RunSkipped { tier: SweepTier::Deep });
        assert_eq!(rx.recv().unwrap(), CacheEvent::RunSkipped { tier: SweepTier::Deep });
    }

    #[test]
    fn test_channel_sink_ignores_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(CacheEvent::CompactionFailed { error: "disk".into() });
    }

    #[test]
    fn test_multi_sink_fans_out() {
        let (a, rx_a) = ChannelSink::channel();
        let (b, rx_b) = ChannelSink::channel();
        let sink = MultiSink(vec![Arc::new(a), Arc::new(b), Arc::new(TracingSink)]);
        sink.emit(CacheEvent::RunSkipped { tier: SweepTier::Shallow });
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(CacheEvent::SweepFailed {
            tier: SweepTier::Daily,
            error: "store down".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "sweep_failed");
        assert_eq!(json["tier"], "daily");
    }
}
