//! Background scheduler for the cleanup tiers.
//!
//! Runs three independent tokio tasks: shallow and deep sweeps on fixed
//! intervals, daily maintenance at a UTC time of day. Each run executes on
//! the blocking pool under a time box. A tier never overlaps with itself: a
//! trigger that fires while the previous run is still in flight is skipped
//! and reported, and a timed-out run keeps the tier blocked until its work
//! really finishes.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = CleanupScheduler::new(sweeper, SchedulerConfig::default());
//! let handles = scheduler.spawn(shutdown.clone());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Sweeper;
use crate::events::{CacheEvent, SweepTier};

/// Default interval between shallow sweeps (1 hour).
pub const DEFAULT_SHALLOW_INTERVAL_SECS: u64 = 60 * 60;

/// Default interval between deep sweeps (6 hours).
pub const DEFAULT_DEEP_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// Default time box for a single run (5 minutes).
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 5 * 60;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub shallow_interval: Duration,
    pub deep_interval: Duration,
    /// UTC time of day for daily maintenance
    pub daily_at: NaiveTime,
    pub run_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shallow_interval: Duration::from_secs(DEFAULT_SHALLOW_INTERVAL_SECS),
            deep_interval: Duration::from_secs(DEFAULT_DEEP_INTERVAL_SECS),
            daily_at: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or_default(),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

/// How a single triggered run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The previous run of the same tier was still in flight
    Skipped,
    TimedOut,
}

#[derive(Debug, Default)]
struct InFlight {
    shallow: AtomicBool,
    deep: AtomicBool,
    daily: AtomicBool,
}

impl InFlight {
    fn flag(&self, tier: SweepTier) -> &AtomicBool {
        match tier {
            SweepTier::Shallow => &self.shallow,
            SweepTier::Deep => &self.deep,
            SweepTier::Daily => &self.daily,
        }
    }
}

/// Clears the tier flag when the sweep work itself is dropped.
struct InFlightGuard {
    flags: Arc<InFlight>,
    tier: SweepTier,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flags.flag(self.tier).store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct CleanupScheduler {
    sweeper: Arc<Sweeper>,
    config: SchedulerConfig,
    in_flight: Arc<InFlight>,
}

impl CleanupScheduler {
    pub fn new(sweeper: Arc<Sweeper>, config: SchedulerConfig) -> Self {
        Self {
            sweeper,
            config,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether a run of `tier` is currently executing.
    pub fn is_running(&self, tier: SweepTier) -> bool {
        self.in_flight.flag(tier).load(Ordering::Acquire)
    }

    /// Run `tier` once, outside its schedule.
    ///
    /// Shares the in-flight flag with the scheduled triggers, so a manual run
    /// never overlaps a scheduled one of the same tier.
    pub async fn run_now(&self, tier: SweepTier) -> RunOutcome {
        let flag = self.in_flight.flag(tier);
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.sweeper.events().emit(CacheEvent::RunSkipped { tier });
            return RunOutcome::Skipped;
        }

        let guard = InFlightGuard {
            flags: Arc::clone(&self.in_flight),
            tier,
        };
        let sweeper = Arc::clone(&self.sweeper);
        let work = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            sweeper.run_tier(tier)
        });

        match tokio::time::timeout(self.config.run_timeout, work).await {
            Ok(Ok(Ok(()))) => RunOutcome::Completed,
            // Already reported by the sweeper
            Ok(Ok(Err(_))) => RunOutcome::Failed,
            Ok(Err(join_error)) => {
                self.sweeper.events().emit(CacheEvent::SweepFailed {
                    tier,
                    error: join_error.to_string(),
                });
                RunOutcome::Failed
            }
            Err(_) => {
                self.sweeper.events().emit(CacheEvent::RunTimedOut {
                    tier,
                    timeout_secs: self.config.run_timeout.as_secs(),
                });
                RunOutcome::TimedOut
            }
        }
    }

    /// Spawn one task per tier; all of them stop when `shutdown` is cancelled.
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            shallow_interval_secs = self.config.shallow_interval.as_secs(),
            deep_interval_secs = self.config.deep_interval.as_secs(),
            daily_at = %self.config.daily_at,
            run_timeout_secs = self.config.run_timeout.as_secs(),
            "Cache cleanup scheduler starting"
        );

        vec![
            tokio::spawn(self.clone().interval_loop(
                SweepTier::Shallow,
                self.config.shallow_interval,
                shutdown.clone(),
            )),
            tokio::spawn(self.clone().interval_loop(
                SweepTier::Deep,
                self.config.deep_interval,
                shutdown.clone(),
            )),
            tokio::spawn(self.clone().daily_loop(shutdown)),
        ]
    }

    async fn interval_loop(self, tier: SweepTier, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(%tier, "Cleanup tier shutting down");
                    break;
                }

                _ = interval.tick() => self.trigger(tier),
            }
        }
    }

    async fn daily_loop(self, shutdown: CancellationToken) {
        let at = self.config.daily_at;
        let mut target = next_daily_after(self.sweeper.clock().now(), at);

        loop {
            let delay = (target - self.sweeper.clock().now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            debug!(%target, delay_secs = delay.as_secs(), "Next daily cache maintenance scheduled");

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(tier = %SweepTier::Daily, "Cleanup tier shutting down");
                    break;
                }

                _ = tokio::time::sleep(delay.max(MIN_PERIOD)) => {
                    self.trigger(SweepTier::Daily);
                    target = following_daily(target, self.sweeper.clock().now(), at);
                }
            }
        }
    }

    /// Fire a run without blocking the trigger loop.
    fn trigger(&self, tier: SweepTier) {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.run_now(tier).await;
            debug!(%tier, ?outcome, "Scheduled cache sweep finished");
        });
    }
}

/// Time from `now` until the next occurrence of `at` (UTC), never zero.
pub fn until_next_daily(now: DateTime<Utc>, at: NaiveTime) -> Duration {
    (next_daily_after(now, at) - now)
        .to_std()
        .unwrap_or(MIN_PERIOD)
}

/// First occurrence of `at` (UTC) strictly after `instant`.
fn next_daily_after(instant: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = instant.date_naive().and_time(at).and_utc();
    if today > instant {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Target after a run scheduled for `previous`.
///
/// Advances from the previous target, not from the wall clock, so a clock
/// that reads slightly behind at wake-up cannot schedule the same day twice.
/// Days missed while the clock jumped ahead are skipped.
fn following_daily(previous: DateTime<Utc>, now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    next_daily_after(previous.max(now), at)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::clock::{Clock, ManualClock, SystemClock};
    use crate::error::{StoreError, StoreResult};
    use crate::events::ChannelSink;
    use crate::policy::CachePolicy;
    use crate::store::{CacheStore, MemoryStore, UsageCounters};
    use crate::types::{CacheEntry, DataType, EntryMetadata, KeyFilter, ScannedEntry};
    use chrono::TimeZone;
    use parking_lot::{Condvar, Mutex};
    use std::sync::mpsc::Receiver;

    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cv: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            let mut open = self.open.lock();
            while !*open {
                self.cv.wait(&mut open);
            }
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.cv.notify_all();
        }
    }

    /// Memory store whose `current:` scans block until the gate opens.
    struct GatedStore {
        inner: MemoryStore,
        gate: Arc<Gate>,
    }

    impl CacheStore for GatedStore {
        fn backend_name(&self) -> &'static str {
            "gated"
        }
        fn put(
            &self,
            key: &str,
            payload: Vec<u8>,
            data_type: Option<DataType>,
            location_id: Option<&str>,
            ttl: chrono::Duration,
        ) -> StoreResult<EntryMetadata> {
            self.inner.put(key, payload, data_type, location_id, ttl)
        }
        fn get_as(
            &self,
            key: &str,
            data_type: Option<DataType>,
        ) -> StoreResult<Option<CacheEntry>> {
            self.inner.get_as(key, data_type)
        }
        fn delete(&self, key: &str) -> StoreResult<usize> {
            self.inner.delete(key)
        }
        fn delete_matching(&self, filter: &KeyFilter) -> StoreResult<usize> {
            self.inner.delete_matching(filter)
        }
        fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> StoreResult<bool> {
            self.inner.delete_expired(key, now)
        }
        fn delete_malformed(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete_malformed(key)
        }
        fn scan(&self, filter: &KeyFilter) -> StoreResult<Vec<ScannedEntry>> {
            if matches!(filter, KeyFilter::Prefix(p) if p == "current:") {
                self.gate.wait();
            }
            self.inner.scan(filter)
        }
        fn cap_expiry(&self, key: &str, cap: DateTime<Utc>) -> StoreResult<bool> {
            self.inner.cap_expiry(key, cap)
        }
        fn compact(&self) -> StoreResult<()> {
            self.inner.compact()
        }
        fn usage(&self) -> &UsageCounters {
            self.inner.usage()
        }
    }

    #[derive(Default)]
    struct FailingStore {
        usage: UsageCounters,
    }

    impl CacheStore for FailingStore {
        fn backend_name(&self) -> &'static str {
            "failing"
        }
        fn put(
            &self,
            _: &str,
            _: Vec<u8>,
            _: Option<DataType>,
            _: Option<&str>,
            _: chrono::Duration,
        ) -> StoreResult<EntryMetadata> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn get_as(&self, _: &str, _: Option<DataType>) -> StoreResult<Option<CacheEntry>> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn delete(&self, _: &str) -> StoreResult<usize> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn delete_matching(&self, _: &KeyFilter) -> StoreResult<usize> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn delete_expired(&self, _: &str, _: DateTime<Utc>) -> StoreResult<bool> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn delete_malformed(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn scan(&self, _: &KeyFilter) -> StoreResult<Vec<ScannedEntry>> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn cap_expiry(&self, _: &str, _: DateTime<Utc>) -> StoreResult<bool> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn compact(&self) -> StoreResult<()> {
            Err(StoreError::unavailable("disk detached"))
        }
        fn usage(&self) -> &UsageCounters {
            &self.usage
        }
    }

    fn scheduler(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> (CleanupScheduler, Receiver<CacheEvent>) {
        let (sink, rx) = ChannelSink::channel();
        let sweeper = Sweeper::new(store, Arc::new(CachePolicy::new()), clock, Arc::new(sink));
        (CleanupScheduler::new(Arc::new(sweeper), config), rx)
    }

    fn gated() -> (Arc<Gate>, Arc<GatedStore>) {
        let gate = Arc::new(Gate::default());
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: gate.clone(),
        });
        (gate, store)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_run_now_completes() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        store
            .put("current:a", vec![], Some(DataType::Current), None, chrono::Duration::minutes(1))
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));

        let (scheduler, rx) = scheduler(store.clone(), clock, SchedulerConfig::default());
        assert_eq!(scheduler.run_now(SweepTier::Shallow).await, RunOutcome::Completed);
        assert!(store.is_empty());
        assert!(!scheduler.is_running(SweepTier::Shallow));
        assert!(matches!(rx.try_recv().unwrap(), CacheEvent::ShallowSweepCompleted(_)));
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let (gate, store) = gated();
        let (scheduler, rx) = scheduler(store, Arc::new(SystemClock), SchedulerConfig::default());

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_now(SweepTier::Shallow).await })
        };
        wait_until(|| scheduler.is_running(SweepTier::Shallow)).await;

        assert_eq!(scheduler.run_now(SweepTier::Shallow).await, RunOutcome::Skipped);
        // Other tiers are independent
        assert_eq!(scheduler.run_now(SweepTier::Daily).await, RunOutcome::Completed);

        gate.open();
        assert_eq!(first.await.unwrap(), RunOutcome::Completed);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&CacheEvent::RunSkipped {
            tier: SweepTier::Shallow
        }));
    }

    #[tokio::test]
    async fn test_timed_out_run_blocks_tier_until_work_finishes() {
        let (gate, store) = gated();
        let config = SchedulerConfig {
            run_timeout: Duration::from_millis(50),
            ..SchedulerConfig::default()
        };
        let (scheduler, rx) = scheduler(store, Arc::new(SystemClock), config);

        assert_eq!(scheduler.run_now(SweepTier::Shallow).await, RunOutcome::TimedOut);
        assert!(scheduler.is_running(SweepTier::Shallow));
        assert_eq!(scheduler.run_now(SweepTier::Shallow).await, RunOutcome::Skipped);

        gate.open();
        wait_until(|| !scheduler.is_running(SweepTier::Shallow)).await;
        assert_eq!(scheduler.run_now(SweepTier::Shallow).await, RunOutcome::Completed);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&CacheEvent::RunTimedOut {
            tier: SweepTier::Shallow,
            timeout_secs: 0
        }));
    }

    #[tokio::test]
    async fn test_failed_run_is_reported_and_releases_tier() {
        let (scheduler, rx) = scheduler(
            Arc::new(FailingStore::default()),
            Arc::new(SystemClock),
            SchedulerConfig::default(),
        );

        assert_eq!(scheduler.run_now(SweepTier::Deep).await, RunOutcome::Failed);
        assert_eq!(scheduler.run_now(SweepTier::Deep).await, RunOutcome::Failed);

        let failures = rx
            .try_iter()
            .filter(|e| matches!(e, CacheEvent::SweepFailed { tier: SweepTier::Deep, .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_spawned_tiers_run_and_stop_on_shutdown() {
        let config = SchedulerConfig {
            shallow_interval: Duration::from_millis(20),
            deep_interval: Duration::from_millis(30),
            ..SchedulerConfig::default()
        };
        let (scheduler, rx) = scheduler(Arc::new(MemoryStore::new()), Arc::new(SystemClock), config);

        let shutdown = CancellationToken::new();
        let handles = scheduler.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, CacheEvent::ShallowSweepCompleted(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, CacheEvent::DeepSweepCompleted(_))));
    }

    #[test]
    fn test_until_next_daily_later_today() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 1, 30, 0).unwrap();
        let at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        assert_eq!(until_next_daily(now, at), Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_following_daily_ignores_lagging_clock() {
        let at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let previous = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        let lagging = previous - chrono::Duration::milliseconds(1);

        // Recomputing from the wall clock would land on the same target again
        assert_eq!(next_daily_after(lagging, at), previous);
        assert_eq!(
            following_daily(previous, lagging, at),
            Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_following_daily_skips_missed_days() {
        let at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let previous = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        let jumped = Utc.with_ymd_and_hms(2025, 6, 3, 10, 0, 0).unwrap();
        assert_eq!(
            following_daily(previous, jumped, at),
            Utc.with_ymd_and_hms(2025, 6, 4, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_until_next_daily_rolls_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let exactly = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        assert_eq!(until_next_daily(exactly, at), Duration::from_secs(24 * 60 * 60));

        let after = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
        assert_eq!(until_next_daily(after, at), Duration::from_secs(4 * 60 * 60));
    }
}
