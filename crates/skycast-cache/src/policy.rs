//! Per-data-type expiration rules, independent of storage mechanics.
//!
//! - TTL table: the single registration point for [`DataType`] lifetimes
//! - Recapping: long-lived classes may never keep more than their max TTL
//! - Orphans: keys with no recognized prefix are always deletable

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::types::{DataType, EntryMetadata};

/// The expiry predicate. `get` and every sweep go through this function.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now
}

/// Built-in TTL for each data type.
pub fn default_ttl(data_type: DataType) -> Duration {
    match data_type {
        DataType::Current => Duration::minutes(15),
        DataType::Forecast => Duration::minutes(15),
        DataType::Hourly => Duration::minutes(15),
        DataType::AirQuality => Duration::minutes(30),
        // Past observations never change
        DataType::Historical => Duration::hours(24),
    }
}

/// A category of long-lived auxiliary entries (location lookups, analytics,
/// user settings) identified by key prefix and bounded by a maximum TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongLivedClass {
    pub prefix: String,
    pub max_ttl: Duration,
}

impl LongLivedClass {
    pub fn new(prefix: impl Into<String>, max_ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            max_ttl,
        }
    }

    /// Default classes: location lookups, analytics rollups, user settings.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("location:", Duration::days(7)),
            Self::new("analytics:", Duration::hours(24)),
            Self::new("user_settings:", Duration::hours(12)),
        ]
    }
}

/// How the policy sees a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass<'a> {
    DataType(DataType),
    LongLived(&'a LongLivedClass),
    Orphan,
}

/// Cache policy: TTL table plus long-lived class limits.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    ttl_overrides: HashMap<DataType, Duration>,
    long_lived: Vec<LongLivedClass>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl_overrides: HashMap::new(),
            long_lived: LongLivedClass::defaults(),
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the TTL of one data type. Non-positive values are ignored.
    pub fn with_ttl(mut self, data_type: DataType, ttl: Duration) -> Self {
        if ttl > Duration::zero() {
            self.ttl_overrides.insert(data_type, ttl);
        } else {
            tracing::warn!(data_type = %data_type, "Ignoring non-positive TTL override");
        }
        self
    }

    /// Replace the set of long-lived classes.
    pub fn with_long_lived(mut self, classes: Vec<LongLivedClass>) -> Self {
        self.long_lived = classes;
        self
    }

    pub fn ttl_for(&self, data_type: DataType) -> Duration {
        self.ttl_overrides
            .get(&data_type)
            .copied()
            .unwrap_or_else(|| default_ttl(data_type))
    }

    pub fn long_lived(&self) -> &[LongLivedClass] {
        &self.long_lived
    }

    /// Every prefix the policy recognizes; anything else is an orphan.
    pub fn recognized_prefixes(&self) -> Vec<&str> {
        DataType::ALL
            .iter()
            .map(|t| t.prefix())
            .chain(self.long_lived.iter().map(|c| c.prefix.as_str()))
            .collect()
    }

    pub fn classify(&self, key: &str) -> KeyClass<'_> {
        if let Some(data_type) = DataType::from_key(key) {
            return KeyClass::DataType(data_type);
        }
        self.long_lived
            .iter()
            .find(|c| !c.prefix.is_empty() && key.starts_with(c.prefix.as_str()))
            .map_or(KeyClass::Orphan, KeyClass::LongLived)
    }

    pub fn is_orphan(&self, key: &str) -> bool {
        matches!(self.classify(key), KeyClass::Orphan)
    }

    /// New expiry for an entry whose remaining TTL exceeds its class max.
    ///
    /// Returns `None` when the entry is not long-lived or already within bounds.
    pub fn recap_target(&self, meta: &EntryMetadata, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.classify(&meta.key) {
            KeyClass::LongLived(class) if meta.remaining_ttl(now) > class.max_ttl => {
                Some(now + class.max_ttl)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn meta(key: &str, now: DateTime<Utc>, remaining: Duration) -> EntryMetadata {
        EntryMetadata {
            key: key.into(),
            data_type: None,
            location_id: None,
            cached_at: now - Duration::minutes(1),
            expires_at: now + remaining,
            access_count: 0,
            payload_bytes: 0,
        }
    }

    #[test]
    fn test_default_ttls() {
        let policy = CachePolicy::new();
        assert_eq!(policy.ttl_for(DataType::Current), Duration::minutes(15));
        assert_eq!(policy.ttl_for(DataType::Forecast), Duration::minutes(15));
        assert_eq!(policy.ttl_for(DataType::Hourly), Duration::minutes(15));
        assert_eq!(policy.ttl_for(DataType::AirQuality), Duration::minutes(30));
        assert_eq!(policy.ttl_for(DataType::Historical), Duration::hours(24));
    }

    #[test]
    fn test_ttl_override() {
        let policy = CachePolicy::new()
            .with_ttl(DataType::Current, Duration::minutes(5))
            .with_ttl(DataType::Forecast, Duration::zero());
        assert_eq!(policy.ttl_for(DataType::Current), Duration::minutes(5));
        assert_eq!(policy.ttl_for(DataType::Forecast), Duration::minutes(15));
    }

    #[test]
    fn test_is_expired_boundary() {
        let now = Utc::now();
        assert!(is_expired(now, now));
        assert!(is_expired(now - Duration::seconds(1), now));
        assert!(!is_expired(now + Duration::seconds(1), now));
    }

    #[test]
    fn test_classify() {
        let policy = CachePolicy::new();
        assert_eq!(
            policy.classify("hourly:london"),
            KeyClass::DataType(DataType::Hourly)
        );
        assert!(matches!(
            policy.classify("location:search:london"),
            KeyClass::LongLived(c) if c.prefix == "location:"
        ));
        assert_eq!(policy.classify("weather_legacy_london"), KeyClass::Orphan);
        assert!(policy.is_orphan("london:forecast"));
    }

    #[test]
    fn test_empty_prefix_class_does_not_swallow_orphans() {
        let policy = CachePolicy::new().with_long_lived(vec![LongLivedClass::new("", Duration::hours(1))]);
        assert!(policy.is_orphan("anything"));
    }

    #[test]
    fn test_recap_target() {
        let policy = CachePolicy::new();
        let now = Utc::now();

        let generous = meta("analytics:daily", now, Duration::days(30));
        assert_eq!(policy.recap_target(&generous, now), Some(now + Duration::hours(24)));

        let modest = meta("analytics:daily", now, Duration::hours(2));
        assert_eq!(policy.recap_target(&modest, now), None);

        // Weather data types are never recapped
        let forecast = meta("forecast:paris", now, Duration::days(30));
        assert_eq!(policy.recap_target(&forecast, now), None);
    }

    #[test]
    fn test_recognized_prefixes_include_long_lived() {
        let policy = CachePolicy::new();
        let prefixes = policy.recognized_prefixes();
        assert!(prefixes.contains(&"current:"));
        assert!(prefixes.contains(&"user_settings:"));
        assert_eq!(prefixes.len(), 8);
    }
}
