use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of upstream weather data the cache holds.
///
/// The TTL table in [`crate::policy`] is the only place a new variant needs
/// registering; keys are namespaced by [`DataType::prefix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Current,
    Forecast,
    Hourly,
    AirQuality,
    Historical,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Current,
        DataType::Forecast,
        DataType::Hourly,
        DataType::AirQuality,
        DataType::Historical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Hourly => "hourly",
            Self::AirQuality => "air_quality",
            Self::Historical => "historical",
        }
    }

    /// Key prefix, including the trailing separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Current => "current:",
            Self::Forecast => "forecast:",
            Self::Hourly => "hourly:",
            Self::AirQuality => "air_quality:",
            Self::Historical => "historical:",
        }
    }

    /// Data type owning `key`, by prefix.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| key.starts_with(t.prefix()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown data type: {}", s))
    }
}

/// Builder for canonical `"<data_type>:<location>"` cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for an already-normalized location token.
    pub fn new(data_type: DataType, location: &str) -> Self {
        Self(format!("{}{}", data_type.prefix(), location))
    }

    /// Key for a coordinate pair, rounded to two decimals (~1 km).
    pub fn for_coordinates(data_type: DataType, latitude: f64, longitude: f64) -> Self {
        Self::new(data_type, &format!("{:.2},{:.2}", latitude, longitude))
    }

    /// Key for a city name, lower-cased with whitespace removed.
    pub fn for_city(data_type: DataType, city: &str) -> Self {
        let token: String = city
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        Self::new(data_type, &token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Everything known about an entry except its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: String,
    /// `None` for long-lived auxiliary classes
    pub data_type: Option<DataType>,
    pub location_id: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub payload_bytes: usize,
}

impl EntryMetadata {
    /// Remaining time to live, negative once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }
}

/// A cached payload plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub metadata: EntryMetadata,
    pub payload: Vec<u8>,
}

impl CacheEntry {
    pub fn key(&self) -> &str {
        &self.metadata.key
    }
}

/// Result of scanning one row of the key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedEntry {
    Valid(EntryMetadata),
    /// Row could not be decoded or is missing required metadata
    Malformed { key: String, reason: String },
}

impl ScannedEntry {
    pub fn key(&self) -> &str {
        match self {
            Self::Valid(meta) => &meta.key,
            Self::Malformed { key, .. } => key,
        }
    }
}

/// Selects a subset of the key space for scans and bulk deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    All,
    Prefix(String),
    Location(String),
    Keys(Vec<String>),
}

impl KeyFilter {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Key-only match. `Location` filters need metadata and match nothing here.
    pub fn matches_key(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(p) => key.starts_with(p.as_str()),
            Self::Location(_) => false,
            Self::Keys(keys) => keys.iter().any(|k| k == key),
        }
    }

    /// Full match against a decoded entry.
    pub fn matches(&self, meta: &EntryMetadata) -> bool {
        match self {
            Self::Location(loc) => meta.location_id.as_deref() == Some(loc.as_str()),
            other => other.matches_key(&meta.key),
        }
    }
}
