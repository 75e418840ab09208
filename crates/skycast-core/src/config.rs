use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use skycast_cache::{CachePolicy, DataType, LongLivedClass, SchedulerConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Format of `cleanup.daily_at`
const DAILY_AT_FORMAT: &str = "%H:%M";

/// Longest accepted cleanup interval
const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cache storage settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cleanup schedule
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Forecast aggregation settings
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Long-lived auxiliary entry classes
    #[serde(default = "default_long_lived")]
    pub long_lived: Vec<LongLivedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            cleanup: CleanupConfig::default(),
            aggregation: AggregationConfig::default(),
            long_lived: default_long_lived(),
        }
    }
}

/// Cache store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// SQLite file; defaults to the platform data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Per data type TTL overrides in minutes, keyed by data type name
    #[serde(default)]
    pub ttl_minutes: BTreeMap<String, i64>,
}

impl CacheConfig {
    /// Resolved SQLite database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("skycast")
                .join("cache.db")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_shallow_interval")]
    pub shallow_interval_minutes: u64,

    #[serde(default = "default_deep_interval")]
    pub deep_interval_hours: u64,

    /// UTC time of day for daily maintenance, "HH:MM"
    #[serde(default = "default_daily_at")]
    pub daily_at: String,

    /// Time box for a single sweep
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_shallow_interval() -> u64 {
    60
}

fn default_deep_interval() -> u64 {
    6
}

fn default_daily_at() -> String {
    "03:00".to_string()
}

fn default_run_timeout() -> u64 {
    300
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            shallow_interval_minutes: default_shallow_interval(),
            deep_interval_hours: default_deep_interval(),
            daily_at: default_daily_at(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

impl CleanupConfig {
    pub fn daily_at_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_at, DAILY_AT_FORMAT)
            .map_err(|_| ConfigError::Invalid(format!("cleanup.daily_at: {:?}", self.daily_at)))
    }

    /// `None` if the minutes do not fit in a `Duration` of seconds.
    pub fn shallow_interval(&self) -> Option<Duration> {
        self.shallow_interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
    }

    pub fn deep_interval(&self) -> Option<Duration> {
        self.deep_interval_hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongLivedConfig {
    /// Key prefix, including the trailing separator
    pub prefix: String,
    pub max_ttl_hours: i64,
}

fn default_long_lived() -> Vec<LongLivedConfig> {
    LongLivedClass::defaults()
        .into_iter()
        .map(|class| LongLivedConfig {
            prefix: class.prefix,
            max_ttl_hours: class.max_ttl.num_hours(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Number of daily summaries kept after aggregation
    #[serde(default = "default_forecast_days")]
    pub forecast_days: usize,
}

fn default_forecast_days() -> usize {
    5
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            forecast_days: default_forecast_days(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing the defaults there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        Self::validated(Self::load()?)
    }

    pub fn load_validated_from(path: &Path) -> Result<(Self, ValidationResult)> {
        Self::validated(Self::load_from(path)?)
    }

    fn validated(config: Self) -> Result<(Self, ValidationResult)> {
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (name, minutes) in &self.cache.ttl_minutes {
            let field = format!("cache.ttl_minutes.{}", name);
            if name.parse::<DataType>().is_err() {
                result.add_error(&field, format!("Unknown data type: {}", name));
            } else if *minutes <= 0 {
                result.add_error(&field, "TTL must be greater than 0");
            } else if *minutes > 7 * 24 * 60 {
                result.add_warning(&field, "TTL is more than 7 days");
            }
        }

        if self.cache.backend == CacheBackend::Sqlite {
            let path = self.cache.database_path();
            if path.is_dir() {
                result.add_error(
                    "cache.database_path",
                    format!("Path is a directory: {}", path.display()),
                );
            }
        }

        let shallow = check_interval(
            &mut result,
            "cleanup.shallow_interval_minutes",
            self.cleanup.shallow_interval_minutes,
            self.cleanup.shallow_interval(),
        );
        let deep = check_interval(
            &mut result,
            "cleanup.deep_interval_hours",
            self.cleanup.deep_interval_hours,
            self.cleanup.deep_interval(),
        );
        if let (Some(shallow), Some(deep)) = (shallow, deep) {
            if deep < shallow {
                result.add_warning(
                    "cleanup.deep_interval_hours",
                    "Deep sweeps run more often than shallow sweeps",
                );
            }
        }

        if self.cleanup.daily_at_time().is_err() {
            result.add_error(
                "cleanup.daily_at",
                format!("Expected HH:MM, got {:?}", self.cleanup.daily_at),
            );
        }

        if self.cleanup.run_timeout_secs == 0 {
            result.add_error("cleanup.run_timeout_secs", "Timeout must be greater than 0");
        }

        self.validate_long_lived(&mut result);

        if self.aggregation.forecast_days == 0 {
            result.add_error(
                "aggregation.forecast_days",
                "Forecast horizon must be at least 1 day",
            );
        } else if self.aggregation.forecast_days > 16 {
            result.add_warning(
                "aggregation.forecast_days",
                "Providers rarely forecast more than 16 days",
            );
        }

        result
    }

    /// Long-lived prefixes must be non-empty and must not overlap each other
    /// or a data type prefix.
    fn validate_long_lived(&self, result: &mut ValidationResult) {
        for (i, class) in self.long_lived.iter().enumerate() {
            let field = format!("long_lived[{}]", i);

            if class.prefix.is_empty() {
                result.add_error(&field, "Prefix must not be empty");
                continue;
            }
            if !class.prefix.ends_with(':') {
                result.add_warning(&field, "Prefix does not end with ':'");
            }
            if class.max_ttl_hours <= 0 {
                result.add_error(&field, "max_ttl_hours must be greater than 0");
            }

            if let Some(data_type) = DataType::ALL.iter().find(|t| overlaps(&class.prefix, t.prefix()))
            {
                result.add_error(
                    &field,
                    format!("Prefix collides with data type {}", data_type),
                );
            }

            let collides = self.long_lived[..i]
                .iter()
                .any(|other| !other.prefix.is_empty() && overlaps(&class.prefix, &other.prefix));
            if collides {
                result.add_error(&field, format!("Prefix {} collides with an earlier class", class.prefix));
            }
        }
    }

    /// Cache policy built from the TTL overrides and long-lived classes.
    ///
    /// Invalid entries are skipped; run `validate` first to report them.
    pub fn policy(&self) -> CachePolicy {
        let mut policy = CachePolicy::new();
        for (name, minutes) in &self.cache.ttl_minutes {
            if let Ok(data_type) = name.parse::<DataType>() {
                policy = policy.with_ttl(data_type, chrono::Duration::minutes(*minutes));
            }
        }

        policy.with_long_lived(
            self.long_lived
                .iter()
                .filter(|c| !c.prefix.is_empty() && c.max_ttl_hours > 0)
                .map(|c| LongLivedClass::new(c.prefix.clone(), chrono::Duration::hours(c.max_ttl_hours)))
                .collect(),
        )
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let too_large = |field: &str| ConfigError::Invalid(format!("{}: interval is too large", field));
        Ok(SchedulerConfig {
            shallow_interval: self
                .cleanup
                .shallow_interval()
                .ok_or_else(|| too_large("cleanup.shallow_interval_minutes"))?,
            deep_interval: self
                .cleanup
                .deep_interval()
                .ok_or_else(|| too_large("cleanup.deep_interval_hours"))?,
            daily_at: self.cleanup.daily_at_time()?,
            run_timeout: Duration::from_secs(self.cleanup.run_timeout_secs),
        })
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}

/// Zero, overflow and oversized intervals are errors. Returns the interval
/// when it is usable.
fn check_interval(
    result: &mut ValidationResult,
    field: &str,
    raw: u64,
    interval: Option<Duration>,
) -> Option<Duration> {
    match interval {
        _ if raw == 0 => result.add_error(field, "Interval must be greater than 0"),
        Some(interval) if interval <= MAX_INTERVAL => return Some(interval),
        _ => result.add_error(field, "Interval must not exceed 366 days"),
    }
    None
}

fn overlaps(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
