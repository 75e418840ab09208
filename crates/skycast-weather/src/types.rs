use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// A single fine-grained (sub-daily) observation or forecast step.
///
/// `timestamp` carries the provider's local offset so that grouping by
/// calendar date follows the location's own day boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<FixedOffset>,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub visibility: f64,
    pub cloudiness: f64,
    /// Condition group, e.g. "Clear", "Clouds", "Rain"
    pub condition_main: String,
    pub condition_description: String,
    #[serde(default)]
    pub condition_icon: String,
    /// Probability of precipitation, 0-100
    pub precipitation_probability: f64,
    #[serde(default)]
    pub rain_volume: Option<f64>,
    #[serde(default)]
    pub snow_volume: Option<f64>,
}

impl Reading {
    /// Local calendar date of this reading.
    pub fn local_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Rain volume, absent treated as zero.
    pub fn rain(&self) -> f64 {
        self.rain_volume.unwrap_or(0.0)
    }

    /// Snow volume, absent treated as zero.
    pub fn snow(&self) -> f64 {
        self.snow_volume.unwrap_or(0.0)
    }

    /// Combined rain and snow volume.
    pub fn precipitation(&self) -> f64 {
        self.rain() + self.snow()
    }
}

/// One calendar day reduced from a group of readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub temp_min: f64,
    pub temp_max: f64,
    pub temp_avg: f64,
    pub humidity_avg: f64,
    pub pressure_avg: f64,
    pub wind_speed_avg: f64,
    pub dominant_condition: String,
    pub representative_description: String,
    pub representative_icon: String,
    pub max_precipitation_probability: f64,
    pub total_rain_volume: f64,
    pub total_snow_volume: f64,
    /// Number of readings that contributed to this day
    pub reading_count: usize,
}

/// Direction of change between the early and late halves of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Metric a trend can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    Temperature,
    Humidity,
    Pressure,
    /// Rain plus snow volume
    Precipitation,
}

impl TrendMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Precipitation => "precipitation",
        }
    }
}

/// Result of comparing the first and second halves of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub metric: TrendMetric,
    pub direction: TrendDirection,
    /// `None` when the series has fewer than two samples
    pub first_half_avg: Option<f64>,
    pub second_half_avg: Option<f64>,
    /// `second_half_avg - first_half_avg`, zero for degenerate series
    pub change: f64,
}

/// Aggregation input errors. Fatal to the single call that produced them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("Non-finite {field} in reading at {timestamp}")]
    NonFinite {
        field: &'static str,
        timestamp: DateTime<FixedOffset>,
    },
    #[error("Negative {field} in reading at {timestamp}")]
    NegativeVolume {
        field: &'static str,
        timestamp: DateTime<FixedOffset>,
    },
    #[error("Precipitation probability {value} out of range 0-100 at {timestamp}")]
    ProbabilityOutOfRange {
        value: f64,
        timestamp: DateTime<FixedOffset>,
    },
}
