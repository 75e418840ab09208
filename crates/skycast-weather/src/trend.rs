//! Early-half versus late-half trend detection.

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::types::{DailySummary, Reading, TrendDirection, TrendMetric, TrendResult};

/// Minimum change in degrees before temperature counts as trending.
pub const TEMPERATURE_TREND_THRESHOLD: f64 = 2.0;
/// Minimum change in relative humidity percentage points.
pub const HUMIDITY_TREND_THRESHOLD: f64 = 5.0;
/// Minimum change in hPa.
pub const PRESSURE_TREND_THRESHOLD: f64 = 3.0;
/// Minimum change in mm of combined rain and snow.
pub const PRECIPITATION_TREND_THRESHOLD: f64 = 1.0;

impl TrendMetric {
    /// Threshold the half-average difference must exceed.
    pub fn threshold(&self) -> f64 {
        match self {
            Self::Temperature => TEMPERATURE_TREND_THRESHOLD,
            Self::Humidity => HUMIDITY_TREND_THRESHOLD,
            Self::Pressure => PRESSURE_TREND_THRESHOLD,
            Self::Precipitation => PRECIPITATION_TREND_THRESHOLD,
        }
    }
}

/// Anything a trend can be computed over.
pub trait TrendSample {
    /// Chronological position of the sample.
    type Key: Ord;

    fn order_key(&self) -> Self::Key;
    fn metric_value(&self, metric: TrendMetric) -> f64;
}

impl TrendSample for DailySummary {
    type Key = NaiveDate;

    fn order_key(&self) -> NaiveDate {
        self.date
    }

    fn metric_value(&self, metric: TrendMetric) -> f64 {
        match metric {
            TrendMetric::Temperature => self.temp_avg,
            TrendMetric::Humidity => self.humidity_avg,
            TrendMetric::Pressure => self.pressure_avg,
            TrendMetric::Precipitation => self.total_rain_volume + self.total_snow_volume,
        }
    }
}

impl TrendSample for Reading {
    type Key = DateTime<FixedOffset>;

    fn order_key(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    fn metric_value(&self, metric: TrendMetric) -> f64 {
        match metric {
            TrendMetric::Temperature => self.temperature,
            TrendMetric::Humidity => self.humidity,
            TrendMetric::Pressure => self.pressure,
            TrendMetric::Precipitation => self.precipitation(),
        }
    }
}

/// Compare the average of the first half of `series` with the second half.
///
/// The series is stably sorted by [`TrendSample::order_key`] first, so the
/// caller's ordering does not matter. Halves use integer division, so the middle element of an odd-length
/// series belongs to neither half. Fewer than two samples is always
/// [`TrendDirection::Stable`].
pub fn compute_trend<T: TrendSample>(series: &[T], metric: TrendMetric) -> TrendResult {
    let half = series.len() / 2;
    if half == 0 {
        return TrendResult {
            metric,
            direction: TrendDirection::Stable,
            first_half_avg: None,
            second_half_avg: None,
            change: 0.0,
        };
    }

    let mut sorted: Vec<&T> = series.iter().collect();
    sorted.sort_by_key(|s| s.order_key());

    let first = average(&sorted[..half], metric);
    let second = average(&sorted[sorted.len() - half..], metric);
    let change = second - first;
    let threshold = metric.threshold();

    let direction = if change > threshold {
        TrendDirection::Increasing
    } else if change < -threshold {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    TrendResult {
        metric,
        direction,
        first_half_avg: Some(first),
        second_half_avg: Some(second),
        change,
    }
}

fn average<T: TrendSample>(samples: &[&T], metric: TrendMetric) -> f64 {
    let sum: f64 = samples.iter().map(|s| s.metric_value(metric)).sum();
    sum / samples.len() as f64
}
