//! Summary statistics over raw readings.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::aggregate::validate;
use crate::types::{AggregationError, Reading};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub range: f64,
    pub mean_feels_like: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationStats {
    pub total_rain: f64,
    pub total_snow: f64,
    pub max_probability: f64,
    /// Readings with any rain or snow volume
    pub wet_readings: usize,
    /// Timestamp of the reading with the largest combined volume, if any was wet
    pub wettest_at: Option<DateTime<FixedOffset>>,
}

/// Temperature statistics, `None` for empty input.
///
/// Readings are checked the same way [`crate::aggregate_daily`] checks them.
pub fn temperature_stats(
    readings: &[Reading],
) -> Result<Option<TemperatureStats>, AggregationError> {
    if readings.is_empty() {
        return Ok(None);
    }
    for reading in readings {
        validate(reading)?;
    }

    let n = readings.len() as f64;
    let min = readings.iter().map(|r| r.temperature).fold(f64::INFINITY, f64::min);
    let max = readings
        .iter()
        .map(|r| r.temperature)
        .fold(f64::NEG_INFINITY, f64::max);
    let mean = readings.iter().map(|r| r.temperature).sum::<f64>() / n;
    let mean_feels_like = readings.iter().map(|r| r.feels_like).sum::<f64>() / n;

    Ok(Some(TemperatureStats {
        min,
        max,
        mean: mean.clamp(min, max),
        range: max - min,
        mean_feels_like,
    }))
}

/// Precipitation statistics, `None` for empty input.
pub fn precipitation_stats(
    readings: &[Reading],
) -> Result<Option<PrecipitationStats>, AggregationError> {
    if readings.is_empty() {
        return Ok(None);
    }
    for reading in readings {
        validate(reading)?;
    }

    let mut stats = PrecipitationStats {
        total_rain: 0.0,
        total_snow: 0.0,
        max_probability: 0.0,
        wet_readings: 0,
        wettest_at: None,
    };
    let mut wettest = 0.0;

    // Sorted so the earliest reading wins a tie for wettest.
    for r in crate::aggregate::sort_by_timestamp(readings) {
        stats.total_rain += r.rain();
        stats.total_snow += r.snow();
        stats.max_probability = stats.max_probability.max(r.precipitation_probability);

        let volume = r.precipitation();
        if volume > 0.0 {
            stats.wet_readings += 1;
            if volume > wettest {
                wettest = volume;
                stats.wettest_at = Some(r.timestamp);
            }
        }
    }

    Ok(Some(stats))
}
