//! Group-then-reduce aggregation of fine-grained readings into daily summaries.
//!
//! Input does not need to be sorted: readings are stably sorted by timestamp
//! before grouping, so every "first in the group" rule below means first in
//! timestamp order.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::types::{AggregationError, DailySummary, Reading};

/// Aggregate readings into one summary per local calendar date, ascending.
///
/// Empty input yields an empty result.
pub fn aggregate_daily(readings: &[Reading]) -> Result<Vec<DailySummary>, AggregationError> {
    aggregate_daily_with_horizon(readings, None)
}

/// Like [`aggregate_daily`], keeping only the first `horizon` days.
///
/// Truncation happens after sorting by date, so out-of-order input never
/// drops a day that belongs inside the horizon.
pub fn aggregate_daily_with_horizon(
    readings: &[Reading],
    horizon: Option<usize>,
) -> Result<Vec<DailySummary>, AggregationError> {
    if readings.is_empty() {
        return Ok(Vec::new());
    }

    for reading in readings {
        validate(reading)?;
    }

    let sorted = sort_by_timestamp(readings);

    // Insertion order within each group is timestamp order.
    let mut groups: BTreeMap<NaiveDate, Vec<&Reading>> = BTreeMap::new();
    for reading in sorted {
        groups.entry(reading.local_date()).or_default().push(reading);
    }

    let mut summaries: Vec<DailySummary> = groups
        .into_iter()
        .filter_map(|(date, group)| reduce_day(date, &group))
        .collect();
    summaries.sort_by_key(|s| s.date);

    if let Some(days) = horizon {
        summaries.truncate(days);
    }

    tracing::debug!(
        readings = readings.len(),
        days = summaries.len(),
        "Aggregated readings into daily summaries"
    );

    Ok(summaries)
}

/// Stable sort by timestamp; readings with equal instants keep input order.
pub(crate) fn sort_by_timestamp(readings: &[Reading]) -> Vec<&Reading> {
    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);
    sorted
}

/// Condition with the highest count. Ties go to the value that reached the
/// winning count first while scanning in order.
pub fn dominant_condition<'a, I>(conditions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut best: Option<(&str, usize)> = None;

    for condition in conditions {
        let count = counts.entry(condition).or_insert(0);
        *count += 1;
        // Strictly greater: a later value only wins by overtaking.
        if best.map_or(true, |(_, best_count)| *count > best_count) {
            best = Some((condition, *count));
        }
    }

    best.map(|(condition, _)| condition)
}

fn reduce_day(date: NaiveDate, group: &[&Reading]) -> Option<DailySummary> {
    let first = group.first()?;
    let n = group.len() as f64;

    let mut temp_min = f64::INFINITY;
    let mut temp_max = f64::NEG_INFINITY;
    let mut temp_sum = 0.0;
    let mut humidity_sum = 0.0;
    let mut pressure_sum = 0.0;
    let mut wind_sum = 0.0;
    let mut max_pop: f64 = 0.0;
    let mut rain = 0.0;
    let mut snow = 0.0;

    for r in group {
        temp_min = temp_min.min(r.temperature);
        temp_max = temp_max.max(r.temperature);
        temp_sum += r.temperature;
        humidity_sum += r.humidity;
        pressure_sum += r.pressure;
        wind_sum += r.wind_speed;
        max_pop = max_pop.max(r.precipitation_probability);
        rain += r.rain();
        snow += r.snow();
    }

    let dominant = dominant_condition(group.iter().map(|r| r.condition_main.as_str()))
        .unwrap_or(first.condition_main.as_str())
        .to_string();
    let representative = group
        .iter()
        .find(|r| r.condition_main == dominant)
        .unwrap_or(first);

    Some(DailySummary {
        date,
        temp_min,
        temp_max,
        // Float rounding may push the mean a hair outside [min, max].
        temp_avg: (temp_sum / n).clamp(temp_min, temp_max),
        humidity_avg: humidity_sum / n,
        pressure_avg: pressure_sum / n,
        wind_speed_avg: wind_sum / n,
        dominant_condition: dominant,
        representative_description: representative.condition_description.clone(),
        representative_icon: representative.condition_icon.clone(),
        max_precipitation_probability: max_pop,
        total_rain_volume: rain,
        total_snow_volume: snow,
        reading_count: group.len(),
    })
}

pub(crate) fn validate(r: &Reading) -> Result<(), AggregationError> {
    let fields = [
        ("temperature", r.temperature),
        ("feels_like", r.feels_like),
        ("humidity", r.humidity),
        ("pressure", r.pressure),
        ("wind_speed", r.wind_speed),
        ("precipitation_probability", r.precipitation_probability),
    ];
    for (field, value) in fields {
        if !value.is_finite() {
            return Err(AggregationError::NonFinite {
                field,
                timestamp: r.timestamp,
            });
        }
    }

    for (field, volume) in [("rain_volume", r.rain_volume), ("snow_volume", r.snow_volume)] {
        match volume {
            Some(v) if !v.is_finite() => {
                return Err(AggregationError::NonFinite {
                    field,
                    timestamp: r.timestamp,
                })
            }
            Some(v) if v < 0.0 => {
                return Err(AggregationError::NegativeVolume {
                    field,
                    timestamp: r.timestamp,
                })
            }
            _ => {}
        }
    }

    if !(0.0..=100.0).contains(&r.precipitation_probability) {
        return Err(AggregationError::ProbabilityOutOfRange {
            value: r.precipitation_probability,
            timestamp: r.timestamp,
        });
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::DateTime;

    pub(crate) fn reading(ts: &str, temp: f64, condition: &str) -> Reading {
        Reading {
            timestamp: DateTime::parse_from_rfc3339(ts).unwrap(),
            temperature: temp,
            feels_like: temp - 1.0,
            humidity: 60.0,
            pressure: 1013.0,
            wind_speed: 4.0,
            wind_direction: 90.0,
            visibility: 10000.0,
            cloudiness: 40.0,
            condition_main: condition.to_string(),
            condition_description: format!("{} description", condition.to_lowercase()),
            condition_icon: format!("{}-icon", condition.to_lowercase()),
            precipitation_probability: 0.0,
            rain_volume: None,
            snow_volume: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_single_day_summary() {
        let readings = vec![
            reading("2025-01-01T00:00:00Z", 5.0, "Clear"),
            reading("2025-01-01T03:00:00Z", 8.0, "Clouds"),
            reading("2025-01-01T06:00:00Z", 3.0, "Clouds"),
            reading("2025-01-01T09:00:00Z", 10.0, "Clouds"),
        ];

        let days = aggregate_daily(&readings).unwrap();
        assert_eq!(days.len(), 1);
        let day = &days[0];
        assert_eq!(day.date, date(2025, 1, 1));
        assert_eq!(day.temp_min, 3.0);
        assert_eq!(day.temp_max, 10.0);
        assert!((day.temp_avg - 6.5).abs() < 1e-9);
        assert_eq!(day.dominant_condition, "Clouds");
        assert_eq!(day.representative_description, "clouds description");
        assert_eq!(day.representative_icon, "clouds-icon");
        assert_eq!(day.reading_count, 4);
    }

    #[test]
    fn test_tie_break_earliest_wins() {
        let readings = vec![
            reading("2025-01-01T00:00:00Z", 5.0, "Rain"),
            reading("2025-01-01T03:00:00Z", 5.0, "Rain"),
            reading("2025-01-01T06:00:00Z", 5.0, "Clear"),
            reading("2025-01-01T09:00:00Z", 5.0, "Clear"),
        ];
        let days = aggregate_daily(&readings).unwrap();
        assert_eq!(days[0].dominant_condition, "Rain");
    }

    #[test]
    fn test_tie_break_is_independent_of_input_order() {
        let readings = vec![
            reading("2025-01-01T09:00:00Z", 5.0, "Clear"),
            reading("2025-01-01T06:00:00Z", 5.0, "Clear"),
            reading("2025-01-01T03:00:00Z", 5.0, "Rain"),
            reading("2025-01-01T00:00:00Z", 5.0, "Rain"),
        ];
        let days = aggregate_daily(&readings).unwrap();
        assert_eq!(days[0].dominant_condition, "Rain");
        assert_eq!(days[0].representative_description, "rain description");
    }

    #[test]
    fn test_dominant_condition_overtaking() {
        assert_eq!(
            dominant_condition(["Clear", "Rain", "Rain"]),
            Some("Rain")
        );
        assert_eq!(dominant_condition(["Snow"]), Some("Snow"));
        assert_eq!(dominant_condition(std::iter::empty()), None);
    }

    #[test]
    fn test_empty_input_is_empty_result() {
        assert!(aggregate_daily(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_groups_by_local_date_and_sorts() {
        let readings = vec![
            reading("2025-01-03T12:00:00+02:00", 1.0, "Snow"),
            reading("2025-01-01T12:00:00+02:00", 2.0, "Clear"),
            // 23:00 local on Jan 1st although Jan 2nd in UTC
            reading("2025-01-01T23:00:00-05:00", 4.0, "Clear"),
            reading("2025-01-02T12:00:00+02:00", 3.0, "Rain"),
        ];
        let days = aggregate_daily(&readings).unwrap();
        let dates: Vec<_> = days.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date(2025, 1, 1), date(2025, 1, 2), date(2025, 1, 3)]);
        assert_eq!(days[0].reading_count, 2);
    }

    #[test]
    fn test_horizon_truncates_after_sorting() {
        let readings = vec![
            reading("2025-01-05T12:00:00Z", 1.0, "Clear"),
            reading("2025-01-04T12:00:00Z", 1.0, "Clear"),
            reading("2025-01-01T12:00:00Z", 1.0, "Clear"),
            reading("2025-01-02T12:00:00Z", 1.0, "Clear"),
        ];
        let days = aggregate_daily_with_horizon(&readings, Some(2)).unwrap();
        let dates: Vec<_> = days.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date(2025, 1, 1), date(2025, 1, 2)]);
    }

    #[test]
    fn test_precipitation_totals_treat_absent_as_zero() {
        let mut a = reading("2025-01-01T00:00:00Z", 1.0, "Rain");
        a.rain_volume = Some(1.25);
        a.precipitation_probability = 40.0;
        let mut b = reading("2025-01-01T03:00:00Z", 1.0, "Rain");
        b.precipitation_probability = 90.0;
        let mut c = reading("2025-01-01T06:00:00Z", 1.0, "Snow");
        c.rain_volume = Some(0.75);
        c.snow_volume = Some(2.0);

        let days = aggregate_daily(&[a, b, c]).unwrap();
        assert_eq!(days[0].total_rain_volume, 2.0);
        assert_eq!(days[0].total_snow_volume, 2.0);
        assert_eq!(days[0].max_precipitation_probability, 90.0);
    }

    #[test]
    fn test_temp_avg_within_bounds() {
        let readings = vec![
            reading("2025-01-01T00:00:00Z", 0.1, "Clear"),
            reading("2025-01-01T03:00:00Z", 0.1, "Clear"),
            reading("2025-01-01T06:00:00Z", 0.1, "Clear"),
        ];
        let day = &aggregate_daily(&readings).unwrap()[0];
        assert!(day.temp_min <= day.temp_avg && day.temp_avg <= day.temp_max);
    }

    #[test]
    fn test_non_finite_temperature_is_rejected() {
        let readings = vec![reading("2025-01-01T00:00:00Z", f64::NAN, "Clear")];
        let err = aggregate_daily(&readings).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::NonFinite { field: "temperature", .. }
        ));
    }

    #[test]
    fn test_negative_volume_is_rejected() {
        let mut r = reading("2025-01-01T00:00:00Z", 1.0, "Rain");
        r.rain_volume = Some(-0.1);
        assert!(matches!(
            aggregate_daily(&[r]),
            Err(AggregationError::NegativeVolume { field: "rain_volume", .. })
        ));
    }

    #[test]
    fn test_probability_out_of_range_is_rejected() {
        let mut r = reading("2025-01-01T00:00:00Z", 1.0, "Rain");
        r.precipitation_probability = 120.0;
        assert!(matches!(
            aggregate_daily(&[r]),
            Err(AggregationError::ProbabilityOutOfRange { .. })
        ));
    }
}
