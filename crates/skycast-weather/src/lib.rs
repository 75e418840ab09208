//! Weather aggregation for Skycast
//!
//! Reduces fine-grained provider readings into daily summaries, trend
//! directions, and temperature/precipitation statistics.

pub mod aggregate;
pub mod stats;
pub mod trend;
pub mod types;

pub use aggregate::{aggregate_daily, aggregate_daily_with_horizon, dominant_condition};
pub use stats::{precipitation_stats, temperature_stats, PrecipitationStats, TemperatureStats};
pub use trend::{compute_trend, TrendSample};
pub use types::*;
