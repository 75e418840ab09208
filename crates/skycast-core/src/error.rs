//! Centralized error types for Skycast.
//!
//! Library crates keep their own narrow error enums; this module gathers them
//! into one hierarchy for the application layer, each with a short message
//! suitable for showing to an operator.

use skycast_cache::StoreError;
use skycast_weather::AggregationError;
use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a display-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache store error: {0}")]
    Cache(#[from] StoreError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message, actionable and non-technical.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.user_message(),
            AppError::Cache(e) => store_user_message(e),
            AppError::Aggregation(e) => aggregation_user_message(e),
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Errors loading, validating or saving `config.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No platform config directory")]
    NoConfigDir,

    #[error("Config file IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid TOML: {0}")]
    ParseError(String),

    #[error("Config could not be serialized: {0}")]
    Serialize(String),

    #[error("Config validation failed: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NoConfigDir => "No configuration directory was found on this system.",
            ConfigError::Io(_) => "The configuration file could not be read or written.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::Serialize(_) => "The configuration could not be saved.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
        }
    }
}

fn store_user_message(error: &StoreError) -> &'static str {
    match error {
        StoreError::Unavailable(_) => "The weather cache is unavailable. Fresh data will be fetched.",
        StoreError::Malformed { .. } => "A cached entry was unreadable and has been discarded.",
        StoreError::InvalidTtl(_) => "A cache lifetime setting is invalid. Check your settings.",
        StoreError::Serialization(_) => "Weather data could not be cached.",
    }
}

fn aggregation_user_message(error: &AggregationError) -> &'static str {
    match error {
        AggregationError::NonFinite { .. } => "The forecast contained invalid numbers.",
        AggregationError::NegativeVolume { .. } => "The forecast reported negative precipitation.",
        AggregationError::ProbabilityOutOfRange { .. } => {
            "The forecast reported an impossible precipitation chance."
        }
    }
}
