use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skycast_cache::{
    CacheStore, CleanupScheduler, EventSink, MemoryStore, SqliteStore, Sweeper, SystemClock,
    TracingSink, WeatherCache,
};
use skycast_weather::{aggregate_daily_with_horizon, DailySummary, Reading};

use crate::config::CacheBackend;
use crate::{AppError, Config};

/// Main application state and lifecycle manager
pub struct App {
    config: Arc<Config>,
    cache: Arc<WeatherCache>,
    scheduler: CleanupScheduler,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Create a new application instance from the validated config file
    pub fn new() -> Result<Self> {
        let (config, _) = Config::load_validated()?;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Build the application, sending cache events to `events`
    pub fn with_sink(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let store = open_store(&config)?;
        let policy = Arc::new(config.policy());
        let clock = Arc::new(SystemClock);

        let cache = WeatherCache::new(store.clone(), policy.clone(), events.clone());
        let sweeper = Sweeper::new(store, policy, clock, events);
        let scheduler = CleanupScheduler::new(Arc::new(sweeper), config.scheduler_config()?);

        Ok(Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            scheduler,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Start the background cleanup tiers. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            tracing::warn!("Cleanup scheduler already running");
            return;
        }
        self.tasks = self.scheduler.spawn(self.shutdown.child_token());
        tracing::info!(
            backend = self.cache.store_backend().backend_name(),
            "Application started"
        );
    }

    /// Stop the cleanup tiers and wait for their loops to exit
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down application");
        self.shutdown.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Cleanup task ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    /// Reduce provider readings to daily summaries over the configured horizon
    pub fn aggregate_forecast(&self, readings: &[Reading]) -> Result<Vec<DailySummary>, AppError> {
        let days = self.config.aggregation.forecast_days;
        Ok(aggregate_daily_with_horizon(readings, Some(days))?)
    }

    /// Get reference to application config
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<WeatherCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    match config.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        CacheBackend::Sqlite => {
            let path = config.cache.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
            }
            let store = SqliteStore::new(&path)
                .with_context(|| format!("Failed to open cache database {}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}
