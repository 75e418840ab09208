use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize core
    skycast_core::init()?;

    // Create and start application
    let mut app = skycast_core::App::new()?;
    app.start();

    println!("Skycast - weather cache service");
    println!("\nConfiguration:");
    println!("  Config file: {}", skycast_core::Config::config_path()?.display());
    println!("  Backend: {:?}", app.config().cache.backend);
    println!("  Forecast days: {}", app.config().aggregation.forecast_days);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    let stats = app.cache().stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate,
        "Cache usage since last daily reset"
    );

    // Graceful shutdown
    app.shutdown().await?;

    Ok(())
}
