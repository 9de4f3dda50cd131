use anyhow::{Context, Result};
use lockclock_weather::error::WeatherError;
use lockclock_weather::location::{LocationFix, LocationSource};
use lockclock_weather::orchestrator::{
    OrchestratorSettings, UpdateOutcome, UpdateTrigger, WeatherOrchestrator,
};
use lockclock_weather::{
    HttpRetriever, LocationResolver, LockClockConfig, WeatherStore, create_provider,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stand-in for a device geolocation subsystem on hosts without one.
/// The orchestrator then relies on the pinned location or the cache.
struct NoDeviceLocation;

#[async_trait]
impl LocationSource for NoDeviceLocation {
    async fn last_known(&self) -> Result<Option<LocationFix>, WeatherError> {
        Ok(None)
    }

    async fn acquire(&self) -> Result<LocationFix, WeatherError> {
        Err(WeatherError::location_unavailable(
            "No geolocation subsystem on this host",
        ))
    }
}

fn init_tracing(config: &LockClockConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_summary(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Completed { weather, stale } => {
            let staleness = if *stale { " (cached)" } else { "" };
            println!("{}{}", weather.city, staleness);
            println!("  {} {}", weather.format_temperature(), weather.condition);
            println!("  low/high: {}", weather.format_low_high());
            println!("  humidity: {}", weather.format_humidity());
            println!("  wind:     {}", weather.format_wind());
            for day in &weather.forecasts {
                println!(
                    "  forecast: {} / {} {}",
                    if day.low.is_nan() { "–".to_string() } else { format!("{:.0}", day.low) },
                    if day.high.is_nan() { "–".to_string() } else { format!("{:.0}", day.high) },
                    day.condition.as_deref().unwrap_or("")
                );
            }
        }
        UpdateOutcome::Failed { reason } => println!("No weather data: {reason}"),
        UpdateOutcome::TimedOut => println!("Weather request timed out"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = LockClockConfig::load().with_context(|| "Failed to load configuration")?;
    init_tracing(&config);
    info!("lockclock-weather {}", lockclock_weather::VERSION);

    let store = Arc::new(
        WeatherStore::open(config.cache_dir()).with_context(|| "Failed to open weather cache")?,
    );
    let retriever = Arc::new(HttpRetriever::new(config.update.request_timeout())?);
    let provider = create_provider(&config, retriever)?;

    // Optional argument: pin a free-text location before refreshing.
    // This is an explicit user action, so a failed lookup must surface
    // instead of falling back to a stale id.
    if let Some(query) = std::env::args().nth(1) {
        let resolver = LocationResolver::new(Arc::clone(&provider), Arc::clone(&store));
        match resolver.resolve_free_text(&query, false).await? {
            Some(city_id) => {
                let candidates = provider.lookup_locations(&query).await.unwrap_or_default();
                let location = candidates
                    .into_iter()
                    .find(|c| c.city_id == city_id)
                    .unwrap_or_else(|| lockclock_weather::WeatherLocation {
                        city_id: city_id.clone(),
                        city: query.clone(),
                        postal: None,
                        country_id: String::new(),
                        country: String::new(),
                        state: None,
                    });
                info!("Pinning location {}", location.display_name());
                store.set_pinned_location(Some(location)).await?;
            }
            None => {
                warn!("Could not resolve '{}'", query);
                anyhow::bail!("Could not resolve '{query}' to a known place");
            }
        }
    }

    let settings = OrchestratorSettings::from_config(&config.update, config.provider.metric);
    let orchestrator = WeatherOrchestrator::start(
        provider,
        Arc::clone(&store),
        Arc::new(NoDeviceLocation),
        settings,
    );

    let mut outcomes = orchestrator.subscribe();
    orchestrator.request_refresh(UpdateTrigger::Manual).await?;

    outcomes
        .wait_for(Option::is_some)
        .await
        .with_context(|| "Orchestrator stopped before reporting an outcome")?;
    let outcome = outcomes.borrow().clone();
    if let Some(outcome) = outcome {
        print_summary(&outcome);
    }

    Ok(())
}
