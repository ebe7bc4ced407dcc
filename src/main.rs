use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use solarctl::api;
use solarctl::config::Config;
use solarctl::forecast::WeatherClient;
use solarctl::inverter;
use solarctl::pipeline::Orchestrator;
use solarctl::prices;
use solarctl::store::Store;
use solarctl::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    // Configuration problems end the process with one readable line.
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {e:#}");
            std::process::exit(2);
        }
    };

    let store = Arc::new(Store::open(&cfg.storage.path)?);
    let driver = inverter::driver_for(&cfg.inverter)?;
    let weather = WeatherClient::new()?;
    let price_provider = prices::provider_for(cfg.price.source, cfg.location.tz())?;

    let orchestrator = Arc::new(Orchestrator::new(
        cfg.clone(),
        store.clone(),
        driver.clone(),
        weather,
        price_provider,
    ));
    tokio::spawn(orchestrator.run());

    let state = api::AppState { cfg: Arc::new(cfg.clone()), store, driver };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.dashboard.port));
    info!(%addr, timezone = %cfg.location.timezone, "starting solarctl");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
