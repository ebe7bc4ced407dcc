//! Pipeline orchestrator.
//!
//! One minute-aligned scheduler loop dispatches every periodic pipeline, so
//! within any tick the sub-pipelines run strictly sequentially and can never
//! overlap. The quarter-hour cluster is fused into a single handler:
//! snapshot → execute → replan, so the replan always sees the post-command
//! SOC. Every run lands in the pipeline ledger; no pipeline failure aborts
//! the process.

mod health;

pub use health::{health_report, HealthReport, PipelineHealth};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::config::Config;
use crate::domain::{ConsumptionSource, EnergySnapshot, PipelineStatus};
use crate::forecast::{ConsumptionEstimator, ForecastModel, Learner, Smoother, WeatherClient};
use crate::inverter::InverterDriver;
use crate::optimizer::Optimizer;
use crate::prices::{PriceIngestor, PriceProvider};
use crate::store::Store;

/// Pipeline names and their nominal interval in minutes, used by the health
/// endpoint's freshness check.
pub const PIPELINES: &[(&str, u64)] = &[
    ("fetch", 360),
    ("learn", 60),
    ("smooth", 1440),
    ("battery", 60),
    ("consumption", 60),
    ("snapshot", 15),
    ("execute", 15),
];

/// Whether a battery run may hit the price provider or only replans from
/// stored prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatteryMode {
    Full,
    ReplanOnly,
}

pub struct Orchestrator {
    cfg: Config,
    store: Arc<Store>,
    driver: Arc<dyn InverterDriver>,
    weather: WeatherClient,
    price_provider: Box<dyn PriceProvider>,
    /// Hour-keyed forecast temperatures from the last weather fetch, shared
    /// with the consumption estimator between fetches.
    forecast_temps: Mutex<HashMap<String, f64>>,
}

impl Orchestrator {
    pub fn new(
        cfg: Config,
        store: Arc<Store>,
        driver: Arc<dyn InverterDriver>,
        weather: WeatherClient,
        price_provider: Box<dyn PriceProvider>,
    ) -> Self {
        Self {
            cfg,
            store,
            driver,
            weather,
            price_provider,
            forecast_temps: Mutex::new(HashMap::new()),
        }
    }

    /// Run forever: startup sequence, then the minute-aligned dispatch loop.
    pub async fn run(self: Arc<Self>) {
        self.startup().await;
        loop {
            let secs = clock::seconds_to_next_minute(self.cfg.location.tz());
            sleep(Duration::from_secs(secs)).await;
            self.tick().await;
        }
    }

    /// Startup: the read/learn pipelines in cluster order, then one
    /// execute+replan unless the installation is collect-only.
    async fn startup(&self) {
        info!("running startup pipeline sequence");
        self.dispatch("fetch").await;
        self.dispatch("learn").await;
        self.dispatch("smooth").await;
        self.dispatch("consumption").await;
        self.dispatch("snapshot").await;
        if !self.cfg.inverter.data_collection_only {
            self.dispatch("execute").await;
            self.dispatch_battery(BatteryMode::Full).await;
        }
        info!("startup sequence complete");
    }

    /// One wall-clock minute. Dispatch order within a tick is fixed:
    /// fetch → learn → smooth, then the quarter cluster.
    async fn tick(&self) {
        let (hour, minute) = clock::local_hour_minute(self.cfg.location.tz());

        if minute == 0 {
            if hour % self.cfg.forecast.fetch_interval_hours == 0 {
                self.dispatch("fetch").await;
            }
            self.dispatch("learn").await;
            if hour == 2 {
                self.dispatch("smooth").await;
            }
        }

        if minute == 5 {
            self.dispatch("consumption").await;
        }

        if minute % 15 == 0 {
            self.quarter_cluster(hour, minute).await;
        }
    }

    /// snapshot → execute → replan, sequential. The replan becomes a full
    /// provider-fetching run on the half hour and at the day-ahead
    /// publication slot.
    async fn quarter_cluster(&self, hour: u32, minute: u32) {
        self.dispatch("snapshot").await;
        if self.cfg.inverter.data_collection_only {
            return;
        }
        self.dispatch("execute").await;

        let mode = if minute == 30 || (hour == self.cfg.price.day_ahead_hour && minute == 15) {
            BatteryMode::Full
        } else {
            BatteryMode::ReplanOnly
        };
        self.dispatch_battery(mode).await;
    }

    /// Run one pipeline by name, record the ledger, never propagate.
    async fn dispatch(&self, name: &'static str) {
        let result = match name {
            "fetch" => self.run_fetch().await,
            "learn" => self.run_learn().await,
            "smooth" => self.run_smooth().await,
            "consumption" => self.run_consumption().await,
            "snapshot" => self.run_snapshot().await,
            "execute" => self.run_execute().await,
            _ => Ok(()),
        };
        self.finish(name, result).await;
    }

    async fn dispatch_battery(&self, mode: BatteryMode) {
        let result = self.run_battery(mode).await;
        self.finish("battery", result).await;
    }

    /// Ledger bookkeeping shared by every pipeline; an execute failure
    /// additionally tries one reset so the inverter is not left on a stale
    /// floor.
    async fn finish(&self, name: &'static str, result: Result<()>) {
        let now = clock::now_local(self.cfg.location.tz());
        let status = match &result {
            Ok(()) => PipelineStatus::Ok,
            Err(e) => {
                error!(pipeline = name, "pipeline failed: {e:#}");
                if name == "execute" {
                    if let Err(reset_err) = self.driver.reset_to_default().await {
                        warn!("reset after execute failure also failed: {reset_err:#}");
                    }
                }
                PipelineStatus::Error
            }
        };
        if let Err(e) = self.store.record_pipeline_run(name, status, &now) {
            error!(pipeline = name, "failed to record pipeline run: {e:#}");
        }
        debug!(pipeline = name, status = status.as_str(), "pipeline finished");
    }

    // ----- the seven pipelines -----

    /// Fetch the irradiance forecast, seed/update the readings, run the model.
    async fn run_fetch(&self) -> Result<()> {
        let tz = self.cfg.location.tz();
        let (hours, raw) = self
            .weather
            .fetch_forecast(
                self.cfg.location.lat,
                self.cfg.location.lon,
                &self.cfg.location.timezone,
                self.cfg.forecast.horizon_hours,
            )
            .await?;
        self.archive_weather(&raw);

        let now = clock::now_local(tz);
        let current_hour = clock::hour_start(&now)?;
        let horizon_end =
            clock::shift_hours(&current_hour, self.cfg.forecast.horizon_hours as i64)?;

        let mut temps = HashMap::new();
        let mut upserted = 0usize;
        for hour in &hours {
            temps.insert(hour.hour_ts.clone(), hour.temperature_c);
            if hour.hour_ts < current_hour || hour.hour_ts >= horizon_end {
                continue;
            }
            self.store.upsert_irradiance(&hour.hour_ts, hour.irradiance)?;
            upserted += 1;
        }
        if let Ok(mut cache) = self.forecast_temps.lock() {
            *cache = temps;
        }
        info!(hours = upserted, "irradiance forecast updated");

        let model = ForecastModel::new(&self.store, &self.cfg.panel, &self.cfg.learning);
        model.run(&now)?;
        Ok(())
    }

    async fn run_learn(&self) -> Result<()> {
        let now = clock::now_local(self.cfg.location.tz());
        Learner::new(&self.store).run(&now)?;
        Ok(())
    }

    async fn run_smooth(&self) -> Result<()> {
        Smoother::new(&self.store).run()?;
        Ok(())
    }

    /// Prices (full mode) → consumption estimate → live SOC → optimize.
    async fn run_battery(&self, mode: BatteryMode) -> Result<()> {
        let tz = self.cfg.location.tz();
        let now = clock::now_local(tz);
        let today = clock::date_of(&now).to_string();

        if mode == BatteryMode::Full {
            let ingestor = PriceIngestor::new(
                self.price_provider.as_ref(),
                &self.store,
                &self.cfg.storage.archive_dir,
                &self.cfg.price.region,
            );
            ingestor.run(&today).await?;
        }

        let temps = self
            .forecast_temps
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default();
        let estimator = ConsumptionEstimator::new(&self.store, &self.cfg.consumption);
        let tomorrow = clock::shift_date(&today, 1)?;
        let mut consumption = estimator.estimate_for_day(&today, &temps)?;
        consumption.extend(estimator.estimate_for_day(&tomorrow, &temps)?);

        let start_soc = match self.driver.get_state().await {
            Ok(state) => Some(state.soc_pct),
            Err(e) => {
                warn!("no live SOC for replan, seeding at floor: {e:#}");
                None
            }
        };

        let from = clock::slot_start(&now)?;
        let to = clock::shift_hours(&from, 24)?;
        let optimizer = Optimizer::new(
            &self.store,
            &self.cfg.battery,
            &self.cfg.grid,
            self.cfg.consumption.flat_watts,
        );
        optimizer.run(&from, &to, &consumption, start_soc)?;
        Ok(())
    }

    /// Close the last hour: consumption and PV deltas from the snapshots,
    /// with the live metrics as a fallback.
    async fn run_consumption(&self) -> Result<()> {
        let tz = self.cfg.location.tz();
        let now = clock::now_local(tz);
        let hour_end = clock::hour_start(&now)?;
        let hour_start = clock::shift_hours(&hour_end, -1)?;

        let temperature = match self
            .weather
            .fetch_current_temperature(self.cfg.location.lat, self.cfg.location.lon)
            .await
        {
            Ok(t) => Some(t),
            Err(e) => {
                debug!("no current temperature: {e:#}");
                None
            }
        };

        let end_snap = self.store.get_snapshot_at_or_before(&hour_end)?;
        let start_snap = self.store.get_snapshot_at_or_before(&hour_start)?;

        match (start_snap, end_snap) {
            (Some(start), Some(end)) if start.ts >= hour_start && end.ts >= hour_end => {
                let load_kwh = counter_delta(start.load_kwh, end.load_kwh);
                let pv_kwh = counter_delta(start.pv_kwh, end.pv_kwh);
                self.store.upsert_consumption(
                    &hour_start,
                    load_kwh * 1000.0,
                    temperature,
                    ConsumptionSource::InverterDelta,
                )?;
                self.store.update_actual(&hour_start, pv_kwh)?;
                info!(hour = %hour_start, load_kwh, pv_kwh, "hourly energy closed from snapshots");
            }
            _ => {
                let metrics = self
                    .driver
                    .get_metrics()
                    .await
                    .context("snapshots missing and live metrics unavailable")?;
                self.store.upsert_consumption(
                    &hour_start,
                    metrics.consumption_w,
                    temperature,
                    ConsumptionSource::InverterInstant,
                )?;
                info!(hour = %hour_start, watts = metrics.consumption_w, "hourly consumption from instantaneous metrics");
            }
        }
        Ok(())
    }

    async fn run_snapshot(&self) -> Result<()> {
        let totals = self.driver.get_energy_totals().await?;
        let now = clock::now_local(self.cfg.location.tz());
        let ts = clock::slot_start(&now)?;
        self.store.upsert_energy_snapshot(&EnergySnapshot {
            ts,
            pv_kwh: totals.pv_kwh,
            load_kwh: totals.load_kwh,
            grid_import_kwh: totals.grid_import_kwh,
            grid_export_kwh: totals.grid_export_kwh,
        })?;
        Ok(())
    }

    /// Apply the active slot. The window is the coming day; anything already
    /// in the past stays untouched.
    async fn run_execute(&self) -> Result<()> {
        let now = clock::now_local(self.cfg.location.tz());
        let from = clock::slot_start(&now)?;
        let to = clock::shift_hours(&from, 24)?;
        let slots = self.store.get_schedule_for_range(&from, &to)?;
        if slots.is_empty() {
            info!("no schedule to execute yet");
            return Ok(());
        }
        let result = self.driver.apply_schedule(&slots, &now).await?;
        info!(
            applied = result.applied,
            skipped = result.skipped,
            target_soc = ?result.target_soc,
            "schedule applied"
        );
        Ok(())
    }

    fn archive_weather(&self, raw: &str) {
        let dir = self.cfg.storage.archive_dir.join("weather");
        let now = clock::now_local(self.cfg.location.tz());
        let name = format!("{}.json", now.replace(':', "-"));
        let path = dir.join(name);
        let result = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, raw));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to archive weather payload");
        }
    }
}

/// Delta of a daily-cumulative counter across one hour; a decrease means the
/// midnight reset happened inside the hour and the later value is the delta.
fn counter_delta(start: f64, end: f64) -> f64 {
    if end >= start {
        end - start
    } else {
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_delta_handles_midnight_reset() {
        assert_eq!(counter_delta(4.0, 6.5), 2.5);
        assert_eq!(counter_delta(12.4, 0.3), 0.3);
        assert_eq!(counter_delta(0.0, 0.0), 0.0);
    }
}
