//! Greedy solar-aware battery optimizer.
//!
//! `greedy` holds the pure planning pass; `Optimizer` wires it to the store:
//! read prices and forecasts, plan, then replace the schedule range in one
//! transaction.

pub mod greedy;

use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::info;

use crate::clock;
use crate::config::{BatteryConfig, GridConfig};
use crate::forecast::consumption::HourlyEstimate;
use crate::store::Store;

pub use greedy::{Plan, PlanInputs, PlanSummary};

pub struct Optimizer<'a> {
    store: &'a Store,
    battery: &'a BatteryConfig,
    grid: &'a GridConfig,
    flat_watts: f64,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        store: &'a Store,
        battery: &'a BatteryConfig,
        grid: &'a GridConfig,
        flat_watts: f64,
    ) -> Self {
        Self { store, battery, grid, flat_watts }
    }

    /// Plan `[from, to)` and persist the result. `start_soc_pct` seeds the
    /// forward pass with the live battery state when the driver could supply
    /// one.
    pub fn run(
        &self,
        from: &str,
        to: &str,
        consumption: &[HourlyEstimate],
        start_soc_pct: Option<f64>,
    ) -> Result<Plan> {
        let prices = self.store.get_prices_for_range(from, to)?;
        if prices.is_empty() {
            bail!("no prices stored for {from}..{to}, cannot plan");
        }

        let mut solar_kwh_by_hour = HashMap::new();
        for reading in self.store.get_readings_for_range(from, to)? {
            if let Some(kwh) = reading.forecast_kwh {
                solar_kwh_by_hour.insert(reading.hour_ts.clone(), kwh);
            }
        }

        let consumption_w_by_hour: HashMap<String, f64> = consumption
            .iter()
            .map(|e| (clock::hour_start(&e.hour_ts).unwrap_or_else(|_| e.hour_ts.clone()), e.watts))
            .collect();

        let inputs = PlanInputs {
            prices,
            solar_kwh_by_hour,
            consumption_w_by_hour,
            start_soc_pct,
        };
        let plan = greedy::plan(self.battery, self.grid, self.flat_watts, &inputs)?;

        self.store.replace_schedule_range(from, to, &plan.slots)?;
        info!(
            from,
            to,
            slots = plan.slots.len(),
            pairs = plan.summary.pairs,
            savings = plan.summary.savings,
            "schedule planned"
        );
        Ok(plan)
    }
}
