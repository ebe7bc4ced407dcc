//! Hardware-free driver for commissioning and data-collection setups.
//! Reads return a fixed plausible state; writes only log.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use super::{ApplyResult, BatteryState, EnergyTotals, InverterDriver, InverterMetrics, OverrideResult};
use crate::domain::ScheduleSlot;

pub struct MockInverter {
    discharge_soc: u8,
    charge_soc: u8,
    soc_pct: Mutex<f64>,
}

impl MockInverter {
    pub fn new(discharge_soc: u8, charge_soc: u8) -> Self {
        Self { discharge_soc, charge_soc, soc_pct: Mutex::new(50.0) }
    }

    fn soc(&self) -> f64 {
        self.soc_pct.lock().map(|s| *s).unwrap_or(50.0)
    }
}

#[async_trait]
impl InverterDriver for MockInverter {
    async fn get_state(&self) -> Result<BatteryState> {
        Ok(BatteryState {
            soc_pct: self.soc(),
            power_w: 0.0,
            bms_voltage_raw: 520,
            mode: "normal",
        })
    }

    async fn get_metrics(&self) -> Result<InverterMetrics> {
        Ok(InverterMetrics {
            soc_pct: self.soc(),
            battery_w: 0.0,
            grid_import_w: 0.0,
            grid_export_w: 0.0,
            solar_w: 0.0,
            consumption_w: 0.0,
            totals: self.get_energy_totals().await?,
        })
    }

    async fn get_energy_totals(&self) -> Result<EnergyTotals> {
        Ok(EnergyTotals {
            pv_kwh: 0.0,
            load_kwh: 0.0,
            grid_import_kwh: 0.0,
            grid_export_kwh: 0.0,
        })
    }

    async fn apply_schedule(&self, slots: &[ScheduleSlot], now_ts: &str) -> Result<ApplyResult> {
        let Some(slot) = ScheduleSlot::current(slots, now_ts) else {
            return Ok(ApplyResult { applied: 0, skipped: 1, target_soc: None });
        };
        info!(slot_ts = %slot.slot_ts, action = slot.action.as_str(), "mock inverter: slot noted");
        Ok(ApplyResult { applied: 1, skipped: 0, target_soc: None })
    }

    async fn charge(&self) -> Result<OverrideResult> {
        info!("mock inverter: charge override");
        Ok(OverrideResult { soc_pct: self.soc(), target_soc: self.charge_soc })
    }

    async fn discharge(&self) -> Result<OverrideResult> {
        info!("mock inverter: discharge override");
        Ok(OverrideResult { soc_pct: self.soc(), target_soc: self.discharge_soc })
    }

    async fn idle(&self) -> Result<OverrideResult> {
        info!("mock inverter: idle override");
        Ok(OverrideResult { soc_pct: self.soc(), target_soc: self.soc().round() as u8 })
    }

    async fn set_peak_shaving_target(&self, kw: f64) -> Result<()> {
        info!(kw, "mock inverter: peak shaving target noted");
        Ok(())
    }

    async fn reset_to_default(&self) -> Result<()> {
        info!("mock inverter: reset to default");
        Ok(())
    }
}
