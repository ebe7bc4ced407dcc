//! Inverter drivers.
//!
//! A brand driver exposes telemetry reads and a single steering action per
//! slot: the reserved-SOC discharge floor. The Modbus transport lives behind
//! [`modbus::RegisterBus`] so brand decoding stays unit-testable.

pub mod mock;
pub mod modbus;
pub mod srne;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{InverterBrand, InverterConfig};
use crate::domain::ScheduleSlot;

/// Instantaneous battery state.
#[derive(Debug, Clone, Serialize)]
pub struct BatteryState {
    pub soc_pct: f64,
    /// Derived from BMS voltage × current; positive means discharging.
    /// The voltage scaling is not pinned down yet, so treat this as an
    /// indicator and never feed it into accounting.
    pub power_w: f64,
    /// Raw BMS voltage register, exposed until its scaling is confirmed.
    pub bms_voltage_raw: u16,
    pub mode: &'static str,
}

/// Live power-flow metrics plus the daily counters.
#[derive(Debug, Clone, Serialize)]
pub struct InverterMetrics {
    pub soc_pct: f64,
    pub battery_w: f64,
    pub grid_import_w: f64,
    pub grid_export_w: f64,
    pub solar_w: f64,
    pub consumption_w: f64,
    pub totals: EnergyTotals,
}

/// Daily-cumulative counters, reset by the inverter at local midnight.
#[derive(Debug, Clone, Serialize)]
pub struct EnergyTotals {
    pub pv_kwh: f64,
    pub load_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
}

/// Outcome of an `apply_schedule` call.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub applied: u32,
    pub skipped: u32,
    pub target_soc: Option<u8>,
}

/// Outcome of a manual override.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideResult {
    pub soc_pct: f64,
    pub target_soc: u8,
}

#[async_trait]
pub trait InverterDriver: Send + Sync {
    async fn get_state(&self) -> Result<BatteryState>;

    async fn get_metrics(&self) -> Result<InverterMetrics>;

    async fn get_energy_totals(&self) -> Result<EnergyTotals>;

    /// Apply the schedule slot active at `now_ts` by writing the reserved-SOC
    /// floor once.
    async fn apply_schedule(&self, slots: &[ScheduleSlot], now_ts: &str) -> Result<ApplyResult>;

    async fn charge(&self) -> Result<OverrideResult>;

    async fn discharge(&self) -> Result<OverrideResult>;

    async fn idle(&self) -> Result<OverrideResult>;

    /// Cap grid import at `kw` via the peak-shaving register.
    async fn set_peak_shaving_target(&self, kw: f64) -> Result<()>;

    /// Restore the floor that allows normal discharge behavior.
    async fn reset_to_default(&self) -> Result<()>;
}

/// Build the configured brand driver.
pub fn driver_for(cfg: &InverterConfig) -> Result<Arc<dyn InverterDriver>> {
    Ok(match cfg.brand {
        InverterBrand::Srne => {
            let link = modbus::ModbusLink::new(
                cfg.host.clone(),
                cfg.port,
                cfg.unit_id,
                std::time::Duration::from_millis(cfg.timeout_ms),
            );
            Arc::new(srne::SrneInverter::new(Box::new(link), srne::SrneSettings::from(cfg)))
        }
        InverterBrand::Mock => Arc::new(mock::MockInverter::new(cfg.discharge_soc, cfg.charge_soc)),
    })
}
