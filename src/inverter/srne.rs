//! SRNE-family hybrid inverter driver.
//!
//! The inverter stays in serve-load-first mode permanently; the only knob the
//! controller turns is the reserved-SOC discharge floor. A high floor forbids
//! discharge (the battery fills from surplus), a low floor permits it, and
//! writing the current SOC holds the charge level where it is.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::modbus::{i16_from, u32_be, RegisterBus};
use super::{ApplyResult, BatteryState, EnergyTotals, InverterDriver, InverterMetrics, OverrideResult};
use crate::config::InverterConfig;
use crate::domain::{ScheduleSlot, SlotAction};

// Holding registers.
const REG_SOC_FLOOR: u16 = 3310;
const REG_GRID_IMPORT_CAP: u16 = 800;

// Input registers.
const REG_STATUS: u16 = 0;
const REG_PV_POWER: u16 = 1; // u32 pair, 0.1 W
const REG_GRID_IMPORT_POWER: u16 = 3021; // u32 pair, 0.1 W
const REG_BMS_BLOCK: u16 = 3169; // voltage, current (i16, 0.1 A), SOC
const REG_DAILY_BLOCK: u16 = 3045; // 40 registers of daily counters

// Offsets inside the daily block. Energies are u32 pairs in 0.1 kWh.
const DAILY_LOAD_W: usize = 0; // u32 pair, 0.1 W
const DAILY_GRID_IMPORT_KWH: usize = 22;
const DAILY_GRID_EXPORT_KWH: usize = 26;
const DAILY_LOAD_KWH: usize = 30;
const DAILY_PV_KWH: usize = 38;

/// Hardware-mandated floor range for register 3310.
const FLOOR_MIN: u8 = 13;
const FLOOR_MAX: u8 = 100;

#[derive(Debug, Clone)]
pub struct SrneSettings {
    pub charge_soc: u8,
    pub discharge_soc: u8,
    pub dry_run: bool,
}

impl From<&InverterConfig> for SrneSettings {
    fn from(cfg: &InverterConfig) -> Self {
        Self {
            charge_soc: cfg.charge_soc,
            discharge_soc: cfg.discharge_soc,
            dry_run: cfg.dry_run,
        }
    }
}

/// What the active slot wants from the battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Charge,
    Discharge,
    Idle,
}

impl From<SlotAction> for Intent {
    fn from(action: SlotAction) -> Self {
        match action {
            SlotAction::ChargeGrid | SlotAction::ChargeSolar => Intent::Charge,
            SlotAction::Discharge | SlotAction::Sell => Intent::Discharge,
            SlotAction::Idle => Intent::Idle,
        }
    }
}

pub struct SrneInverter {
    bus: Box<dyn RegisterBus>,
    settings: SrneSettings,
}

impl SrneInverter {
    pub fn new(bus: Box<dyn RegisterBus>, settings: SrneSettings) -> Self {
        Self { bus, settings }
    }

    async fn read_soc(&self) -> Result<f64> {
        let bms = self
            .bus
            .read_input(REG_BMS_BLOCK, 3)
            .await
            .context("failed to read BMS block")?;
        Ok(*bms.get(2).context("short BMS block")? as f64)
    }

    /// Clamp and write the reserved-SOC floor; in dry-run mode only log.
    async fn write_floor(&self, target: u8, reason: &str) -> Result<u8> {
        let target = target.clamp(FLOOR_MIN, FLOOR_MAX);
        if self.settings.dry_run {
            info!(target, reason, "dry-run: would write reserved SOC floor");
            return Ok(target);
        }
        self.bus
            .write_holding(REG_SOC_FLOOR, target as u16)
            .await
            .context("failed to write reserved SOC floor")?;
        info!(target, reason, "reserved SOC floor written");
        Ok(target)
    }

    async fn apply_intent(&self, intent: Intent) -> Result<OverrideResult> {
        let soc = self.read_soc().await?;
        let (target, reason) = match intent {
            Intent::Charge => (self.settings.charge_soc, "charge"),
            Intent::Discharge => (self.settings.discharge_soc, "discharge"),
            Intent::Idle => (soc.round().clamp(0.0, 100.0) as u8, "hold"),
        };
        let target = self.write_floor(target, reason).await?;
        Ok(OverrideResult { soc_pct: soc, target_soc: target })
    }

    fn mode_name(code: u16) -> &'static str {
        match code {
            0 => "waiting",
            1 => "normal",
            3 => "fault",
            4 => "flash",
            5 => "storage_charge",
            6 => "storage_discharge",
            7 => "storage_standby",
            8 => "storage_backup",
            _ => "unknown",
        }
    }
}

#[async_trait]
impl InverterDriver for SrneInverter {
    async fn get_state(&self) -> Result<BatteryState> {
        let status = self
            .bus
            .read_input(REG_STATUS, 1)
            .await
            .context("failed to read status register")?;
        let mode = Self::mode_name(*status.first().context("empty status read")?);

        let bms = self
            .bus
            .read_input(REG_BMS_BLOCK, 3)
            .await
            .context("failed to read BMS block")?;
        if bms.len() < 3 {
            anyhow::bail!("short BMS block: {} registers", bms.len());
        }
        let voltage_raw = bms[0];
        let current_deciamp = i16_from(bms[1]);
        let soc = bms[2] as f64;

        // Voltage scaling is unconfirmed upstream; the raw register rides
        // along and this figure stays out of all accounting.
        let power_w = -(voltage_raw as f64 * current_deciamp as f64) / 10.0;

        Ok(BatteryState { soc_pct: soc, power_w, bms_voltage_raw: voltage_raw, mode })
    }

    async fn get_metrics(&self) -> Result<InverterMetrics> {
        let pv = self
            .bus
            .read_input(REG_PV_POWER, 2)
            .await
            .context("failed to read PV power")?;
        let solar_w = u32_be(
            *pv.first().context("short PV power read")?,
            *pv.get(1).context("short PV power read")?,
        ) as f64
            / 10.0;

        let bms = self
            .bus
            .read_input(REG_BMS_BLOCK, 3)
            .await
            .context("failed to read BMS block")?;
        let soc = *bms.get(2).context("short BMS block")? as f64;

        let daily = self
            .bus
            .read_input(REG_DAILY_BLOCK, 40)
            .await
            .context("failed to read daily energy block")?;
        let totals = decode_totals(&daily)?;
        let consumption_w = u32_be(daily[DAILY_LOAD_W], daily[DAILY_LOAD_W + 1]) as f64 / 10.0;

        let grid = self
            .bus
            .read_input(REG_GRID_IMPORT_POWER, 2)
            .await
            .context("failed to read grid import power")?;
        let grid_import_w = u32_be(
            *grid.first().context("short grid power read")?,
            *grid.get(1).context("short grid power read")?,
        ) as f64
            / 10.0;

        let battery_w = consumption_w - solar_w - grid_import_w;
        let grid_export_w = (solar_w - consumption_w - (-battery_w).max(0.0)).max(0.0);

        Ok(InverterMetrics {
            soc_pct: soc,
            battery_w,
            grid_import_w,
            grid_export_w,
            solar_w,
            consumption_w,
            totals,
        })
    }

    async fn get_energy_totals(&self) -> Result<EnergyTotals> {
        let daily = self
            .bus
            .read_input(REG_DAILY_BLOCK, 40)
            .await
            .context("failed to read daily energy block")?;
        decode_totals(&daily)
    }

    async fn apply_schedule(&self, slots: &[ScheduleSlot], now_ts: &str) -> Result<ApplyResult> {
        let Some(slot) = ScheduleSlot::current(slots, now_ts) else {
            debug!(now_ts, "no schedule slot to apply");
            return Ok(ApplyResult { applied: 0, skipped: 1, target_soc: None });
        };

        let intent = Intent::from(slot.action);
        debug!(slot_ts = %slot.slot_ts, action = slot.action.as_str(), ?intent, "applying slot");
        let result = self.apply_intent(intent).await?;
        Ok(ApplyResult { applied: 1, skipped: 0, target_soc: Some(result.target_soc) })
    }

    async fn charge(&self) -> Result<OverrideResult> {
        self.apply_intent(Intent::Charge).await
    }

    async fn discharge(&self) -> Result<OverrideResult> {
        self.apply_intent(Intent::Discharge).await
    }

    async fn idle(&self) -> Result<OverrideResult> {
        self.apply_intent(Intent::Idle).await
    }

    async fn set_peak_shaving_target(&self, kw: f64) -> Result<()> {
        let value = (kw * 10.0).round().clamp(0.0, u16::MAX as f64) as u16;
        if self.settings.dry_run {
            info!(kw, value, "dry-run: would write grid import cap");
            return Ok(());
        }
        self.bus
            .write_holding(REG_GRID_IMPORT_CAP, value)
            .await
            .context("failed to write grid import cap")?;
        info!(kw, value, "grid import cap written");
        Ok(())
    }

    async fn reset_to_default(&self) -> Result<()> {
        self.write_floor(self.settings.discharge_soc, "reset").await?;
        Ok(())
    }
}

fn decode_totals(daily: &[u16]) -> Result<EnergyTotals> {
    if daily.len() < 40 {
        anyhow::bail!("daily energy block too short: {} registers", daily.len());
    }
    let kwh = |offset: usize| u32_be(daily[offset], daily[offset + 1]) as f64 / 10.0;
    Ok(EnergyTotals {
        pv_kwh: kwh(DAILY_PV_KWH),
        load_kwh: kwh(DAILY_LOAD_KWH),
        grid_import_kwh: kwh(DAILY_GRID_IMPORT_KWH),
        grid_export_kwh: kwh(DAILY_GRID_EXPORT_KWH),
    })
}
