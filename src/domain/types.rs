use serde::{Deserialize, Serialize};

/// One learning observation, keyed by its local hour (`"YYYY-MM-DDTHH:00"`).
///
/// Created by the irradiance parser, refined by the forecast model, then by
/// telemetry (actual) and the learner (correction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarReading {
    pub hour_ts: String,
    /// Forecast global irradiance for the hour, W/m².
    pub irradiance: f64,
    /// Model production forecast, kWh; None until the model has run.
    pub forecast_kwh: Option<f64>,
    /// Matrix correction the model applied (excludes the recency bias).
    pub correction_applied: Option<f64>,
    /// Observation confidence in [0, 1], saturating with irradiance.
    pub confidence: f64,
    /// Realized production, kWh; None until telemetry closes the hour.
    pub actual_kwh: Option<f64>,
    /// actual / forecast once both are known and the forecast is positive.
    pub correction: Option<f64>,
}

/// A raw correction-matrix cell, keyed by calendar (month, day, hour).
///
/// Seeded exhaustively with a unit average; mutated only by the learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixCell {
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub avg_correction: f64,
    pub total_weight: f64,
    pub sample_count: i64,
    pub max_actual_kwh: f64,
    pub updated_at: Option<String>,
}

/// A Gaussian-smoothed cell, keyed by (day-of-year, hour). Overwritten
/// wholesale by the smoother; never touched by the learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothedCell {
    pub day_of_year: u32,
    pub hour: u32,
    pub avg_correction: f64,
    pub sample_count: i64,
}

/// A quarter-hour spot price, keyed by its local slot timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSlot {
    pub slot_ts: String,
    /// Spot price per kWh in the configured currency.
    pub price: f64,
    pub region: String,
}

/// Where an hourly consumption figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionSource {
    InverterDelta,
    InverterInstant,
    Manual,
    Flat,
}

impl ConsumptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InverterDelta => "inverter_delta",
            Self::InverterInstant => "inverter_instant",
            Self::Manual => "manual",
            Self::Flat => "flat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inverter_delta" => Some(Self::InverterDelta),
            "inverter_instant" => Some(Self::InverterInstant),
            "manual" => Some(Self::Manual),
            "flat" => Some(Self::Flat),
            _ => None,
        }
    }
}

/// Average household consumption over one hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionReading {
    pub hour_ts: String,
    pub watts: f64,
    pub temperature_c: Option<f64>,
    pub source: ConsumptionSource,
}

/// Daily-cumulative inverter counters at a quarter-hour boundary.
/// All four reset at local midnight and are non-decreasing within a day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergySnapshot {
    pub ts: String,
    pub pv_kwh: f64,
    pub load_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Ok,
    Error,
    NeverRun,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::NeverRun => "never_run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            "never_run" => Some(Self::NeverRun),
            _ => None,
        }
    }
}

/// Ledger row for one periodic pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub name: String,
    pub last_run_ts: Option<String>,
    pub last_status: PipelineStatus,
}
