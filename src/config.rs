use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Top-level application configuration.
///
/// Loaded once at startup, validated, then treated as read-only: components
/// receive it by reference and never mutate it.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Config {
    #[validate]
    pub location: LocationConfig,

    #[validate]
    pub panel: PanelConfig,

    #[validate]
    pub learning: LearningConfig,

    #[validate]
    pub forecast: ForecastConfig,

    #[validate]
    pub battery: BatteryConfig,

    #[validate]
    pub grid: GridConfig,

    #[validate]
    pub consumption: ConsumptionConfig,

    #[validate]
    pub inverter: InverterConfig,

    #[validate]
    pub price: PriceConfig,

    #[validate]
    pub dashboard: DashboardConfig,

    #[validate]
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Site location; the timezone drives every timestamp key in the system.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_location"))]
pub struct LocationConfig {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,

    /// IANA zone name, e.g. "Europe/Helsinki".
    #[validate(length(min = 1))]
    pub timezone: String,
}

impl LocationConfig {
    pub fn tz(&self) -> chrono_tz::Tz {
        // Validated at startup; a parse failure here would be a logic error.
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

fn validate_location(cfg: &LocationConfig) -> Result<(), validator::ValidationError> {
    if cfg.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(validator::ValidationError::new("unknown IANA timezone"));
    }
    Ok(())
}

/// PV array geometry.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PanelConfig {
    #[validate(range(min = 0.01, max = 1000.0))]
    pub peak_kw: f64,

    #[validate(range(min = 0.0, max = 90.0))]
    pub tilt_deg: f64,

    #[validate(range(min = 0.0, max = 360.0))]
    pub azimuth_deg: f64,

    #[serde(default = "default_panel_efficiency")]
    #[validate(range(min = 0.01, max = 1.0))]
    pub efficiency: f64,
}

/// Forecast-learning knobs.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LearningConfig {
    /// Irradiance at which observation confidence saturates, W/m².
    #[serde(default = "default_min_irradiance_weight")]
    #[validate(range(min = 1.0))]
    pub min_irradiance_weight: f64,

    /// Samples at which the matrix fully replaces the fallback correction.
    #[serde(default = "default_empirical_blend_threshold")]
    #[validate(range(min = 1))]
    pub empirical_blend_threshold: u32,

    #[validate]
    #[serde(default)]
    pub recency_bias: RecencyBiasConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_recency_bias"))]
pub struct RecencyBiasConfig {
    #[serde(default = "default_recency_window_days")]
    #[validate(range(min = 1, max = 90))]
    pub window_days: u32,

    /// Minimum accumulated sample weight before the bias is trusted.
    #[serde(default = "default_recency_min_samples")]
    #[validate(range(min = 1.0))]
    pub min_samples: f64,

    #[serde(default = "default_recency_clamp_min")]
    #[validate(range(min = 0.01))]
    pub clamp_min: f64,

    #[serde(default = "default_recency_clamp_max")]
    #[validate(range(min = 0.01))]
    pub clamp_max: f64,
}

impl Default for RecencyBiasConfig {
    fn default() -> Self {
        Self {
            window_days: default_recency_window_days(),
            min_samples: default_recency_min_samples(),
            clamp_min: default_recency_clamp_min(),
            clamp_max: default_recency_clamp_max(),
        }
    }
}

fn validate_recency_bias(cfg: &RecencyBiasConfig) -> Result<(), validator::ValidationError> {
    if cfg.clamp_min >= cfg.clamp_max {
        return Err(validator::ValidationError::new("clamp_min must be below clamp_max"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ForecastConfig {
    #[serde(default = "default_horizon_hours")]
    #[validate(range(min = 1, max = 72))]
    pub horizon_hours: u32,

    #[serde(default = "default_fetch_interval_hours")]
    #[validate(range(min = 1, max = 24))]
    pub fetch_interval_hours: u32,
}

/// Battery envelope used by the optimizer and the forward SOC pass.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_battery"))]
pub struct BatteryConfig {
    #[validate(range(min = 0.1, max = 1000.0))]
    pub capacity_kwh: f64,

    #[validate(range(min = 0.0))]
    pub max_charge_w: f64,

    #[validate(range(min = 0.0))]
    pub max_discharge_w: f64,

    /// Round-trip efficiency in (0, 1].
    #[validate(range(min = 0.01, max = 1.0))]
    pub efficiency: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub max_soc: f64,
}

fn validate_battery(cfg: &BatteryConfig) -> Result<(), validator::ValidationError> {
    if cfg.min_soc >= cfg.max_soc {
        return Err(validator::ValidationError::new("min_soc must be below max_soc"));
    }
    Ok(())
}

impl BatteryConfig {
    pub fn capacity_wh(&self) -> f64 {
        self.capacity_kwh * 1000.0
    }

    pub fn min_soc_wh(&self) -> f64 {
        self.capacity_wh() * self.min_soc / 100.0
    }

    pub fn max_soc_wh(&self) -> f64 {
        self.capacity_wh() * self.max_soc / 100.0
    }
}

/// Tariff components layered on the spot price.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GridConfig {
    #[serde(default)]
    pub sell_enabled: bool,

    #[serde(default = "default_sell_price_factor")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub sell_price_factor: f64,

    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub transfer_import_kwh: f64,

    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub transfer_export_kwh: f64,

    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub energy_tax_kwh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionMode {
    Yesterday,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Climate {
    Heating,
    Cooling,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ConsumptionConfig {
    #[serde(default = "default_consumption_mode")]
    pub source: ConsumptionMode,

    #[serde(default = "default_heating_sensitivity")]
    #[validate(range(min = 0.0, max = 0.5))]
    pub heating_sensitivity: f64,

    #[serde(default = "default_climate")]
    pub climate: Climate,

    #[serde(default = "default_flat_watts")]
    #[validate(range(min = 1.0))]
    pub flat_watts: f64,

    #[serde(default = "default_regression_window_days")]
    #[validate(range(min = 7, max = 365))]
    pub regression_window_days: u32,

    #[serde(default = "default_regression_min_samples")]
    #[validate(range(min = 2))]
    pub regression_min_samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InverterBrand {
    Srne,
    Mock,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_inverter"))]
pub struct InverterConfig {
    pub brand: InverterBrand,

    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default = "default_modbus_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_unit_id")]
    #[validate(range(min = 1, max = 247))]
    pub unit_id: u8,

    /// Modbus response timeout; the connect timeout is fixed at 10 s.
    #[serde(default = "default_modbus_timeout_ms")]
    #[validate(range(min = 100, max = 30000))]
    pub timeout_ms: u64,

    /// Log every write instead of transmitting it.
    #[serde(default)]
    pub dry_run: bool,

    /// Run only the snapshot pipeline; never command the inverter.
    #[serde(default)]
    pub data_collection_only: bool,

    /// Reserved-SOC target while the schedule says charge.
    #[serde(default = "default_charge_soc")]
    #[validate(range(min = 14, max = 99))]
    pub charge_soc: u8,

    /// Reserved-SOC target while the schedule says discharge. The hardware
    /// refuses anything below 13.
    #[serde(default = "default_discharge_soc")]
    #[validate(range(min = 13, max = 99))]
    pub discharge_soc: u8,
}

fn validate_inverter(cfg: &InverterConfig) -> Result<(), validator::ValidationError> {
    if cfg.discharge_soc >= cfg.charge_soc {
        return Err(validator::ValidationError::new(
            "discharge_soc must be below charge_soc",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Awattar,
    SpotHinta,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PriceConfig {
    pub source: PriceSource,

    #[validate(length(min = 1))]
    pub region: String,

    #[serde(default = "default_currency")]
    #[validate(length(min = 1))]
    pub currency: String,

    /// Local hour at which tomorrow's prices are published upstream.
    #[serde(default = "default_day_ahead_hour")]
    #[validate(range(min = 0, max = 23))]
    pub day_ahead_hour: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Empty user disables authentication.
    #[serde(default)]
    pub auth_user: String,

    #[serde(default)]
    pub auth_pass: String,
}

impl DashboardConfig {
    pub fn auth_enabled(&self) -> bool {
        !self.auth_user.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Raw provider responses are archived here for replay.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            archive_dir: default_archive_dir(),
        }
    }
}

fn default_panel_efficiency() -> f64 { 0.85 }
fn default_min_irradiance_weight() -> f64 { 400.0 }
fn default_empirical_blend_threshold() -> u32 { 30 }
fn default_recency_window_days() -> u32 { 14 }
fn default_recency_min_samples() -> f64 { 10.0 }
fn default_recency_clamp_min() -> f64 { 0.5 }
fn default_recency_clamp_max() -> f64 { 2.0 }
fn default_horizon_hours() -> u32 { 24 }
fn default_fetch_interval_hours() -> u32 { 6 }
fn default_sell_price_factor() -> f64 { 0.9 }
fn default_consumption_mode() -> ConsumptionMode { ConsumptionMode::Yesterday }
fn default_heating_sensitivity() -> f64 { 0.03 }
fn default_climate() -> Climate { Climate::Heating }
fn default_flat_watts() -> f64 { 400.0 }
fn default_regression_window_days() -> u32 { 30 }
fn default_regression_min_samples() -> u32 { 5 }
fn default_modbus_port() -> u16 { 502 }
fn default_unit_id() -> u8 { 1 }
fn default_modbus_timeout_ms() -> u64 { 5000 }
fn default_charge_soc() -> u8 { 90 }
fn default_discharge_soc() -> u8 { 20 }
fn default_currency() -> String { "EUR".to_string() }
fn default_day_ahead_hour() -> u32 { 14 }
fn default_dashboard_port() -> u16 { 8080 }
fn default_db_path() -> PathBuf { PathBuf::from("solarctl.db") }
fn default_archive_dir() -> PathBuf { PathBuf::from("archive") }

impl Config {
    /// Load configuration from the TOML file named by `SOLARCTL_CONFIG`
    /// (default `config/default.toml`), then `SOLARCTL__`-prefixed
    /// environment variables (`SOLARCTL__BATTERY__CAPACITY_KWH=10`).
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SOLARCTL_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SOLARCTL__").split("__"))
            .extract()
            .context("failed to parse configuration")?;

        config.validate().context("configuration validation failed")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            location: LocationConfig {
                lat: 61.5,
                lon: 23.8,
                timezone: "Europe/Helsinki".to_string(),
            },
            panel: PanelConfig {
                peak_kw: 6.0,
                tilt_deg: 35.0,
                azimuth_deg: 180.0,
                efficiency: 0.85,
            },
            learning: LearningConfig {
                min_irradiance_weight: 400.0,
                empirical_blend_threshold: 30,
                recency_bias: RecencyBiasConfig::default(),
            },
            forecast: ForecastConfig {
                horizon_hours: 24,
                fetch_interval_hours: 6,
            },
            battery: BatteryConfig {
                capacity_kwh: 10.0,
                max_charge_w: 5000.0,
                max_discharge_w: 5000.0,
                efficiency: 0.92,
                min_soc: 15.0,
                max_soc: 95.0,
            },
            grid: GridConfig {
                sell_enabled: true,
                sell_price_factor: 0.9,
                transfer_import_kwh: 0.05,
                transfer_export_kwh: 0.01,
                energy_tax_kwh: 0.028,
            },
            consumption: ConsumptionConfig {
                source: ConsumptionMode::Yesterday,
                heating_sensitivity: 0.03,
                climate: Climate::Heating,
                flat_watts: 400.0,
                regression_window_days: 30,
                regression_min_samples: 5,
            },
            inverter: InverterConfig {
                brand: InverterBrand::Srne,
                host: "192.168.1.40".to_string(),
                port: 502,
                unit_id: 1,
                timeout_ms: 5000,
                dry_run: false,
                data_collection_only: false,
                charge_soc: 90,
                discharge_soc: 20,
            },
            price: PriceConfig {
                source: PriceSource::SpotHinta,
                region: "FI".to_string(),
                currency: "EUR".to_string(),
                day_ahead_hour: 14,
            },
            dashboard: DashboardConfig {
                port: 8080,
                auth_user: String::new(),
                auth_pass: String::new(),
            },
            storage: StorageConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn bogus_timezone_is_rejected() {
        let mut cfg = valid_config();
        cfg.location.timezone = "Mars/Olympus_Mons".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn soc_window_must_be_ordered() {
        let mut cfg = valid_config();
        cfg.battery.min_soc = 95.0;
        cfg.battery.max_soc = 15.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn discharge_soc_must_stay_below_charge_soc() {
        let mut cfg = valid_config();
        cfg.inverter.discharge_soc = 92;
        cfg.inverter.charge_soc = 90;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hardware_floor_is_enforced() {
        let mut cfg = valid_config();
        cfg.inverter.discharge_soc = 12;
        assert!(cfg.validate().is_err());
    }
}
