//! Hourly production forecast.
//!
//! For every reading that has irradiance but no forecast yet, the model blends
//! the empirical matrix cell with a fallback correction, scales by a global
//! recency-bias factor learned from the trailing window, and persists the
//! result. The persisted `correction_applied` excludes the bias so the
//! learner and the bias computation itself stay consistent under matrix
//! drift.

use anyhow::Result;
use std::f64::consts::PI;
use tracing::{debug, info, warn};

use super::irradiance_weight;
use crate::clock;
use crate::config::{LearningConfig, PanelConfig};
use crate::store::Store;

/// Back-calculated corrections beyond this are treated as sensor garbage.
const IMPLIED_CORRECTION_CAP: f64 = 10.0;

/// Floor for the geometry fallback product.
const GEOMETRY_FLOOR: f64 = 0.1;

pub struct ForecastModel<'a> {
    store: &'a Store,
    panel: &'a PanelConfig,
    learning: &'a LearningConfig,
}

#[derive(Debug, Default)]
pub struct ModelRun {
    pub forecasts_written: usize,
    pub recency_bias: f64,
}

impl<'a> ForecastModel<'a> {
    pub fn new(store: &'a Store, panel: &'a PanelConfig, learning: &'a LearningConfig) -> Self {
        Self { store, panel, learning }
    }

    /// Forecast every pending reading. `now_ts` anchors the recency window.
    pub fn run(&self, now_ts: &str) -> Result<ModelRun> {
        let pending = self.store.get_pending_forecasts()?;
        if pending.is_empty() {
            return Ok(ModelRun { forecasts_written: 0, recency_bias: 1.0 });
        }

        let bias = self.recency_bias(now_ts)?;
        let mut written = 0usize;

        for reading in &pending {
            let (month, day, hour) = clock::month_day_hour(&reading.hour_ts)?;
            let cell = self.store.get_correction_cell(month, day, hour)?;

            let blend_weight =
                (cell.sample_count as f64 / self.learning.empirical_blend_threshold as f64).min(1.0);
            let fallback = self.fallback_correction(cell.sample_count, month, hour)?;
            let correction = blend_weight * cell.avg_correction + (1.0 - blend_weight) * fallback;

            let irradiance = reading.irradiance;
            let production_kwh =
                (self.panel.peak_kw * (irradiance / 1000.0) * correction * bias).max(0.0);
            let confidence = (irradiance / self.learning.min_irradiance_weight).clamp(0.0, 1.0);

            self.store
                .update_forecast(&reading.hour_ts, production_kwh, confidence, correction)?;
            written += 1;
        }

        info!(forecasts = written, bias, "forecast model run complete");
        Ok(ModelRun { forecasts_written: written, recency_bias: bias })
    }

    /// Global multiplicative correction from the trailing window of realized
    /// hours, weighted by irradiance so overcast residuals cannot dominate.
    fn recency_bias(&self, now_ts: &str) -> Result<f64> {
        let rb = &self.learning.recency_bias;
        let window_start = clock::shift_days(now_ts, -(rb.window_days as i64))?;
        let rows = self.store.get_recent_realized(&window_start)?;

        let mut weight_sum = 0.0;
        let mut residual_sum = 0.0;
        for row in &rows {
            let (Some(actual), Some(forecast)) = (row.actual_kwh, row.forecast_kwh) else {
                continue;
            };
            if forecast <= 0.0 {
                continue;
            }
            let weight = irradiance_weight(row.irradiance);
            residual_sum += (actual / forecast) * weight;
            weight_sum += weight;
        }

        if weight_sum < rb.min_samples {
            debug!(weight_sum, needed = rb.min_samples, "recency window too thin, bias = 1");
            return Ok(1.0);
        }

        let raw = residual_sum / weight_sum;
        let bias = raw.clamp(rb.clamp_min, rb.clamp_max);
        if bias != raw {
            warn!(raw, clamped = bias, "recency bias clamped");
        }
        Ok(bias)
    }

    /// Correction used where the matrix has little or no evidence.
    fn fallback_correction(&self, sample_count: i64, month: u32, hour: u32) -> Result<f64> {
        if sample_count == 0 {
            if let Some(row) = self.store.get_latest_actual_for_hour(hour)? {
                if let Some(actual) = row.actual_kwh {
                    let nameplate_kwh = self.panel.peak_kw * (row.irradiance / 1000.0);
                    if nameplate_kwh > 0.0 {
                        let implied = actual / nameplate_kwh;
                        if implied > 0.0 && implied < IMPLIED_CORRECTION_CAP {
                            return Ok(implied);
                        }
                    }
                }
            }
        }
        Ok(geometry_fallback(self.panel.tilt_deg, month, hour))
    }
}

/// Physics-shaped prior: panel tilt projection, a seasonal envelope peaking
/// at midsummer, and a cosine day-arc, floored so the product never
/// suppresses a forecast entirely.
pub fn geometry_fallback(tilt_deg: f64, month: u32, hour: u32) -> f64 {
    let tilt = (tilt_deg.to_radians()).cos();
    let season = 1.0 - 0.15 * (month as f64 - 6.5).abs() / 5.5;
    let day_arc = (PI * (hour as f64 - 12.0) / 12.0).cos().max(0.0);
    (tilt * season * day_arc).max(GEOMETRY_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LearningConfig, RecencyBiasConfig};

    fn learning() -> LearningConfig {
        LearningConfig {
            min_irradiance_weight: 400.0,
            empirical_blend_threshold: 30,
            recency_bias: RecencyBiasConfig::default(),
        }
    }

    fn panel() -> PanelConfig {
        PanelConfig { peak_kw: 6.0, tilt_deg: 35.0, azimuth_deg: 180.0, efficiency: 0.85 }
    }

    #[test]
    fn geometry_fallback_peaks_at_noon_midsummer() {
        let noon_june = geometry_fallback(0.0, 6, 12);
        let noon_december = geometry_fallback(0.0, 12, 12);
        let morning_june = geometry_fallback(0.0, 6, 8);
        assert!(noon_june > noon_december);
        assert!(noon_june > morning_june);
        // Night hours bottom out at the floor rather than zero.
        assert_eq!(geometry_fallback(0.0, 6, 0), 0.1);
    }

    #[test]
    fn model_prefers_matrix_once_threshold_is_met() {
        let store = Store::open_in_memory().unwrap();
        let panel = panel();
        let learning = learning();

        // A saturated cell with a known average.
        store
            .update_correction_matrix(6, 1, 12, 0.8, 30, 25.0, 3.0, "2025-05-31T12:00")
            .unwrap();
        store.upsert_irradiance("2025-06-01T12:00", 500.0).unwrap();

        let model = ForecastModel::new(&store, &panel, &learning);
        let run = model.run("2025-06-01T13:00").unwrap();
        assert_eq!(run.forecasts_written, 1);

        let rows = store
            .get_readings_for_range("2025-06-01T12:00", "2025-06-01T13:00")
            .unwrap();
        let reading = &rows[0];
        // blend weight 1.0, bias 1.0: 6 kW * 0.5 * 0.8 = 2.4 kWh
        assert!((reading.forecast_kwh.unwrap() - 2.4).abs() < 1e-9);
        assert!((reading.correction_applied.unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_cell_back_calculates_from_latest_actual() {
        let store = Store::open_in_memory().unwrap();
        let panel = panel();
        let learning = learning();

        // Yesterday's realized noon hour implies a correction of
        // 2.1 / (6 * 0.5) = 0.7.
        store.upsert_irradiance("2025-05-31T12:00", 500.0).unwrap();
        store.update_actual("2025-05-31T12:00", 2.1).unwrap();

        store.upsert_irradiance("2025-06-01T12:00", 600.0).unwrap();
        let model = ForecastModel::new(&store, &panel, &learning);
        model.run("2025-06-01T13:00").unwrap();

        let rows = store
            .get_readings_for_range("2025-06-01T12:00", "2025-06-01T13:00")
            .unwrap();
        assert!((rows[0].correction_applied.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn confidence_saturates_at_the_configured_irradiance() {
        let store = Store::open_in_memory().unwrap();
        let panel = panel();
        let learning = learning();

        store.upsert_irradiance("2025-06-01T07:00", 100.0).unwrap();
        store.upsert_irradiance("2025-06-01T12:00", 800.0).unwrap();
        ForecastModel::new(&store, &panel, &learning).run("2025-06-01T13:00").unwrap();

        let rows = store
            .get_readings_for_range("2025-06-01T07:00", "2025-06-01T13:00")
            .unwrap();
        assert!((rows[0].confidence - 0.25).abs() < 1e-9);
        assert_eq!(rows[1].confidence, 1.0);
    }
}
