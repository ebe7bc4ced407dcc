//! Household consumption estimator.
//!
//! Produces exactly 24 hourly watt figures for a day. Per hour, the best
//! available signal wins: a learned temperature regression, yesterday's
//! figure nudged by the temperature delta, or the configured flat value.

use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

use crate::clock;
use crate::config::{Climate, ConsumptionConfig, ConsumptionMode};
use crate::store::Store;

/// Lower clamp for regression estimates, watts.
const REGRESSION_FLOOR_W: f64 = 100.0;

/// Temperature-factor clamp around yesterday's figure.
const FACTOR_MIN: f64 = 0.7;
const FACTOR_MAX: f64 = 1.3;

#[derive(Debug, Clone)]
pub struct HourlyEstimate {
    pub hour_ts: String,
    pub watts: f64,
}

pub struct ConsumptionEstimator<'a> {
    store: &'a Store,
    cfg: &'a ConsumptionConfig,
}

impl<'a> ConsumptionEstimator<'a> {
    pub fn new(store: &'a Store, cfg: &'a ConsumptionConfig) -> Self {
        Self { store, cfg }
    }

    /// Estimate the 24 hours of `date` (a `"YYYY-MM-DD"` string).
    /// `forecast_temps` maps hour keys to forecast outdoor temperatures and
    /// may be empty when no weather data is at hand.
    pub fn estimate_for_day(
        &self,
        date: &str,
        forecast_temps: &HashMap<String, f64>,
    ) -> Result<Vec<HourlyEstimate>> {
        let flat = self.cfg.flat_watts;
        let hours = clock::day_hours(&format!("{date}T00:00"))?;

        if self.cfg.source == ConsumptionMode::Flat {
            return Ok(hours
                .into_iter()
                .map(|hour_ts| HourlyEstimate { hour_ts, watts: flat })
                .collect());
        }

        let yesterday_date = clock::shift_date(date, -1)?;
        let yesterday: HashMap<u32, (f64, Option<f64>)> = self
            .store
            .get_consumption_for_range(
                &format!("{yesterday_date}T00:00"),
                &format!("{date}T00:00"),
            )?
            .into_iter()
            .filter_map(|r| {
                let hour = clock::parse(&r.hour_ts).ok()?.hour;
                Some((hour, (r.watts, r.temperature_c)))
            })
            .collect();

        if yesterday.is_empty() {
            debug!(date, "no consumption history for yesterday, flat estimate");
            return Ok(hours
                .into_iter()
                .map(|hour_ts| HourlyEstimate { hour_ts, watts: flat })
                .collect());
        }

        let window_start = clock::shift_date(date, -(self.cfg.regression_window_days as i64))?;
        let history = self.store.get_consumption_for_range(
            &format!("{window_start}T00:00"),
            &format!("{date}T00:00"),
        )?;

        let mut estimates = Vec::with_capacity(24);
        for hour_ts in hours {
            let hour = clock::parse(&hour_ts)?.hour;
            let today_temp = forecast_temps.get(&hour_ts).copied();

            let watts = if let (Some(fit), Some(temp)) =
                (self.regression_for_hour(&history, hour), today_temp)
            {
                (fit.slope * temp + fit.intercept).clamp(REGRESSION_FLOOR_W, 3.0 * flat)
            } else if let Some(&(yesterday_w, yesterday_temp)) = yesterday.get(&hour) {
                yesterday_w * self.temperature_factor(today_temp, yesterday_temp)
            } else {
                flat
            };

            estimates.push(HourlyEstimate { hour_ts, watts });
        }
        Ok(estimates)
    }

    /// Scale yesterday's figure by the temperature delta: in a heating
    /// climate a warmer day means less consumption, in a cooling climate
    /// more.
    fn temperature_factor(&self, today: Option<f64>, yesterday: Option<f64>) -> f64 {
        let (Some(today), Some(yesterday)) = (today, yesterday) else {
            return 1.0;
        };
        let delta = today - yesterday;
        let factor = match self.cfg.climate {
            Climate::Heating => 1.0 - delta * self.cfg.heating_sensitivity,
            Climate::Cooling => 1.0 + delta * self.cfg.heating_sensitivity,
        };
        factor.clamp(FACTOR_MIN, FACTOR_MAX)
    }

    /// Ordinary least squares over the trailing window for one hour-of-day.
    fn regression_for_hour(
        &self,
        history: &[crate::domain::ConsumptionReading],
        hour: u32,
    ) -> Option<LinearFit> {
        let points: Vec<(f64, f64)> = history
            .iter()
            .filter(|r| clock::parse(&r.hour_ts).map(|p| p.hour).ok() == Some(hour))
            .filter_map(|r| r.temperature_c.map(|t| (t, r.watts)))
            .collect();
        if points.len() < self.cfg.regression_min_samples as usize {
            return None;
        }

        let n = points.len() as f64;
        let mean_t = points.iter().map(|(t, _)| t).sum::<f64>() / n;
        let mean_w = points.iter().map(|(_, w)| w).sum::<f64>() / n;
        let var_t = points.iter().map(|(t, _)| (t - mean_t).powi(2)).sum::<f64>();
        if var_t < 1e-6 {
            // All observations at the same temperature say nothing about the slope.
            return None;
        }
        let cov = points
            .iter()
            .map(|(t, w)| (t - mean_t) * (w - mean_w))
            .sum::<f64>();
        let slope = cov / var_t;
        Some(LinearFit { slope, intercept: mean_w - slope * mean_t })
    }
}

struct LinearFit {
    slope: f64,
    intercept: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumptionSource;

    fn cfg() -> ConsumptionConfig {
        ConsumptionConfig {
            source: ConsumptionMode::Yesterday,
            heating_sensitivity: 0.03,
            climate: Climate::Heating,
            flat_watts: 400.0,
            regression_window_days: 30,
            regression_min_samples: 5,
        }
    }

    #[test]
    fn flat_mode_is_flat() {
        let store = Store::open_in_memory().unwrap();
        let mut config = cfg();
        config.source = ConsumptionMode::Flat;
        let est = ConsumptionEstimator::new(&store, &config);
        let day = est.estimate_for_day("2025-06-01", &HashMap::new()).unwrap();
        assert_eq!(day.len(), 24);
        assert!(day.iter().all(|e| e.watts == 400.0));
        assert_eq!(day[0].hour_ts, "2025-06-01T00:00");
        assert_eq!(day[23].hour_ts, "2025-06-01T23:00");
    }

    #[test]
    fn yesterday_with_warmer_forecast_shrinks_heating_load() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_consumption("2025-05-31T10:00", 1000.0, Some(5.0), ConsumptionSource::InverterDelta)
            .unwrap();
        let config = cfg();
        let est = ConsumptionEstimator::new(&store, &config);

        let mut temps = HashMap::new();
        temps.insert("2025-06-01T10:00".to_string(), 10.0);
        let day = est.estimate_for_day("2025-06-01", &temps).unwrap();

        let ten = day.iter().find(|e| e.hour_ts == "2025-06-01T10:00").unwrap();
        // 5 degrees warmer at 0.03/degree: factor 0.85.
        assert!((ten.watts - 850.0).abs() < 1e-9);

        // Hours yesterday never covered fall back to flat.
        let two = day.iter().find(|e| e.hour_ts == "2025-06-01T02:00").unwrap();
        assert_eq!(two.watts, 400.0);
    }

    #[test]
    fn temperature_factor_clamps() {
        let store = Store::open_in_memory().unwrap();
        let config = cfg();
        let est = ConsumptionEstimator::new(&store, &config);
        // A 20-degree swing would give factor 0.4, clamped to 0.7.
        assert_eq!(est.temperature_factor(Some(25.0), Some(5.0)), 0.7);
        assert_eq!(est.temperature_factor(Some(-15.0), Some(5.0)), 1.3);
        assert_eq!(est.temperature_factor(None, Some(5.0)), 1.0);
    }

    #[test]
    fn regression_wins_when_enough_history_exists() {
        let store = Store::open_in_memory().unwrap();
        // Six days of hour-10 readings on a clean line: watts = 1500 - 50*T.
        for (i, temp) in [0.0, 2.0, 4.0, 6.0, 8.0, 10.0].iter().enumerate() {
            let ts = format!("2025-05-{:02}T10:00", 26 + i);
            store
                .upsert_consumption(&ts, 1500.0 - 50.0 * temp, Some(*temp), ConsumptionSource::InverterDelta)
                .unwrap();
        }
        let config = cfg();
        let est = ConsumptionEstimator::new(&store, &config);

        let mut temps = HashMap::new();
        temps.insert("2025-06-01T10:00".to_string(), 10.0);
        let day = est.estimate_for_day("2025-06-01", &temps).unwrap();
        let ten = day.iter().find(|e| e.hour_ts == "2025-06-01T10:00").unwrap();
        assert!((ten.watts - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn regression_estimates_clamp_to_sane_bounds() {
        let store = Store::open_in_memory().unwrap();
        for (i, temp) in [0.0, 1.0, 2.0, 3.0, 4.0, 2.0].iter().enumerate() {
            let ts = format!("2025-05-{:02}T10:00", 26 + i);
            store
                .upsert_consumption(&ts, 3000.0 - 700.0 * temp, Some(*temp), ConsumptionSource::InverterDelta)
                .unwrap();
        }
        let config = cfg();
        let est = ConsumptionEstimator::new(&store, &config);

        let mut temps = HashMap::new();
        temps.insert("2025-06-01T10:00".to_string(), 20.0);
        let day = est.estimate_for_day("2025-06-01", &temps).unwrap();
        let ten = day.iter().find(|e| e.hour_ts == "2025-06-01T10:00").unwrap();
        // The raw fit would be deeply negative; the floor holds.
        assert_eq!(ten.watts, 100.0);
    }
}
