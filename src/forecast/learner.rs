//! Incremental matrix learner.
//!
//! Consumes realized hours the model forecast earlier and folds each one into
//! its calendar cell as an irradiance-weighted running average. The weighting
//! keeps a single overcast morning from dominating a clear-sky cell.

use anyhow::Result;
use tracing::{debug, info};

use super::irradiance_weight;
use crate::clock;
use crate::store::Store;

pub struct Learner<'a> {
    store: &'a Store,
}

impl<'a> Learner<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Process all unprocessed actuals. Returns how many rows were learned;
    /// a second run with no new actuals is a no-op.
    pub fn run(&self, now_ts: &str) -> Result<usize> {
        let rows = self.store.get_unprocessed_actuals()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut learned = 0usize;
        for row in &rows {
            let (Some(actual), Some(forecast)) = (row.actual_kwh, row.forecast_kwh) else {
                continue;
            };
            if forecast <= 0.0 {
                continue;
            }

            let correction = actual / forecast;
            let weight = irradiance_weight(row.irradiance);
            let (month, day, hour) = clock::month_day_hour(&row.hour_ts)?;
            let cell = self.store.get_correction_cell(month, day, hour)?;

            let total_weight = cell.total_weight + weight;
            let avg = if total_weight > 0.0 {
                (cell.avg_correction * cell.total_weight + correction * weight) / total_weight
            } else {
                correction
            };

            self.store.update_correction_matrix(
                month,
                day,
                hour,
                avg,
                cell.sample_count + 1,
                total_weight,
                cell.max_actual_kwh.max(actual),
                now_ts,
            )?;
            self.store.update_correction(&row.hour_ts, correction)?;

            debug!(
                hour_ts = %row.hour_ts,
                correction,
                weight,
                cell_avg = avg,
                "learned correction"
            );
            learned += 1;
        }

        info!(rows = learned, "learner run complete");
        Ok(learned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realized(store: &Store, hour_ts: &str, irradiance: f64, forecast: f64, actual: f64) {
        store.upsert_irradiance(hour_ts, irradiance).unwrap();
        store.update_forecast(hour_ts, forecast, 1.0, 1.0).unwrap();
        store.update_actual(hour_ts, actual).unwrap();
    }

    #[test]
    fn weighted_average_accumulates() {
        let store = Store::open_in_memory().unwrap();
        // Two observations for the same calendar cell, different years.
        realized(&store, "2024-06-01T12:00", 800.0, 2.0, 1.0); // correction 0.5
        realized(&store, "2025-06-01T12:00", 800.0, 2.0, 3.0); // correction 1.5

        Learner::new(&store).run("2025-06-01T13:00").unwrap();

        let cell = store.get_correction_cell(6, 1, 12).unwrap();
        assert_eq!(cell.sample_count, 2);
        // Equal weights, so the average lands in the middle.
        assert!((cell.avg_correction - 1.0).abs() < 1e-9);
        assert_eq!(cell.max_actual_kwh, 3.0);
        assert!(cell.total_weight > 0.0);
    }

    #[test]
    fn zero_irradiance_rows_carry_no_weight() {
        let store = Store::open_in_memory().unwrap();
        realized(&store, "2025-06-01T12:00", 800.0, 2.0, 2.0); // correction 1.0
        realized(&store, "2025-06-02T12:00", 0.0, 0.5, 5.0); // wild correction, zero weight

        Learner::new(&store).run("2025-06-02T13:00").unwrap();

        // With zero accumulated weight the cell takes the raw correction.
        let cell = store.get_correction_cell(6, 2, 12).unwrap();
        assert_eq!(cell.sample_count, 1);
        assert_eq!(cell.avg_correction, 10.0);

        let noon = store.get_correction_cell(6, 1, 12).unwrap();
        assert!((noon.avg_correction - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rerun_without_new_actuals_changes_nothing() {
        let store = Store::open_in_memory().unwrap();
        realized(&store, "2025-06-01T12:00", 600.0, 2.0, 1.8);

        assert_eq!(Learner::new(&store).run("2025-06-01T13:00").unwrap(), 1);
        let before = store.get_correction_cell(6, 1, 12).unwrap();

        assert_eq!(Learner::new(&store).run("2025-06-01T14:00").unwrap(), 0);
        let after = store.get_correction_cell(6, 1, 12).unwrap();
        assert_eq!(before.avg_correction, after.avg_correction);
        assert_eq!(before.sample_count, after.sample_count);
        assert_eq!(before.total_weight, after.total_weight);
    }

    #[test]
    fn corrections_are_never_negative() {
        let store = Store::open_in_memory().unwrap();
        realized(&store, "2025-06-01T12:00", 700.0, 2.0, 0.0);

        Learner::new(&store).run("2025-06-01T13:00").unwrap();
        let rows = store
            .get_readings_for_range("2025-06-01T12:00", "2025-06-01T13:00")
            .unwrap();
        assert_eq!(rows[0].correction, Some(0.0));
    }
}
