//! Gaussian cross-day smoother.
//!
//! Rebuilds the day-of-year × hour table from all readings that carry a
//! derived correction. Each cell averages its ±7-day neighborhood with a
//! Gaussian distance weight, the observation confidence, and a production
//! weight that discounts near-zero hours. The raw matrix is never touched.

use anyhow::Result;
use std::collections::HashMap;
use tracing::info;

use crate::clock;
use crate::domain::{SmoothedCell, SolarReading};
use crate::store::Store;

/// Smoothing window half-width in days.
const WINDOW_DAYS: i32 = 7;

/// Gaussian sigma in days.
const SIGMA_DAYS: f64 = 3.0;

/// Production at which the production weight saturates, kWh.
const PROD_WEIGHT_SATURATION_KWH: f64 = 2.0;

/// Weight for hours with missing or zero production.
const PROD_WEIGHT_FLOOR: f64 = 0.1;

pub struct Smoother<'a> {
    store: &'a Store,
}

impl<'a> Smoother<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Rebuild the smoothed table. Deterministic: the same readings produce
    /// the same table. Returns the number of populated cells.
    pub fn run(&self) -> Result<usize> {
        let readings = self.store.get_readings_for_smoothing()?;
        let cells = smooth(&readings)?;
        self.store.upsert_smoothed_batch(&cells)?;
        info!(cells = cells.len(), source_rows = readings.len(), "smoothed matrix rebuilt");
        Ok(cells.len())
    }
}

/// Pure smoothing pass over the readings.
pub fn smooth(readings: &[SolarReading]) -> Result<Vec<SmoothedCell>> {
    // (day-of-year, hour) -> contributing observations.
    let mut by_cell: HashMap<(u32, u32), Vec<&SolarReading>> = HashMap::new();
    for reading in readings {
        if reading.correction.is_none() {
            continue;
        }
        let (month, day, hour) = clock::month_day_hour(&reading.hour_ts)?;
        let doy = clock::day_of_year(month, day);
        by_cell.entry((doy, hour)).or_default().push(reading);
    }

    let mut cells = Vec::new();
    for doy in 1..=365u32 {
        for hour in 0..24u32 {
            let mut weight_sum = 0.0;
            let mut value_sum = 0.0;
            let mut samples = 0i64;

            for offset in -WINDOW_DAYS..=WINDOW_DAYS {
                let neighbor = (((doy as i32 - 1 + offset).rem_euclid(365)) + 1) as u32;
                let Some(rows) = by_cell.get(&(neighbor, hour)) else {
                    continue;
                };
                let distance = offset.unsigned_abs().min(365 - offset.unsigned_abs()) as f64;
                let gauss = (-distance * distance / (2.0 * SIGMA_DAYS * SIGMA_DAYS)).exp();

                for row in rows {
                    let Some(correction) = row.correction else { continue };
                    let prod_weight = match row.actual_kwh {
                        Some(actual) if actual > 0.0 => {
                            (actual / PROD_WEIGHT_SATURATION_KWH).min(1.0)
                        }
                        _ => PROD_WEIGHT_FLOOR,
                    };
                    let weight = gauss * row.confidence * prod_weight;
                    if weight <= 0.0 {
                        continue;
                    }
                    weight_sum += weight;
                    value_sum += correction * weight;
                    samples += 1;
                }
            }

            if weight_sum > 0.0 {
                cells.push(SmoothedCell {
                    day_of_year: doy,
                    hour,
                    avg_correction: value_sum / weight_sum,
                    sample_count: samples,
                });
            }
        }
    }
    Ok(cells)
}
