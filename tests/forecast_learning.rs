//! The learning loop end to end: model → actuals → learner → matrix →
//! smoother, plus the recency-bias clamp.

use solarctl::config::{LearningConfig, PanelConfig, RecencyBiasConfig};
use solarctl::forecast::{ForecastModel, Learner, Smoother};
use solarctl::store::Store;

fn panel() -> PanelConfig {
    PanelConfig { peak_kw: 6.0, tilt_deg: 35.0, azimuth_deg: 180.0, efficiency: 0.85 }
}

fn learning() -> LearningConfig {
    LearningConfig {
        min_irradiance_weight: 400.0,
        empirical_blend_threshold: 30,
        recency_bias: RecencyBiasConfig {
            window_days: 14,
            min_samples: 10.0,
            clamp_min: 0.5,
            clamp_max: 2.0,
        },
    }
}

/// Seed one realized hour: irradiance, a prior model forecast with its
/// applied correction, and the actual.
fn seed_realized(store: &Store, hour_ts: &str, irr: f64, forecast: f64, actual: f64) {
    store.upsert_irradiance(hour_ts, irr).unwrap();
    store.update_forecast(hour_ts, forecast, 1.0, 1.0).unwrap();
    store.update_actual(hour_ts, actual).unwrap();
}

/// S5: two weeks of actuals at 3x the forecast push the raw bias to 3; the
/// clamp holds it at 2 and the new forecast uses exactly that.
#[test]
fn recency_bias_clamps_at_the_configured_maximum() {
    let store = Store::open_in_memory().unwrap();
    let panel = panel();
    let learning = learning();

    // Bright realized hours across the trailing window, every one landing
    // at 3x the forecast. Weights are ~0.94 each, so twelve rows clear the
    // min_samples threshold of 10.
    for day in 10..22 {
        let ts = format!("2025-06-{day:02}T12:00");
        seed_realized(&store, &ts, 800.0, 1.0, 3.0);
    }

    // A fresh hour to forecast. Its matrix cell is empty, so the model
    // back-calculates the correction from the most recent hour-12 actual:
    // 3.0 / (6 kW * 0.8) = 0.625.
    store.upsert_irradiance("2025-06-22T12:00", 500.0).unwrap();

    let model = ForecastModel::new(&store, &panel, &learning);
    let run = model.run("2025-06-22T13:00").unwrap();
    assert_eq!(run.recency_bias, 2.0);

    let rows = store
        .get_readings_for_range("2025-06-22T12:00", "2025-06-22T13:00")
        .unwrap();
    let reading = &rows[0];
    assert!((reading.correction_applied.unwrap() - 0.625).abs() < 1e-9);
    // peak_kw * irr/1000 * correction * clamped bias
    let expected = 6.0 * 0.5 * 0.625 * 2.0;
    assert!((reading.forecast_kwh.unwrap() - expected).abs() < 1e-9);
}

/// Below the sample-weight threshold the bias is exactly 1.
#[test]
fn thin_recency_window_uses_unit_bias() {
    let store = Store::open_in_memory().unwrap();
    let panel = panel();
    let learning = learning();

    for day in 18..22 {
        let ts = format!("2025-06-{day:02}T12:00");
        seed_realized(&store, &ts, 800.0, 1.0, 3.0);
    }
    store.upsert_irradiance("2025-06-22T12:00", 500.0).unwrap();

    let run = ForecastModel::new(&store, &panel, &learning).run("2025-06-22T13:00").unwrap();
    assert_eq!(run.recency_bias, 1.0);
}

/// The full loop: forecast, realize, learn, smooth. The matrix absorbs the
/// correction and the smoothed table spreads it across neighboring days.
#[test]
fn learning_loop_feeds_matrix_and_smoother() {
    let store = Store::open_in_memory().unwrap();
    let panel = panel();
    let learning = learning();

    store.upsert_irradiance("2025-06-01T12:00", 700.0).unwrap();
    ForecastModel::new(&store, &panel, &learning).run("2025-06-01T12:30").unwrap();

    // Telemetry closes the hour at 80% of the forecast.
    let forecast = store
        .get_readings_for_range("2025-06-01T12:00", "2025-06-01T13:00")
        .unwrap()[0]
        .forecast_kwh
        .unwrap();
    store.update_actual("2025-06-01T12:00", forecast * 0.8).unwrap();

    let learned = Learner::new(&store).run("2025-06-01T13:05").unwrap();
    assert_eq!(learned, 1);

    let cell = store.get_correction_cell(6, 1, 12).unwrap();
    assert_eq!(cell.sample_count, 1);
    assert!((cell.avg_correction - 0.8).abs() < 1e-9);
    assert!(cell.updated_at.is_some());

    // The learner is the sole writer of the raw matrix; smoothing writes the
    // high-res table without touching it.
    let cells = Smoother::new(&store).run().unwrap();
    assert!(cells > 0);
    let raw_after = store.get_correction_cell(6, 1, 12).unwrap();
    assert_eq!(raw_after.sample_count, 1);
    assert!((raw_after.avg_correction - 0.8).abs() < 1e-9);

    // June 1 is day-of-year 152; the neighborhood got the correction too.
    let center = store.get_smoothed_cell(152, 12).unwrap().unwrap();
    assert!((center.avg_correction - 0.8).abs() < 1e-9);
    let neighbor = store.get_smoothed_cell(149, 12).unwrap().unwrap();
    assert!((neighbor.avg_correction - 0.8).abs() < 1e-9);
    assert!(store.get_smoothed_cell(140, 12).unwrap().is_none());
}

/// Smoothing twice over the same readings produces the same table.
#[test]
fn smoother_rerun_is_stable() {
    let store = Store::open_in_memory().unwrap();
    for (day, correction) in [(1, 0.7), (3, 0.9), (5, 1.2)] {
        let ts = format!("2025-06-{day:02}T11:00");
        seed_realized(&store, &ts, 650.0, 2.0, 2.0 * correction);
    }
    Learner::new(&store).run("2025-06-06T00:00").unwrap();

    Smoother::new(&store).run().unwrap();
    let first = store.get_smoothed_cell(153, 11).unwrap().unwrap();
    Smoother::new(&store).run().unwrap();
    let second = store.get_smoothed_cell(153, 11).unwrap().unwrap();

    assert_eq!(first.avg_correction, second.avg_correction);
    assert_eq!(first.sample_count, second.sample_count);
}

/// A Feb 29 observation folds onto day-of-year 60; the smoothed domain
/// itself never exceeds 365.
#[test]
fn leap_day_folds_into_the_smoothed_domain() {
    let store = Store::open_in_memory().unwrap();
    seed_realized(&store, "2024-02-29T12:00", 400.0, 1.0, 0.9);
    Learner::new(&store).run("2024-03-01T00:00").unwrap();
    Smoother::new(&store).run().unwrap();

    let folded = store.get_smoothed_cell(60, 12).unwrap().unwrap();
    assert!((folded.avg_correction - 0.9).abs() < 1e-9);
    assert!(store.get_smoothed_cell(366, 12).unwrap().is_none());
}
