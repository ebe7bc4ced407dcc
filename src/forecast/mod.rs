//! The learning forecast core: physics fallback, empirical correction
//! matrix, incremental learner, cross-day smoother and short-window recency
//! bias, plus the consumption estimator and the irradiance provider.

pub mod consumption;
pub mod learner;
pub mod model;
pub mod smoother;
pub mod weather;

pub use consumption::ConsumptionEstimator;
pub use learner::Learner;
pub use model::ForecastModel;
pub use smoother::Smoother;
pub use weather::{HourlyWeather, WeatherClient};

/// Half-saturation irradiance for observation weights, W/m². An overcast
/// 50 W/m² hour counts half as much as a bright one.
pub const IRRADIANCE_HALF_SATURATION: f64 = 50.0;

/// Observation weight for a learning sample at the given irradiance.
pub fn irradiance_weight(irradiance: f64) -> f64 {
    if irradiance <= 0.0 {
        return 0.0;
    }
    irradiance / (irradiance + IRRADIANCE_HALF_SATURATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irradiance_weight_saturates() {
        assert_eq!(irradiance_weight(0.0), 0.0);
        assert_eq!(irradiance_weight(-10.0), 0.0);
        assert!((irradiance_weight(50.0) - 0.5).abs() < 1e-12);
        assert!(irradiance_weight(800.0) > 0.9);
        assert!(irradiance_weight(800.0) < 1.0);
    }
}
