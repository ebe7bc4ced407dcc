//! Irradiance and temperature forecasts from the Open-Meteo API.
//!
//! Responses are returned together with the raw payload so the caller can
//! archive them for replay before anything is parsed further.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";

/// One forecast hour, keyed in the operator zone.
#[derive(Debug, Clone)]
pub struct HourlyWeather {
    pub hour_ts: String,
    /// Global shortwave irradiance, W/m².
    pub irradiance: f64,
    pub temperature_c: f64,
}

pub struct WeatherClient {
    client: Client,
    base_url: String,
}

impl WeatherClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build weather HTTP client")?;
        Ok(Self { client, base_url })
    }

    /// Hourly irradiance and temperature for the next `horizon_hours`,
    /// with timestamps rendered by the API directly in `timezone`.
    /// Returns the parsed hours and the raw response body.
    pub async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        timezone: &str,
        horizon_hours: u32,
    ) -> Result<(Vec<HourlyWeather>, String)> {
        let days = horizon_hours.div_ceil(24).max(1) + 1;
        let url = format!(
            "{}/v1/forecast?latitude={lat:.4}&longitude={lon:.4}\
             &hourly=shortwave_radiation,temperature_2m&timezone={}&forecast_days={days}",
            self.base_url.trim_end_matches('/'),
            urlencode(timezone),
        );
        debug!(%url, "fetching weather forecast");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("weather request failed")?;
        if !response.status().is_success() {
            bail!("weather provider returned {}", response.status());
        }
        let raw = response.text().await.context("failed to read weather response")?;
        let parsed: ForecastResponse =
            serde_json::from_str(&raw).context("malformed weather response")?;

        let hourly = parsed.hourly;
        if hourly.time.len() != hourly.shortwave_radiation.len()
            || hourly.time.len() != hourly.temperature_2m.len()
        {
            bail!("weather response arrays disagree on length");
        }

        let hours = hourly
            .time
            .into_iter()
            .zip(hourly.shortwave_radiation)
            .zip(hourly.temperature_2m)
            .map(|((hour_ts, irradiance), temperature_c)| HourlyWeather {
                hour_ts,
                irradiance: irradiance.unwrap_or(0.0).max(0.0),
                temperature_c: temperature_c.unwrap_or(0.0),
            })
            .collect();
        Ok((hours, raw))
    }

    /// Current outdoor temperature at the site.
    pub async fn fetch_current_temperature(&self, lat: f64, lon: f64) -> Result<f64> {
        let url = format!(
            "{}/v1/forecast?latitude={lat:.4}&longitude={lon:.4}&current_weather=true",
            self.base_url.trim_end_matches('/'),
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("current-weather request failed")?;
        if !response.status().is_success() {
            bail!("weather provider returned {}", response.status());
        }
        let parsed: CurrentResponse = response
            .json()
            .await
            .context("malformed current-weather response")?;
        Ok(parsed.current_weather.temperature)
    }
}

fn urlencode(s: &str) -> String {
    s.replace('/', "%2F")
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    shortwave_radiation: Vec<Option<f64>>,
    temperature_2m: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
}
