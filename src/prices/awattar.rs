//! aWATTar hourly day-ahead prices.
//!
//! The marketdata endpoint returns hourly items priced in EUR/MWh. Each hour
//! divides by 1000 and fans out into four quarter slots. Next-day data
//! appears around 14:00 local; before that the response for tomorrow is
//! simply short, which maps to `Absent`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{expand_hour, PriceFetch, PriceProvider, SLOTS_PER_DAY};
use crate::clock;

const DEFAULT_BASE_URL: &str = "https://api.awattar.de";

pub struct AwattarProvider {
    client: Client,
    base_url: String,
    tz: Tz,
}

impl AwattarProvider {
    pub fn new(tz: Tz) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), tz)
    }

    pub fn with_base_url(base_url: String, tz: Tz) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build price HTTP client")?;
        Ok(Self { client, base_url, tz })
    }

    /// Epoch-millisecond bounds of the local calendar date.
    fn day_bounds_ms(&self, date: &str) -> Result<(i64, i64)> {
        let parts = clock::parse(&format!("{date}T00:00"))?;
        let start = self
            .tz
            .with_ymd_and_hms(parts.year, parts.month, parts.day, 0, 0, 0)
            .earliest()
            .with_context(|| format!("no midnight in {} on {date}", self.tz))?;
        let next = clock::shift_date(date, 1)?;
        let parts = clock::parse(&format!("{next}T00:00"))?;
        let end = self
            .tz
            .with_ymd_and_hms(parts.year, parts.month, parts.day, 0, 0, 0)
            .earliest()
            .with_context(|| format!("no midnight in {} on {next}", self.tz))?;
        Ok((start.timestamp_millis(), end.timestamp_millis()))
    }
}

#[async_trait]
impl PriceProvider for AwattarProvider {
    fn name(&self) -> &'static str {
        "awattar"
    }

    async fn fetch(&self, date: &str, region: &str) -> Result<PriceFetch> {
        let (start_ms, end_ms) = self.day_bounds_ms(date)?;
        let url = format!(
            "{}/v1/marketdata?start={start_ms}&end={end_ms}",
            self.base_url.trim_end_matches('/'),
        );
        debug!(%url, date, "fetching day-ahead prices");

        let response = self.client.get(&url).send().await.context("price request failed")?;
        if !response.status().is_success() {
            bail!("price provider returned {}", response.status());
        }
        let raw = response.text().await.context("failed to read price response")?;
        let parsed: MarketdataResponse =
            serde_json::from_str(&raw).context("malformed marketdata response")?;

        // A short day means upstream has not published it yet.
        if parsed.data.len() < 24 {
            debug!(date, items = parsed.data.len(), "day-ahead data not published yet");
            return Ok(PriceFetch::Absent);
        }

        let mut slots = Vec::with_capacity(SLOTS_PER_DAY);
        for item in &parsed.data {
            let per_kwh = match item.unit.as_deref() {
                Some(unit) if unit.contains("MWh") => item.marketprice / 1000.0,
                Some(_) => item.marketprice,
                None => item.marketprice / 1000.0,
            };
            let local = chrono::Utc
                .timestamp_millis_opt(item.start_timestamp)
                .single()
                .context("out-of-range hour timestamp in marketdata")?
                .with_timezone(&self.tz);
            let hour_ts = local.format(clock::TS_FORMAT).to_string();
            if clock::date_of(&hour_ts) != date {
                continue;
            }
            slots.extend(expand_hour(&hour_ts, per_kwh, region)?);
        }

        if slots.len() != SLOTS_PER_DAY {
            debug!(date, slots = slots.len(), "incomplete day after expansion");
            return Ok(PriceFetch::Absent);
        }
        Ok(PriceFetch::Present { slots, raw })
    }
}

#[derive(Debug, Deserialize)]
struct MarketdataResponse {
    data: Vec<MarketdataItem>,
}

#[derive(Debug, Deserialize)]
struct MarketdataItem {
    start_timestamp: i64,
    marketprice: f64,
    unit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marketdata_parses() {
        let raw = r#"{"object":"list","data":[
            {"start_timestamp":1748728800000,"end_timestamp":1748732400000,
             "marketprice":82.45,"unit":"Eur/MWh"}
        ],"url":"/de/v1/marketdata"}"#;
        let parsed: MarketdataResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].marketprice, 82.45);
        assert_eq!(parsed.data[0].unit.as_deref(), Some("Eur/MWh"));
    }

    #[test]
    fn day_bounds_span_24_hours_on_a_plain_day() {
        let provider =
            AwattarProvider::with_base_url("http://localhost".into(), chrono_tz::Europe::Berlin)
                .unwrap();
        let (start, end) = provider.day_bounds_ms("2025-06-01").unwrap();
        assert_eq!(end - start, 24 * 3600 * 1000);
    }

    #[test]
    fn day_bounds_honor_dst_transitions() {
        let provider =
            AwattarProvider::with_base_url("http://localhost".into(), chrono_tz::Europe::Berlin)
                .unwrap();
        // Spring-forward day has 23 hours.
        let (start, end) = provider.day_bounds_ms("2025-03-30").unwrap();
        assert_eq!(end - start, 23 * 3600 * 1000);
    }
}
