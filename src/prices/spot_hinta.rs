//! spot-hinta.fi quarter-hour prices.
//!
//! The API already returns native 15-minute slots with local-offset
//! timestamps, so normalization is a string slice: the first 16 characters of
//! the ISO timestamp are exactly our key format. No zone math involved.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{PriceFetch, PriceProvider, SLOTS_PER_DAY};
use crate::clock;
use crate::domain::PriceSlot;

const DEFAULT_BASE_URL: &str = "https://api.spot-hinta.fi";

pub struct SpotHintaProvider {
    client: Client,
    base_url: String,
}

impl SpotHintaProvider {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build price HTTP client")?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PriceProvider for SpotHintaProvider {
    fn name(&self) -> &'static str {
        "spot_hinta"
    }

    async fn fetch(&self, date: &str, region: &str) -> Result<PriceFetch> {
        let url = format!("{}/TodayAndDayForward", self.base_url.trim_end_matches('/'));
        debug!(%url, date, "fetching quarter-hour prices");

        let response = self.client.get(&url).send().await.context("price request failed")?;
        if !response.status().is_success() {
            bail!("price provider returned {}", response.status());
        }
        let raw = response.text().await.context("failed to read price response")?;
        let items: Vec<SpotHintaItem> =
            serde_json::from_str(&raw).context("malformed spot-hinta response")?;

        let slots: Vec<PriceSlot> = items
            .iter()
            .filter_map(|item| {
                let slot_ts = item.date_time.get(..16)?.to_string();
                (clock::date_of(&slot_ts) == date).then(|| PriceSlot {
                    slot_ts,
                    price: item.price_no_tax,
                    region: region.to_string(),
                })
            })
            .collect();

        if slots.len() != SLOTS_PER_DAY {
            debug!(date, slots = slots.len(), "quarter-hour day incomplete");
            return Ok(PriceFetch::Absent);
        }
        if slots.iter().any(|s| !clock::is_slot_aligned(&s.slot_ts)) {
            bail!("provider returned a non-quarter-aligned slot");
        }
        Ok(PriceFetch::Present { slots, raw })
    }
}

#[derive(Debug, Deserialize)]
struct SpotHintaItem {
    #[serde(rename = "DateTime")]
    date_time: String,
    #[serde(rename = "PriceNoTax")]
    price_no_tax: f64,
}
