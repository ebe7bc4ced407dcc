//! Day-ahead spot price providers and the ingestion pipeline.
//!
//! A provider either returns the complete quarter-hour slot set for a date or
//! reports it absent (the usual case for tomorrow before publication time).

pub mod awattar;
pub mod ingest;
pub mod spot_hinta;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::PriceSource;
use crate::domain::PriceSlot;

pub use ingest::PriceIngestor;

/// Slots per day; a day with any other count is not usable.
pub const SLOTS_PER_DAY: usize = 96;

#[derive(Debug)]
pub enum PriceFetch {
    /// The full slot set plus the raw payload for archiving.
    Present { slots: Vec<PriceSlot>, raw: String },
    /// Upstream has not published the date yet.
    Absent,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch all 96 slots of the local date `date` (`"YYYY-MM-DD"`).
    async fn fetch(&self, date: &str, region: &str) -> Result<PriceFetch>;
}

/// Build the configured provider.
pub fn provider_for(source: PriceSource, tz: chrono_tz::Tz) -> Result<Box<dyn PriceProvider>> {
    Ok(match source {
        PriceSource::Awattar => Box::new(awattar::AwattarProvider::new(tz)?),
        PriceSource::SpotHinta => Box::new(spot_hinta::SpotHintaProvider::new()?),
    })
}

/// Expand one hourly price into its four quarter slots.
pub(crate) fn expand_hour(hour_ts: &str, price: f64, region: &str) -> Result<Vec<PriceSlot>> {
    let mut slots = Vec::with_capacity(4);
    for offset in [0i64, 15, 30, 45] {
        slots.push(PriceSlot {
            slot_ts: crate::clock::shift_minutes(hour_ts, offset)?,
            price,
            region: region.to_string(),
        });
    }
    Ok(slots)
}
