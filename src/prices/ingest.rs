//! Price ingestion: fetch today and tomorrow, archive the raw payloads,
//! upsert complete days into the store.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{PriceFetch, PriceProvider, SLOTS_PER_DAY};
use crate::clock;
use crate::store::Store;

pub struct PriceIngestor<'a> {
    provider: &'a dyn PriceProvider,
    store: &'a Store,
    archive_dir: &'a Path,
    region: &'a str,
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub days_present: usize,
    pub days_absent: usize,
    pub slots_upserted: usize,
}

impl<'a> PriceIngestor<'a> {
    pub fn new(
        provider: &'a dyn PriceProvider,
        store: &'a Store,
        archive_dir: &'a Path,
        region: &'a str,
    ) -> Self {
        Self { provider, store, archive_dir, region }
    }

    /// Ingest today and tomorrow relative to the local date `today`.
    pub async fn run(&self, today: &str) -> Result<IngestSummary> {
        let tomorrow = clock::shift_date(today, 1)?;
        let mut summary = IngestSummary::default();

        for date in [today, tomorrow.as_str()] {
            match self.provider.fetch(date, self.region).await? {
                PriceFetch::Present { slots, raw } => {
                    self.archive(date, &raw);
                    if slots.len() != SLOTS_PER_DAY {
                        warn!(date, slots = slots.len(), "provider returned a partial day, skipping");
                        summary.days_absent += 1;
                        continue;
                    }
                    self.store.upsert_price_batch(&slots)?;
                    summary.days_present += 1;
                    summary.slots_upserted += slots.len();
                }
                PriceFetch::Absent => {
                    debug!(date, "prices not yet available");
                    summary.days_absent += 1;
                }
            }
        }

        info!(
            days = summary.days_present,
            slots = summary.slots_upserted,
            "price ingest complete"
        );
        Ok(summary)
    }

    /// Best effort: a failed archive write must never fail the pipeline.
    fn archive(&self, date: &str, raw: &str) {
        let dir: PathBuf = self.archive_dir.join("prices");
        let path = dir.join(format!("{date}-{}.json", self.provider.name()));
        let result = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, raw));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to archive price payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceSlot;
    use async_trait::async_trait;

    struct FixedProvider {
        today: Vec<PriceSlot>,
    }

    #[async_trait]
    impl PriceProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch(&self, date: &str, _region: &str) -> Result<PriceFetch> {
            if date == "2025-06-01" {
                Ok(PriceFetch::Present { slots: self.today.clone(), raw: "[]".to_string() })
            } else {
                Ok(PriceFetch::Absent)
            }
        }
    }

    fn full_day(date: &str) -> Vec<PriceSlot> {
        clock::day_slots(&format!("{date}T00:00"))
            .unwrap()
            .into_iter()
            .map(|slot_ts| PriceSlot { slot_ts, price: 0.05, region: "FI".to_string() })
            .collect()
    }

    #[tokio::test]
    async fn present_day_is_upserted_absent_day_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let provider = FixedProvider { today: full_day("2025-06-01") };
        let dir = std::env::temp_dir().join("solarctl-ingest-test");
        let ingestor = PriceIngestor::new(&provider, &store, &dir, "FI");

        let summary = ingestor.run("2025-06-01").await.unwrap();
        assert_eq!(summary.days_present, 1);
        assert_eq!(summary.days_absent, 1);
        assert_eq!(summary.slots_upserted, 96);

        let stored = store
            .get_prices_for_range("2025-06-01T00:00", "2025-06-02T00:00")
            .unwrap();
        assert_eq!(stored.len(), 96);
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let provider = FixedProvider { today: full_day("2025-06-01") };
        let dir = std::env::temp_dir().join("solarctl-ingest-test");
        let ingestor = PriceIngestor::new(&provider, &store, &dir, "FI");

        ingestor.run("2025-06-01").await.unwrap();
        ingestor.run("2025-06-01").await.unwrap();
        let stored = store
            .get_prices_for_range("2025-06-01T00:00", "2025-06-02T00:00")
            .unwrap();
        assert_eq!(stored.len(), 96);
    }
}
