//! Pipeline freshness for the health endpoint: every pipeline must have run
//! within 1.5× its interval and its last run must not have errored.

use anyhow::Result;
use serde::Serialize;

use super::PIPELINES;
use crate::clock;
use crate::config::Config;
use crate::domain::PipelineStatus;
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct PipelineHealth {
    pub name: String,
    pub last_run_ts: Option<String>,
    pub last_status: PipelineStatus,
    pub overdue: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub pipelines: Vec<PipelineHealth>,
}

pub fn health_report(store: &Store, cfg: &Config, now_ts: &str) -> Result<HealthReport> {
    let runs = store.get_all_pipeline_runs()?;
    let mut healthy = true;
    let mut pipelines = Vec::with_capacity(PIPELINES.len());

    for &(name, interval_min) in PIPELINES {
        if cfg.inverter.data_collection_only && matches!(name, "battery" | "execute") {
            continue;
        }
        let run = runs.iter().find(|r| r.name == name);
        let allowed_age_min = (interval_min as f64 * 1.5) as i64;
        let stale_before = clock::shift_minutes(now_ts, -allowed_age_min)?;

        let (last_run_ts, last_status) = match run {
            Some(r) => (r.last_run_ts.clone(), r.last_status),
            None => (None, PipelineStatus::NeverRun),
        };
        let overdue = match &last_run_ts {
            Some(ts) => ts.as_str() < stale_before.as_str(),
            None => true,
        };
        if overdue || last_status == PipelineStatus::Error {
            healthy = false;
        }
        pipelines.push(PipelineHealth { name: name.to_string(), last_run_ts, last_status, overdue });
    }

    Ok(HealthReport { healthy, pipelines })
}
