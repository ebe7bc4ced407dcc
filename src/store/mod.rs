//! SQLite store facade.
//!
//! Every table from the data model lives in one local database file. All
//! access goes through the typed operations here; multi-row writes that form
//! one logical operation (schedule replacement, smoother rebuild) run in a
//! single transaction.

mod schema;

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::domain::{
    ConsumptionReading, ConsumptionSource, EnergySnapshot, MatrixCell, PipelineRun, PipelineStatus,
    PriceSlot, ScheduleSlot, SlotAction, SmoothedCell, SolarReading,
};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up,
    /// including the exhaustive correction-matrix seed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        let seeded = schema::seed_correction_matrix(&conn)?;
        if seeded > 0 {
            info!(cells = seeded, "seeded correction matrix");
        }
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store mutex poisoned"))
    }

    // ----- solar readings -----

    pub fn upsert_irradiance(&self, hour_ts: &str, irradiance: f64) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO solar_readings (hour_ts, irradiance) VALUES (?1, ?2)
                 ON CONFLICT (hour_ts) DO UPDATE SET irradiance = excluded.irradiance",
                params![hour_ts, irradiance],
            )
            .context("failed to upsert irradiance")?;
        Ok(())
    }

    pub fn update_forecast(
        &self,
        hour_ts: &str,
        forecast_kwh: f64,
        confidence: f64,
        correction_applied: f64,
    ) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE solar_readings
                 SET forecast_kwh = ?2, confidence = ?3, correction_applied = ?4
                 WHERE hour_ts = ?1",
                params![hour_ts, forecast_kwh, confidence, correction_applied],
            )
            .context("failed to update forecast")?;
        if n == 0 {
            bail!("no solar reading at {hour_ts} to attach a forecast to");
        }
        Ok(())
    }

    pub fn update_actual(&self, hour_ts: &str, actual_kwh: f64) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE solar_readings SET actual_kwh = ?2 WHERE hour_ts = ?1",
                params![hour_ts, actual_kwh],
            )
            .context("failed to update actual production")?;
        if n == 0 {
            debug!(hour_ts, "no reading for realized hour, nothing to learn from");
        }
        Ok(())
    }

    pub fn update_correction(&self, hour_ts: &str, correction: f64) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE solar_readings SET correction = ?2 WHERE hour_ts = ?1",
                params![hour_ts, correction],
            )
            .context("failed to update correction")?;
        if n == 0 {
            bail!("no solar reading at {hour_ts} to attach a correction to");
        }
        Ok(())
    }

    /// Rows with irradiance but no model forecast yet.
    pub fn get_pending_forecasts(&self) -> Result<Vec<SolarReading>> {
        self.query_readings("WHERE forecast_kwh IS NULL ORDER BY hour_ts")
    }

    /// Rows the learner still has to fold into the matrix: realized actuals
    /// with a positive forecast and no derived correction.
    pub fn get_unprocessed_actuals(&self) -> Result<Vec<SolarReading>> {
        self.query_readings(
            "WHERE actual_kwh IS NOT NULL AND correction IS NULL AND forecast_kwh > 0
             ORDER BY hour_ts",
        )
    }

    /// Rows feeding the recency-bias window: realized, forecast, and the
    /// correction the model applied at forecast time.
    pub fn get_recent_realized(&self, from_ts: &str) -> Result<Vec<SolarReading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour_ts, irradiance, forecast_kwh, correction_applied, confidence,
                    actual_kwh, correction
             FROM solar_readings
             WHERE hour_ts >= ?1 AND irradiance > 0 AND forecast_kwh > 0
               AND actual_kwh IS NOT NULL AND correction_applied IS NOT NULL
             ORDER BY hour_ts",
        )?;
        let rows = stmt
            .query_map(params![from_ts], row_to_reading)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load recency window")?;
        Ok(rows)
    }

    /// The most recent realized reading for a given hour-of-day, used for
    /// back-calculating a correction when a matrix cell is empty.
    pub fn get_latest_actual_for_hour(&self, hour: u32) -> Result<Option<SolarReading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour_ts, irradiance, forecast_kwh, correction_applied, confidence,
                    actual_kwh, correction
             FROM solar_readings
             WHERE substr(hour_ts, 12, 2) = printf('%02d', ?1)
               AND actual_kwh IS NOT NULL AND irradiance > 0
             ORDER BY hour_ts DESC LIMIT 1",
        )?;
        let row = stmt
            .query_row(params![hour], row_to_reading)
            .optional()
            .context("failed to load latest actual for hour")?;
        Ok(row)
    }

    /// Rows usable by the smoother: a derived correction and a confidence.
    pub fn get_readings_for_smoothing(&self) -> Result<Vec<SolarReading>> {
        self.query_readings("WHERE correction IS NOT NULL ORDER BY hour_ts")
    }

    pub fn get_readings_for_range(&self, from: &str, to: &str) -> Result<Vec<SolarReading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour_ts, irradiance, forecast_kwh, correction_applied, confidence,
                    actual_kwh, correction
             FROM solar_readings WHERE hour_ts >= ?1 AND hour_ts < ?2 ORDER BY hour_ts",
        )?;
        let rows = stmt
            .query_map(params![from, to], row_to_reading)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load solar readings")?;
        Ok(rows)
    }

    fn query_readings(&self, tail: &str) -> Result<Vec<SolarReading>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT hour_ts, irradiance, forecast_kwh, correction_applied, confidence,
                    actual_kwh, correction
             FROM solar_readings {tail}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_reading)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load solar readings")?;
        Ok(rows)
    }

    // ----- correction matrix -----

    /// The matrix is seeded for every valid calendar triple, so a miss here
    /// means an out-of-domain key.
    pub fn get_correction_cell(&self, month: u32, day: u32, hour: u32) -> Result<MatrixCell> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT month, day, hour, avg_correction, total_weight, sample_count,
                    max_actual_kwh, updated_at
             FROM correction_matrix WHERE month = ?1 AND day = ?2 AND hour = ?3",
            params![month, day, hour],
            row_to_cell,
        )
        .with_context(|| format!("no correction cell for {month:02}-{day:02} h{hour:02}"))
    }

    pub fn update_correction_matrix(
        &self,
        month: u32,
        day: u32,
        hour: u32,
        avg: f64,
        count: i64,
        total_weight: f64,
        max_actual_kwh: f64,
        updated_at: &str,
    ) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE correction_matrix
                 SET avg_correction = ?4, sample_count = ?5, total_weight = ?6,
                     max_actual_kwh = ?7, updated_at = ?8
                 WHERE month = ?1 AND day = ?2 AND hour = ?3",
                params![month, day, hour, avg, count, total_weight, max_actual_kwh, updated_at],
            )
            .context("failed to update correction matrix cell")?;
        if n == 0 {
            bail!("correction cell {month:02}-{day:02} h{hour:02} missing, matrix not seeded?");
        }
        Ok(())
    }

    pub fn upsert_smoothed(&self, day_of_year: u32, hour: u32, avg: f64, count: i64) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO correction_matrix_smooth (day_of_year, hour, avg_correction, sample_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (day_of_year, hour) DO UPDATE
                 SET avg_correction = excluded.avg_correction,
                     sample_count = excluded.sample_count",
                params![day_of_year, hour, avg, count],
            )
            .context("failed to upsert smoothed cell")?;
        Ok(())
    }

    /// Replace the smoother's output in one transaction.
    pub fn upsert_smoothed_batch(&self, cells: &[SmoothedCell]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin smoother transaction")?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO correction_matrix_smooth (day_of_year, hour, avg_correction, sample_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (day_of_year, hour) DO UPDATE
                 SET avg_correction = excluded.avg_correction,
                     sample_count = excluded.sample_count",
            )?;
            for cell in cells {
                stmt.execute(params![
                    cell.day_of_year,
                    cell.hour,
                    cell.avg_correction,
                    cell.sample_count
                ])?;
            }
        }
        tx.commit().context("failed to commit smoothed cells")?;
        debug!(cells = cells.len(), "smoothed matrix updated");
        Ok(())
    }

    pub fn get_smoothed_cell(&self, day_of_year: u32, hour: u32) -> Result<Option<SmoothedCell>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT day_of_year, hour, avg_correction, sample_count
                 FROM correction_matrix_smooth WHERE day_of_year = ?1 AND hour = ?2",
                params![day_of_year, hour],
                |row| {
                    Ok(SmoothedCell {
                        day_of_year: row.get(0)?,
                        hour: row.get(1)?,
                        avg_correction: row.get(2)?,
                        sample_count: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ----- prices -----

    pub fn upsert_price(&self, slot_ts: &str, price: f64, region: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO prices (slot_ts, price, region) VALUES (?1, ?2, ?3)
                 ON CONFLICT (slot_ts) DO UPDATE
                 SET price = excluded.price, region = excluded.region",
                params![slot_ts, price, region],
            )
            .context("failed to upsert price")?;
        Ok(())
    }

    pub fn upsert_price_batch(&self, slots: &[PriceSlot]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin price transaction")?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO prices (slot_ts, price, region) VALUES (?1, ?2, ?3)
                 ON CONFLICT (slot_ts) DO UPDATE
                 SET price = excluded.price, region = excluded.region",
            )?;
            for slot in slots {
                stmt.execute(params![slot.slot_ts, slot.price, slot.region])?;
            }
        }
        tx.commit().context("failed to commit prices")?;
        Ok(())
    }

    pub fn get_prices_for_range(&self, from: &str, to: &str) -> Result<Vec<PriceSlot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT slot_ts, price, region FROM prices
             WHERE slot_ts >= ?1 AND slot_ts < ?2 ORDER BY slot_ts",
        )?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                Ok(PriceSlot {
                    slot_ts: row.get(0)?,
                    price: row.get(1)?,
                    region: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load prices")?;
        Ok(rows)
    }

    // ----- consumption -----

    pub fn upsert_consumption(
        &self,
        hour_ts: &str,
        watts: f64,
        temperature_c: Option<f64>,
        source: ConsumptionSource,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO consumption (hour_ts, watts, temperature_c, source)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (hour_ts) DO UPDATE
                 SET watts = excluded.watts, temperature_c = excluded.temperature_c,
                     source = excluded.source",
                params![hour_ts, watts, temperature_c, source.as_str()],
            )
            .context("failed to upsert consumption")?;
        Ok(())
    }

    pub fn get_consumption_for_range(&self, from: &str, to: &str) -> Result<Vec<ConsumptionReading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour_ts, watts, temperature_c, source FROM consumption
             WHERE hour_ts >= ?1 AND hour_ts < ?2 ORDER BY hour_ts",
        )?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                let source: String = row.get(3)?;
                Ok(ConsumptionReading {
                    hour_ts: row.get(0)?,
                    watts: row.get(1)?,
                    temperature_c: row.get(2)?,
                    source: ConsumptionSource::parse(&source).unwrap_or(ConsumptionSource::Manual),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load consumption")?;
        Ok(rows)
    }

    // ----- energy snapshots -----

    pub fn upsert_energy_snapshot(&self, snap: &EnergySnapshot) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO energy_snapshots (ts, pv_kwh, load_kwh, grid_import_kwh, grid_export_kwh)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (ts) DO UPDATE
                 SET pv_kwh = excluded.pv_kwh, load_kwh = excluded.load_kwh,
                     grid_import_kwh = excluded.grid_import_kwh,
                     grid_export_kwh = excluded.grid_export_kwh",
                params![snap.ts, snap.pv_kwh, snap.load_kwh, snap.grid_import_kwh, snap.grid_export_kwh],
            )
            .context("failed to upsert energy snapshot")?;
        Ok(())
    }

    pub fn get_snapshot_at_or_before(&self, ts: &str) -> Result<Option<EnergySnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT ts, pv_kwh, load_kwh, grid_import_kwh, grid_export_kwh
                 FROM energy_snapshots WHERE ts <= ?1 ORDER BY ts DESC LIMIT 1",
                params![ts],
                |row| {
                    Ok(EnergySnapshot {
                        ts: row.get(0)?,
                        pv_kwh: row.get(1)?,
                        load_kwh: row.get(2)?,
                        grid_import_kwh: row.get(3)?,
                        grid_export_kwh: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("failed to load energy snapshot")?;
        Ok(row)
    }

    pub fn get_snapshots_for_range(&self, from: &str, to: &str) -> Result<Vec<EnergySnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ts, pv_kwh, load_kwh, grid_import_kwh, grid_export_kwh
             FROM energy_snapshots WHERE ts >= ?1 AND ts < ?2 ORDER BY ts",
        )?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                Ok(EnergySnapshot {
                    ts: row.get(0)?,
                    pv_kwh: row.get(1)?,
                    load_kwh: row.get(2)?,
                    grid_import_kwh: row.get(3)?,
                    grid_export_kwh: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load energy snapshots")?;
        Ok(rows)
    }

    // ----- schedule -----

    pub fn delete_schedule_for_range(&self, from: &str, to: &str) -> Result<usize> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM schedule WHERE slot_ts >= ?1 AND slot_ts < ?2",
                params![from, to],
            )
            .context("failed to delete schedule range")?;
        Ok(n)
    }

    pub fn upsert_schedule_batch(&self, slots: &[ScheduleSlot]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin schedule transaction")?;
        insert_schedule_slots(&tx, slots)?;
        tx.commit().context("failed to commit schedule")?;
        Ok(())
    }

    /// Delete-then-insert for `[from, to)` in one transaction, so readers
    /// never observe a partial schedule.
    pub fn replace_schedule_range(&self, from: &str, to: &str, slots: &[ScheduleSlot]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin schedule transaction")?;
        tx.execute(
            "DELETE FROM schedule WHERE slot_ts >= ?1 AND slot_ts < ?2",
            params![from, to],
        )?;
        insert_schedule_slots(&tx, slots)?;
        tx.commit().context("failed to commit schedule")?;
        debug!(from, to, slots = slots.len(), "schedule replaced");
        Ok(())
    }

    pub fn get_schedule_for_range(&self, from: &str, to: &str) -> Result<Vec<ScheduleSlot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT slot_ts, action, target_w, soc_start_pct, soc_end_pct, price, solar_w, consumption_w
             FROM schedule WHERE slot_ts >= ?1 AND slot_ts < ?2 ORDER BY slot_ts",
        )?;
        let rows = stmt
            .query_map(params![from, to], row_to_schedule_slot)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load schedule")?;
        Ok(rows)
    }

    // ----- pipeline ledger -----

    pub fn record_pipeline_run(&self, name: &str, status: PipelineStatus, ts: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO pipeline_runs (name, last_run_ts, last_status) VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO UPDATE
                 SET last_run_ts = excluded.last_run_ts, last_status = excluded.last_status",
                params![name, ts, status.as_str()],
            )
            .context("failed to record pipeline run")?;
        Ok(())
    }

    pub fn get_all_pipeline_runs(&self) -> Result<Vec<PipelineRun>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name, last_run_ts, last_status FROM pipeline_runs ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(2)?;
                Ok(PipelineRun {
                    name: row.get(0)?,
                    last_run_ts: row.get(1)?,
                    last_status: PipelineStatus::parse(&status).unwrap_or(PipelineStatus::NeverRun),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to load pipeline ledger")?;
        Ok(rows)
    }
}

fn insert_schedule_slots(tx: &rusqlite::Transaction<'_>, slots: &[ScheduleSlot]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO schedule
             (slot_ts, action, target_w, soc_start_pct, soc_end_pct, price, solar_w, consumption_w)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (slot_ts) DO UPDATE
         SET action = excluded.action, target_w = excluded.target_w,
             soc_start_pct = excluded.soc_start_pct, soc_end_pct = excluded.soc_end_pct,
             price = excluded.price, solar_w = excluded.solar_w,
             consumption_w = excluded.consumption_w",
    )?;
    for slot in slots {
        stmt.execute(params![
            slot.slot_ts,
            slot.action.as_str(),
            slot.target_w,
            slot.soc_start_pct,
            slot.soc_end_pct,
            slot.price,
            slot.solar_w,
            slot.consumption_w,
        ])?;
    }
    Ok(())
}

fn row_to_reading(row: &rusqlite::Row<'_>) -> rusqlite::Result<SolarReading> {
    Ok(SolarReading {
        hour_ts: row.get(0)?,
        irradiance: row.get(1)?,
        forecast_kwh: row.get(2)?,
        correction_applied: row.get(3)?,
        confidence: row.get(4)?,
        actual_kwh: row.get(5)?,
        correction: row.get(6)?,
    })
}

fn row_to_cell(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatrixCell> {
    Ok(MatrixCell {
        month: row.get(0)?,
        day: row.get(1)?,
        hour: row.get(2)?,
        avg_correction: row.get(3)?,
        total_weight: row.get(4)?,
        sample_count: row.get(5)?,
        max_actual_kwh: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_schedule_slot(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleSlot> {
    let action: String = row.get(1)?;
    Ok(ScheduleSlot {
        slot_ts: row.get(0)?,
        action: SlotAction::parse(&action).unwrap_or(SlotAction::Idle),
        target_w: row.get(2)?,
        soc_start_pct: row.get(3)?,
        soc_end_pct: row.get(4)?,
        price: row.get(5)?,
        solar_w: row.get(6)?,
        consumption_w: row.get(7)?,
    })
}
