use anyhow::{Context, Result};
use rusqlite::{params, Connection};

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS solar_readings (
            hour_ts            TEXT PRIMARY KEY,
            irradiance         REAL NOT NULL,
            forecast_kwh       REAL,
            correction_applied REAL,
            confidence         REAL NOT NULL DEFAULT 0,
            actual_kwh         REAL,
            correction         REAL
        );

        CREATE TABLE IF NOT EXISTS correction_matrix (
            month          INTEGER NOT NULL,
            day            INTEGER NOT NULL,
            hour           INTEGER NOT NULL,
            avg_correction REAL NOT NULL DEFAULT 1.0,
            total_weight   REAL NOT NULL DEFAULT 0,
            sample_count   INTEGER NOT NULL DEFAULT 0,
            max_actual_kwh REAL NOT NULL DEFAULT 0,
            updated_at     TEXT,
            PRIMARY KEY (month, day, hour)
        );

        CREATE TABLE IF NOT EXISTS correction_matrix_smooth (
            day_of_year    INTEGER NOT NULL,
            hour           INTEGER NOT NULL,
            avg_correction REAL NOT NULL,
            sample_count   INTEGER NOT NULL,
            PRIMARY KEY (day_of_year, hour)
        );

        CREATE TABLE IF NOT EXISTS prices (
            slot_ts TEXT PRIMARY KEY,
            price   REAL NOT NULL,
            region  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS consumption (
            hour_ts       TEXT PRIMARY KEY,
            watts         REAL NOT NULL,
            temperature_c REAL,
            source        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS energy_snapshots (
            ts              TEXT PRIMARY KEY,
            pv_kwh          REAL NOT NULL,
            load_kwh        REAL NOT NULL,
            grid_import_kwh REAL NOT NULL,
            grid_export_kwh REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schedule (
            slot_ts       TEXT PRIMARY KEY,
            action        TEXT NOT NULL,
            target_w      REAL NOT NULL,
            soc_start_pct REAL NOT NULL,
            soc_end_pct   REAL NOT NULL,
            price         REAL NOT NULL,
            solar_w       REAL NOT NULL,
            consumption_w REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            name        TEXT PRIMARY KEY,
            last_run_ts TEXT,
            last_status TEXT NOT NULL DEFAULT 'never_run'
        );

        CREATE INDEX IF NOT EXISTS idx_readings_actual
            ON solar_readings (actual_kwh) WHERE actual_kwh IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON energy_snapshots (ts DESC);",
    )
    .context("failed to initialize schema")
}

/// Days in each month of the matrix calendar; Feb 29 is a real cell.
const MONTH_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Seed every valid (month, day, hour) triple with a unit cell. Idempotent;
/// returns how many cells were newly inserted.
pub fn seed_correction_matrix(conn: &Connection) -> Result<usize> {
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM correction_matrix", [], |row| row.get(0))
        .context("failed to count matrix cells")?;
    let expected: usize = MONTH_DAYS.iter().map(|&d| d as usize * 24).sum();
    if existing as usize >= expected {
        return Ok(0);
    }

    let mut inserted = 0usize;
    conn.execute_batch("BEGIN")?;
    {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO correction_matrix (month, day, hour) VALUES (?1, ?2, ?3)",
        )?;
        for (month_idx, &days) in MONTH_DAYS.iter().enumerate() {
            let month = month_idx as u32 + 1;
            for day in 1..=days {
                for hour in 0..24u32 {
                    inserted += stmt.execute(params![month, day, hour])?;
                }
            }
        }
    }
    conn.execute_batch("COMMIT").context("failed to commit matrix seed")?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_exhaustive_and_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        let first = seed_correction_matrix(&conn).unwrap();
        assert_eq!(first, 366 * 24);
        let second = seed_correction_matrix(&conn).unwrap();
        assert_eq!(second, 0);
    }
}
