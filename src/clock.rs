//! Local-time keys and 15-minute slot math.
//!
//! Every timestamp key in the system is a `"YYYY-MM-DDTHH:MM"` string in the
//! operator's configured zone. Keys are parsed by string surgery so that the
//! host's zone database can never perturb them; the single place a zone
//! database is consulted is [`now_local`], which renders a universal instant
//! into the operator zone.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Calendar fields extracted from a `"YYYY-MM-DDTHH:MM"` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

/// Render the current instant as a local key in `tz`.
pub fn now_local(tz: Tz) -> String {
    Utc::now().with_timezone(&tz).format(TS_FORMAT).to_string()
}

/// Extract the calendar fields of a key without any zone conversion.
pub fn parse(ts: &str) -> Result<TsParts> {
    if ts.len() != 16 || ts.as_bytes()[10] != b'T' {
        bail!("malformed timestamp key {ts:?}, expected YYYY-MM-DDTHH:MM");
    }
    let field = |range: std::ops::Range<usize>| -> Result<u32> {
        ts[range.clone()]
            .parse::<u32>()
            .with_context(|| format!("non-numeric field in timestamp key {ts:?}"))
    };
    let parts = TsParts {
        year: field(0..4)? as i32,
        month: field(5..7)?,
        day: field(8..10)?,
        hour: field(11..13)?,
        minute: field(14..16)?,
    };
    if parts.month < 1 || parts.month > 12 || parts.day < 1 || parts.day > 31 {
        bail!("out-of-range date in timestamp key {ts:?}");
    }
    if parts.hour > 23 || parts.minute > 59 {
        bail!("out-of-range time in timestamp key {ts:?}");
    }
    Ok(parts)
}

/// Round a key down to the nearest quarter-hour boundary.
pub fn slot_start(ts: &str) -> Result<String> {
    let parts = parse(ts)?;
    Ok(format!("{}{:02}", &ts[..14], parts.minute / 15 * 15))
}

/// Round a key down to the top of its hour.
pub fn hour_start(ts: &str) -> Result<String> {
    parse(ts)?;
    Ok(format!("{}00", &ts[..14]))
}

/// The `"YYYY-MM-DD"` date portion of a key.
pub fn date_of(ts: &str) -> &str {
    &ts[..10.min(ts.len())]
}

/// Shift a key by whole minutes. Pure wall-clock arithmetic, no zone.
pub fn shift_minutes(ts: &str, minutes: i64) -> Result<String> {
    let naive = NaiveDateTime::parse_from_str(ts, TS_FORMAT)
        .with_context(|| format!("unparseable timestamp key {ts:?}"))?;
    let shifted = naive
        .checked_add_signed(chrono::Duration::minutes(minutes))
        .context("timestamp arithmetic overflow")?;
    Ok(shifted.format(TS_FORMAT).to_string())
}

pub fn shift_hours(ts: &str, hours: i64) -> Result<String> {
    shift_minutes(ts, hours * 60)
}

pub fn shift_days(ts: &str, days: i64) -> Result<String> {
    shift_minutes(ts, days * 24 * 60)
}

/// The 96 quarter-hour keys of the day containing `ts`, in order.
pub fn day_slots(ts: &str) -> Result<Vec<String>> {
    parse(ts)?;
    let date = date_of(ts);
    let mut slots = Vec::with_capacity(96);
    for hour in 0..24 {
        for minute in [0, 15, 30, 45] {
            slots.push(format!("{date}T{hour:02}:{minute:02}"));
        }
    }
    Ok(slots)
}

/// The 24 hour keys of the day containing `ts`, in order.
pub fn day_hours(ts: &str) -> Result<Vec<String>> {
    parse(ts)?;
    let date = date_of(ts);
    Ok((0..24).map(|hour| format!("{date}T{hour:02}:00")).collect())
}

const DAYS_BEFORE_MONTH: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// Non-leap day-of-year index in `1..=365`. Feb 29 folds onto index 60.
pub fn day_of_year(month: u32, day: u32) -> u32 {
    let doy = DAYS_BEFORE_MONTH[(month as usize - 1).min(11)] + day;
    doy.min(365)
}

/// The instant `now` rendered in `tz`, broken into (hour, minute) for the
/// orchestrator's cadence checks.
pub fn local_hour_minute(tz: Tz) -> (u32, u32) {
    let local = Utc::now().with_timezone(&tz);
    (local.hour(), local.minute())
}

/// Seconds to sleep to land just past the next wall-clock minute boundary in
/// `tz`, so a woken tick always reads the new minute.
pub fn seconds_to_next_minute(tz: Tz) -> u64 {
    let local = Utc::now().with_timezone(&tz);
    60 - (local.second() as u64).min(59) + 1
}

/// Day-of-month of the key's date, used for matrix cell addressing.
pub fn month_day_hour(ts: &str) -> Result<(u32, u32, u32)> {
    let parts = parse(ts)?;
    Ok((parts.month, parts.day, parts.hour))
}

/// True when the key lands exactly on a quarter boundary.
pub fn is_slot_aligned(ts: &str) -> bool {
    matches!(parse(ts), Ok(parts) if parts.minute % 15 == 0)
}

/// Weekday-independent ISO date arithmetic for provider requests.
pub fn shift_date(date: &str, days: i64) -> Result<String> {
    let shifted = shift_days(&format!("{date}T00:00"), days)?;
    Ok(shifted[..10].to_string())
}
