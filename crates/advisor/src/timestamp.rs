//! Tolerant timestamp parsing for sheet-sourced telemetry.
//!
//! The ingestion sheet mixes several date encodings depending on which
//! gateway firmware or upload path wrote the row.  Everything is reduced to
//! Unix epoch milliseconds.  Parsing never fails: anything unrecognised maps
//! to [`UNPARSEABLE`] and is filtered out downstream.
//!
//! # Local time
//! Strings without an explicit offset are wall-clock time at the farm.  The
//! offset is passed in rather than read from the process environment so the
//! result is deterministic regardless of where the code runs.

use time::format_description::well_known::Rfc3339;
use time::macros::{date, format_description};
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Sentinel for "could not be parsed".
pub const UNPARSEABLE: i64 = 0;

/// Day zero of spreadsheet serial dates (Lotus 1-2-3 compatible).
const SERIAL_EPOCH: Date = date!(1899 - 12 - 30);

/// Serial number of 10000-01-01; anything at or past it is not a date.
const SERIAL_MAX: f64 = 2_958_466.0;

/// Integers at or above this are taken as epoch milliseconds (~1973-03-03).
const EPOCH_MS_MIN: i64 = 100_000_000_000;

const MS_PER_DAY: f64 = 86_400_000.0;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse a raw sheet timestamp into epoch milliseconds.
///
/// Accepted forms, tried in order:
/// - ISO 8601 with offset: `2024-05-01T12:00:00Z`, `2024-05-01T12:00:00.25+05:30`,
///   `2024-05-01T12:00Z`, `2024-05-01T12:00:00+0530`
/// - ISO 8601 local: `2024-05-01T12:00:00`, `2024-05-01 12:00`, `2024-05-01`
/// - US locale: `05/01/2024 14:30:00`, `5/1/2024, 2:30:00 PM`, `5/1/2024`
/// - Epoch milliseconds: `1714564800000`
/// - Spreadsheet serial date: `45413.5`
///
/// Returns [`UNPARSEABLE`] for empty or unrecognised input.
pub fn parse_timestamp(raw: &str, offset: UtcOffset) -> i64 {
    let s = raw.trim();
    if s.is_empty() {
        return UNPARSEABLE;
    }

    parse_iso(s, offset)
        .or_else(|| parse_locale(s, offset))
        .or_else(|| parse_numeric(s, offset))
        .unwrap_or(UNPARSEABLE)
}

/// Unix epoch milliseconds, truncated toward zero.
pub fn epoch_ms(dt: OffsetDateTime) -> i64 {
    (dt.unix_timestamp_nanos() / 1_000_000) as i64
}

// ---------------------------------------------------------------------------
// Format handlers
// ---------------------------------------------------------------------------

fn parse_iso(s: &str, offset: UtcOffset) -> Option<i64> {
    // Some exports use a space instead of `T`; only the first one matters.
    let s = s.replacen(' ', "T", 1);

    if let Some(dt) = parse_zoned(&s) {
        return Some(epoch_ms(dt));
    }

    let local = PrimitiveDateTime::parse(
        &s,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            &s,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(&s, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    })
    .or_else(|_| Date::parse(&s, format_description!("[year]-[month]-[day]")).map(Date::midnight))
    .ok()?;

    Some(epoch_ms(local.assume_offset(offset)))
}

/// ISO 8601 with an explicit offset: RFC 3339 plus the looser forms gateways
/// emit (no seconds, basic `+hhmm` offsets, `Z` without seconds).
fn parse_zoned(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| {
            OffsetDateTime::parse(
                s,
                format_description!(
                    "[year]-[month]-[day]T[hour]:[minute][offset_hour sign:mandatory]:[offset_minute]"
                ),
            )
        })
        .or_else(|_| {
            OffsetDateTime::parse(
                s,
                format_description!(
                    "[year]-[month]-[day]T[hour]:[minute][offset_hour sign:mandatory][offset_minute]"
                ),
            )
        })
        .or_else(|_| {
            OffsetDateTime::parse(
                s,
                format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
                ),
            )
        })
        .or_else(|_| {
            OffsetDateTime::parse(
                s,
                format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory][offset_minute]"
                ),
            )
        })
        .or_else(|_| {
            PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day]T[hour]:[minute]Z"))
                .map(PrimitiveDateTime::assume_utc)
        })
        .ok()
}

/// `M/D/YYYY` with an optional clock part, as written by `toLocaleString`
/// on en-US gateways.  Zero padding is optional everywhere.
fn parse_locale(s: &str, offset: UtcOffset) -> Option<i64> {
    let (date_part, clock_part) = match s.split_once([' ', ',']) {
        Some((d, rest)) => (d, rest.trim_start_matches(',').trim()),
        None => (s, ""),
    };

    let mut fields = date_part.split('/');
    let month: u8 = fields.next()?.parse().ok()?;
    let day: u8 = fields.next()?.parse().ok()?;
    let year: i32 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || !(1000..=9999).contains(&year) {
        return None;
    }

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let clock = if clock_part.is_empty() {
        Time::MIDNIGHT
    } else {
        parse_clock(clock_part)?
    };

    Some(epoch_ms(date.with_time(clock).assume_offset(offset)))
}

/// `H:mm[:ss][ AM|PM]`
fn parse_clock(s: &str) -> Option<Time> {
    let upper = s.to_ascii_uppercase();
    let (clock, pm) = if let Some(c) = upper.strip_suffix("AM") {
        (c.trim_end(), Some(false))
    } else if let Some(c) = upper.strip_suffix("PM") {
        (c.trim_end(), Some(true))
    } else {
        (upper.as_str(), None)
    };

    let mut parts = clock.split(':');
    let mut hour: u8 = parts.next()?.parse().ok()?;
    let minute: u8 = parts.next()?.parse().ok()?;
    let second: u8 = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }

    if let Some(pm) = pm {
        if !(1..=12).contains(&hour) {
            return None;
        }
        hour = hour % 12 + if pm { 12 } else { 0 };
    }

    Time::from_hms(hour, minute, second).ok()
}

fn parse_numeric(s: &str, offset: UtcOffset) -> Option<i64> {
    if let Ok(ms) = s.parse::<i64>() {
        if ms >= EPOCH_MS_MIN {
            return Some(ms);
        }
    }

    let serial: f64 = s.parse().ok()?;
    if !(serial > 0.0 && serial < SERIAL_MAX) {
        return None;
    }

    let since_epoch = Duration::milliseconds((serial * MS_PER_DAY).round() as i64);
    let local = SERIAL_EPOCH.midnight().checked_add(since_epoch)?;
    Some(epoch_ms(local.assume_offset(offset)))
}

// ===========================================================================
// Tests
// ===========================================================================
