//! Range selection over a sensor's reading history.
//!
//! Produces the bounded, ascending window the chart draws, with an axis label
//! per point whose granularity follows the selected range.  Also hosts the
//! "latest reading" and freshness helpers since they work off the same
//! normalised timestamps.
//!
//! # Clock injection
//! Every function takes `now_ms` instead of reading the clock, so window
//! edges are deterministic in tests.

use serde::Serialize;
use time::macros::{format_description, time};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::debug;

use crate::model::{NormalizedReading, Reading};
use crate::timestamp::{epoch_ms, UNPARSEABLE};

pub const MS_PER_DAY: i64 = 86_400_000;

// ---------------------------------------------------------------------------
// Range spec
// ---------------------------------------------------------------------------

/// Which slice of history to show.  `Custom` bounds are inclusive calendar
/// days in the farm's local offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Last24h,
    Last7d,
    Last30d,
    AllTime,
    Custom { start: Date, end: Date },
}

/// Inclusive `[start_ms, end_ms]`.  A window with `start_ms > end_ms`
/// contains nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Window {
    pub fn contains(&self, epoch_ms: i64) -> bool {
        self.start_ms <= epoch_ms && epoch_ms <= self.end_ms
    }

    pub fn is_empty(&self) -> bool {
        self.start_ms > self.end_ms
    }
}

impl RangeSpec {
    pub fn window(&self, now_ms: i64, offset: UtcOffset) -> Window {
        let trailing = |days: i64| Window {
            start_ms: now_ms - days * MS_PER_DAY,
            end_ms: now_ms,
        };

        match *self {
            RangeSpec::Last24h => trailing(1),
            RangeSpec::Last7d => trailing(7),
            RangeSpec::Last30d => trailing(30),
            RangeSpec::AllTime => Window {
                start_ms: 0,
                end_ms: now_ms,
            },
            // An inverted custom range is left inverted, i.e. empty.
            RangeSpec::Custom { start, end } => Window {
                start_ms: epoch_ms(start.midnight().assume_offset(offset)),
                end_ms: epoch_ms(end.with_time(time!(23:59:59.999)).assume_offset(offset)),
            },
        }
    }

    /// Axis label for a point, rendered in the local offset.
    pub fn axis_label(&self, epoch_ms: i64, offset: UtcOffset) -> String {
        let Ok(utc) = OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
        else {
            return String::new();
        };
        let Some(local) = utc.checked_to_offset(offset) else {
            return String::new();
        };

        let format = match self {
            RangeSpec::Last24h => format_description!("[hour]:[minute]"),
            RangeSpec::Last7d => format_description!("[weekday repr:short] [hour]:00"),
            RangeSpec::Last30d => format_description!("[day] [month repr:short] [hour]:00"),
            RangeSpec::AllTime | RangeSpec::Custom { .. } => {
                format_description!("[day] [month repr:short]")
            }
        };

        local.format(format).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowedPoint {
    pub epoch_ms: i64,
    pub level: f64,
    pub axis_label: String,
}

/// Readings inside `range`, oldest first.
///
/// Input order is not trusted.  Unparseable timestamps are dropped silently
/// (counted at debug level); an empty result is not an error.
pub fn select(
    readings: &[Reading],
    range: RangeSpec,
    now_ms: i64,
    offset: UtcOffset,
) -> Vec<WindowedPoint> {
    let window = range.window(now_ms, offset);
    if window.is_empty() {
        debug!(?range, "series: empty window");
        return Vec::new();
    }

    let mut unparseable = 0usize;
    let mut in_window: Vec<NormalizedReading> = readings
        .iter()
        .map(|r| r.normalize(offset))
        .filter(|r| {
            if r.epoch_ms == UNPARSEABLE {
                unparseable += 1;
                return false;
            }
            window.contains(r.epoch_ms)
        })
        .collect();

    if unparseable > 0 {
        debug!(unparseable, total = readings.len(), "series: dropped readings with bad timestamps");
    }

    in_window.sort_by_key(|r| r.epoch_ms);

    in_window
        .into_iter()
        .map(|r| WindowedPoint {
            epoch_ms: r.epoch_ms,
            level: r.level,
            axis_label: range.axis_label(r.epoch_ms, offset),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Latest + freshness
// ---------------------------------------------------------------------------

/// Most recent parseable reading, regardless of input order.
pub fn latest(readings: &[Reading], offset: UtcOffset) -> Option<NormalizedReading> {
    readings
        .iter()
        .map(|r| r.normalize(offset))
        .filter(|r| r.epoch_ms != UNPARSEABLE)
        .max_by_key(|r| r.epoch_ms)
}

/// Strictly older than `max_age_minutes` relative to `now_ms`.
///
/// A reading exactly at the threshold is fresh.  Readings stamped in the
/// future (gateway clock skew) are never stale.
pub fn is_stale_at(epoch_ms: i64, max_age_minutes: u64, now_ms: i64) -> bool {
    let max_age_ms = i64::try_from(max_age_minutes)
        .unwrap_or(i64::MAX)
        .saturating_mul(60_000);
    now_ms.saturating_sub(epoch_ms) > max_age_ms
}

// ===========================================================================
// Tests
// ===========================================================================
