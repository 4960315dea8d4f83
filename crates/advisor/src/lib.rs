//! Water-management core for paddy-field gauges.
//!
//! Three pure steps feed one another:
//!
//! ```text
//! raw readings ──▶ timestamp::parse_timestamp ──▶ series::select ──▶ chart window
//!                                   │
//!                                   └──▶ series::latest ──▶ level ─┐
//! planting date ──▶ StageTable::resolve ──▶ CropStage ─────────────┼──▶ AdvisoryEngine::evaluate
//! weather snapshot ────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here performs I/O, blocks, or holds shared state; every function
//! can be called concurrently from any number of callers.

pub mod advisory;
pub mod model;
pub mod series;
pub mod stage;
pub mod timestamp;

pub use advisory::{Advice, AdvisoryEngine, AdvisoryVerdict, Severity, Thresholds};
pub use model::{CropPlan, NormalizedReading, Reading, WeatherSnapshot};
pub use series::{is_stale_at, latest, select, RangeSpec, Window, WindowedPoint};
pub use stage::{CropStage, GrowthStage, StageTable, WaterRegime};
pub use timestamp::{epoch_ms, parse_timestamp, UNPARSEABLE};

// `YYYY-MM-DD` serde for `Date` fields, shared with the hub.
time::serde::format_description!(pub iso_date, Date, "[year]-[month]-[day]");
