use paddy_advisor::{latest, CropPlan, Reading, WeatherSnapshot};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::RwLock;

use crate::config::PlotEntry;
use crate::telemetry::{DeviceBatch, GatewayHealth};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub plots: HashMap<String, PlotState>,
    pub weather: Option<WeatherSnapshot>,
    /// Sequence number of the last applied telemetry push.
    pub last_seq: Option<u64>,
    pub last_refresh: Option<OffsetDateTime>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone)]
pub struct PlotState {
    pub name: String,
    pub plan: CropPlan,
    pub readings: Vec<Reading>,
    pub gateway: Option<GatewayHealth>,
    pub last_seen: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Telemetry,
    StaleRefresh,
    Error,
    System,
}

/// Outcome of [`SystemState::apply_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// A newer push was already applied; this one was dropped.
    Superseded { latest_seq: u64 },
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub last_seq: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    pub weather: Option<WeatherSnapshot>,
    pub plots: Vec<PlotStatus>,
    pub events: Vec<SystemEvent>,
}

#[derive(Serialize)]
pub struct PlotStatus {
    pub sensor_id: String,
    pub name: String,
    #[serde(with = "paddy_advisor::iso_date::option")]
    pub planting_date: Option<Date>,
    pub reading_count: usize,
    pub latest_level: Option<f64>,
    pub latest_epoch_ms: Option<i64>,
    pub gateway: Option<GatewayHealth>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl PlotState {
    fn new(name: String, plan: CropPlan) -> Self {
        Self {
            name,
            plan,
            readings: Vec::new(),
            gateway: None,
            last_seen: None,
        }
    }
}

impl SystemState {
    pub fn new(plots: &[PlotEntry]) -> Self {
        let plots = plots
            .iter()
            .map(|p| (p.sensor_id.clone(), PlotState::new(p.name.clone(), p.plan())))
            .collect();

        Self {
            started_at: Instant::now(),
            plots,
            weather: None,
            last_seq: None,
            last_refresh: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Apply one poll's worth of telemetry.
    ///
    /// Pushes are applied last-sequence-wins: a push whose `seq` is not newer
    /// than the last applied one is dropped, so a slow poll finishing late
    /// cannot overwrite fresher data.  Devices absent from the push keep
    /// their previous readings.  Unknown devices get a plot named after
    /// their id and no planting date.
    pub fn apply_refresh(
        &mut self,
        seq: u64,
        batches: HashMap<String, DeviceBatch>,
        weather: Option<WeatherSnapshot>,
    ) -> RefreshOutcome {
        if let Some(latest_seq) = self.last_seq.filter(|&last| seq <= last) {
            self.push_event(
                EventKind::StaleRefresh,
                format!("dropped refresh seq={seq} (already at seq={latest_seq})"),
            );
            return RefreshOutcome::Superseded { latest_seq };
        }

        let now = OffsetDateTime::now_utc();
        let mut total = 0usize;
        let devices = batches.len();

        for (sensor_id, batch) in batches {
            total += batch.readings.len();
            let plot = self.plots.entry(sensor_id.clone()).or_insert_with(|| {
                PlotState::new(
                    sensor_id.clone(),
                    CropPlan {
                        sensor_id: sensor_id.clone(),
                        planting_date: None,
                    },
                )
            });
            plot.readings = batch.readings;
            if batch.gateway.is_some() {
                plot.gateway = batch.gateway;
            }
            plot.last_seen = Some(now);
        }

        if weather.is_some() {
            self.weather = weather;
        }
        self.last_seq = Some(seq);
        self.last_refresh = Some(now);

        self.push_event(
            EventKind::Telemetry,
            format!("refresh seq={seq}: {devices} device(s), {total} reading(s)"),
        );
        RefreshOutcome::Applied
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, offset: UtcOffset) -> StatusResponse {
        let mut plots: Vec<PlotStatus> = self
            .plots
            .iter()
            .map(|(sensor_id, p)| {
                let newest = latest(&p.readings, offset);
                PlotStatus {
                    sensor_id: sensor_id.clone(),
                    name: p.name.clone(),
                    planting_date: p.plan.planting_date,
                    reading_count: p.readings.len(),
                    latest_level: newest.map(|r| r.level),
                    latest_epoch_ms: newest.map(|r| r.epoch_ms),
                    gateway: p.gateway.clone(),
                    last_seen: p.last_seen,
                }
            })
            .collect();
        plots.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));

        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            last_seq: self.last_seq,
            last_refresh: self.last_refresh,
            weather: self.weather.clone(),
            plots,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn plots() -> Vec<PlotEntry> {
        vec![PlotEntry {
            sensor_id: "101".into(),
            name: "North paddy".into(),
            planting_date: Some(date!(2024 - 06 - 01)),
        }]
    }

    fn batch(levels: &[(&str, f64)]) -> DeviceBatch {
        DeviceBatch {
            readings: levels.iter().map(|(ts, l)| Reading::new(*ts, *l)).collect(),
            gateway: None,
        }
    }

    fn one_device(id: &str, levels: &[(&str, f64)]) -> HashMap<String, DeviceBatch> {
        HashMap::from([(id.to_string(), batch(levels))])
    }

    #[test]
    fn configured_plots_start_empty() {
        let st = SystemState::new(&plots());
        let p = &st.plots["101"];
        assert_eq!(p.name, "North paddy");
        assert!(p.readings.is_empty());
        assert_eq!(p.plan.planting_date, Some(date!(2024 - 06 - 01)));
    }

    #[test]
    fn refresh_replaces_readings() {
        let mut st = SystemState::new(&plots());
        st.apply_refresh(1, one_device("101", &[("2024-05-01T10:00:00Z", 12.0)]), None);
        st.apply_refresh(
            2,
            one_device("101", &[("2024-05-01T10:00:00Z", 12.0), ("2024-05-01T11:00:00Z", 13.0)]),
            None,
        );
        assert_eq!(st.plots["101"].readings.len(), 2);
        assert_eq!(st.last_seq, Some(2));
    }

    #[test]
    fn older_refresh_is_dropped() {
        let mut st = SystemState::new(&plots());
        let newer = st.apply_refresh(5, one_device("101", &[("2024-05-01T11:00:00Z", 16.0)]), None);
        let older = st.apply_refresh(4, one_device("101", &[("2024-05-01T09:00:00Z", 2.0)]), None);

        assert_eq!(newer, RefreshOutcome::Applied);
        assert_eq!(older, RefreshOutcome::Superseded { latest_seq: 5 });
        assert_eq!(st.plots["101"].readings[0].level, 16.0);
        assert!(st.events.iter().any(|e| e.kind == EventKind::StaleRefresh));
    }

    #[test]
    fn repeated_seq_is_dropped() {
        let mut st = SystemState::new(&plots());
        st.apply_refresh(3, one_device("101", &[]), None);
        assert!(matches!(
            st.apply_refresh(3, one_device("101", &[]), None),
            RefreshOutcome::Superseded { .. }
        ));
    }

    #[test]
    fn poll_start_millis_survive_poller_restart() {
        let mut st = SystemState::new(&plots());
        // Poller run 1, then a restart a minute later.
        let first = 1_714_564_800_000;
        let after_restart = first + 60_000;
        st.apply_refresh(first, one_device("101", &[("2024-05-01T12:00:00Z", 12.0)]), None);
        let outcome = st.apply_refresh(
            after_restart,
            one_device("101", &[("2024-05-01T12:01:00Z", 14.0)]),
            None,
        );
        assert_eq!(outcome, RefreshOutcome::Applied);
        assert_eq!(st.plots["101"].readings[0].level, 14.0);

        // A restarted counter from 1 is behind and gets dropped.
        assert_eq!(
            st.apply_refresh(1, one_device("101", &[]), None),
            RefreshOutcome::Superseded { latest_seq: after_restart }
        );
    }

    #[test]
    fn unknown_device_gets_a_plot() {
        let mut st = SystemState::new(&plots());
        st.apply_refresh(1, one_device("999", &[("2024-05-01T10:00:00Z", 8.0)]), None);
        let p = &st.plots["999"];
        assert_eq!(p.name, "999");
        assert_eq!(p.plan.planting_date, None);
    }

    #[test]
    fn weather_kept_when_push_has_none() {
        let mut st = SystemState::new(&plots());
        let w = WeatherSnapshot {
            temp: 30.0,
            ..Default::default()
        };
        st.apply_refresh(1, HashMap::new(), Some(w.clone()));
        st.apply_refresh(2, HashMap::new(), None);
        assert_eq!(st.weather, Some(w));
    }

    #[test]
    fn status_reports_latest_reading_per_plot() {
        let mut st = SystemState::new(&plots());
        st.apply_refresh(
            1,
            one_device("101", &[("2024-05-01T11:00:00Z", 13.0), ("2024-05-01T10:00:00Z", 12.0)]),
            None,
        );
        let status = st.to_status(UtcOffset::UTC);
        assert_eq!(status.plots.len(), 1);
        assert_eq!(status.plots[0].latest_level, Some(13.0));
        assert_eq!(status.plots[0].reading_count, 2);
        assert_eq!(status.last_seq, Some(1));
    }

    #[test]
    fn events_capped_and_newest_first() {
        let mut st = SystemState::new(&[]);
        for i in 0..(MAX_EVENTS + 10) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        let status = st.to_status(UtcOffset::UTC);
        assert_eq!(status.events[0].detail, format!("event {}", MAX_EVENTS + 9));
    }
}
