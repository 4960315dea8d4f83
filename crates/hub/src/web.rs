use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use paddy_advisor::{
    epoch_ms, is_stale_at, latest, select, AdvisoryVerdict, CropStage, RangeSpec,
    WeatherSnapshot, WindowedPoint,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ApiError;
use crate::state::{RefreshOutcome, SharedState};
use crate::telemetry::{group_by_device, TelemetryPush};

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub settings: Arc<Settings>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/telemetry", post(ingest_telemetry))
        .route("/api/advisory", post(evaluate_advisory))
        .route("/api/plots/{sensor_id}/series", get(plot_series))
        .route("/api/plots/{sensor_id}/advisory", get(plot_advisory))
        .with_state(state)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status(app.settings.utc_offset))
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct IngestResponse {
    applied: bool,
    latest_seq: Option<u64>,
    sensors: Vec<String>,
    skipped_rows: usize,
}

async fn ingest_telemetry(
    State(app): State<AppState>,
    Json(push): Json<TelemetryPush>,
) -> impl IntoResponse {
    let batches = group_by_device(&push.rows, app.settings.utc_offset);
    let skipped_rows = push.rows.iter().filter(|r| r.device_id.is_none()).count();
    let mut sensors: Vec<String> = batches.keys().cloned().collect();
    sensors.sort();

    let mut st = app.shared.write().await;
    if skipped_rows > 0 {
        st.record_error(format!(
            "refresh seq={}: {skipped_rows} row(s) without a device id",
            push.seq
        ));
    }
    let outcome = st.apply_refresh(push.seq, batches, push.weather);
    let latest_seq = st.last_seq;
    drop(st);

    match outcome {
        RefreshOutcome::Applied => {
            info!(seq = push.seq, devices = sensors.len(), "telemetry applied");
        }
        RefreshOutcome::Superseded { latest_seq } => {
            warn!(seq = push.seq, latest_seq, "telemetry superseded, dropped");
        }
    }

    Json(IngestResponse {
        applied: outcome == RefreshOutcome::Applied,
        latest_seq,
        sensors,
        skipped_rows,
    })
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct SeriesQuery {
    range: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

fn parse_day(field: &str, value: Option<&str>) -> Result<Date, ApiError> {
    let value = value
        .ok_or_else(|| ApiError::BadRequest(format!("custom range requires '{field}'")))?;
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|e| ApiError::BadRequest(format!("invalid {field} date '{value}': {e}")))
}

fn parse_range(q: &SeriesQuery) -> Result<RangeSpec, ApiError> {
    match q.range.as_deref().unwrap_or("24h") {
        "24h" => Ok(RangeSpec::Last24h),
        "7d" => Ok(RangeSpec::Last7d),
        "30d" => Ok(RangeSpec::Last30d),
        "all" => Ok(RangeSpec::AllTime),
        "custom" => Ok(RangeSpec::Custom {
            start: parse_day("start", q.start.as_deref())?,
            end: parse_day("end", q.end.as_deref())?,
        }),
        other => Err(ApiError::BadRequest(format!(
            "unknown range '{other}' (use 24h, 7d, 30d, all or custom)"
        ))),
    }
}

async fn plot_series(
    State(app): State<AppState>,
    Path(sensor_id): Path<String>,
    Query(q): Query<SeriesQuery>,
) -> Result<Json<Vec<WindowedPoint>>, ApiError> {
    let range = parse_range(&q)?;
    let now_ms = epoch_ms(OffsetDateTime::now_utc());

    let st = app.shared.read().await;
    let plot = st
        .plots
        .get(&sensor_id)
        .ok_or_else(|| ApiError::NotFound(format!("sensor '{sensor_id}'")))?;

    Ok(Json(select(
        &plot.readings,
        range,
        now_ms,
        app.settings.utc_offset,
    )))
}

// ---------------------------------------------------------------------------
// Advisory
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PlotAdvisory {
    sensor_id: String,
    name: String,
    level: f64,
    reading_epoch_ms: i64,
    stale: bool,
    stage: Option<CropStage>,
    days_remaining: Option<i64>,
    verdict: AdvisoryVerdict,
}

async fn plot_advisory(
    State(app): State<AppState>,
    Path(sensor_id): Path<String>,
) -> Result<Json<PlotAdvisory>, ApiError> {
    let settings = &app.settings;
    let now = OffsetDateTime::now_utc();
    let today = now.to_offset(settings.utc_offset).date();

    let st = app.shared.read().await;
    let plot = st
        .plots
        .get(&sensor_id)
        .ok_or_else(|| ApiError::NotFound(format!("sensor '{sensor_id}'")))?;
    let newest = latest(&plot.readings, settings.utc_offset)
        .ok_or_else(|| ApiError::NotFound(format!("no readings for sensor '{sensor_id}'")))?;

    let stages = settings.engine.stages();
    let stage = plot.plan.planting_date.map(|d| stages.resolve(d, today));
    let verdict = settings
        .engine
        .evaluate(newest.level, stage.as_ref(), st.weather.as_ref());

    Ok(Json(PlotAdvisory {
        sensor_id,
        name: plot.name.clone(),
        level: newest.level,
        reading_epoch_ms: newest.epoch_ms,
        stale: is_stale_at(newest.epoch_ms, settings.stale_after_min, epoch_ms(now)),
        days_remaining: stage.as_ref().map(|s| stages.days_remaining(s)),
        stage,
        verdict,
    }))
}

/// Body of `POST /api/advisory`: evaluate an arbitrary level without a plot.
#[derive(Debug, Deserialize)]
struct AdvisoryRequest {
    level: f64,
    #[serde(default, with = "paddy_advisor::iso_date::option")]
    planting_date: Option<Date>,
    /// Evaluation day; defaults to today at the farm.
    #[serde(default, with = "paddy_advisor::iso_date::option")]
    as_of: Option<Date>,
    #[serde(default)]
    weather: Option<WeatherSnapshot>,
}

#[derive(Debug, Serialize)]
struct AdvisoryResponse {
    stage: Option<CropStage>,
    verdict: AdvisoryVerdict,
}

async fn evaluate_advisory(
    State(app): State<AppState>,
    Json(req): Json<AdvisoryRequest>,
) -> impl IntoResponse {
    let engine = &app.settings.engine;
    let today = req.as_of.unwrap_or_else(|| {
        OffsetDateTime::now_utc()
            .to_offset(app.settings.utc_offset)
            .date()
    });

    let stage = req
        .planting_date
        .map(|d| engine.stages().resolve(d, today));
    let verdict = engine.evaluate(req.level, stage.as_ref(), req.weather.as_ref());

    Json(AdvisoryResponse { stage, verdict })
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
