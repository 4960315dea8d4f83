mod config;
mod error;
mod state;
mod telemetry;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use state::SystemState;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file (plots, thresholds, stage table) ────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let settings = cfg.settings()?;

    if cfg.plots.is_empty() {
        warn!("no plots configured; devices will appear as telemetry arrives");
    }
    info!(
        plots = cfg.plots.len(),
        stages = settings.engine.stages().len(),
        utc_offset = %settings.utc_offset,
        "config ready"
    );

    // ── Shared state ────────────────────────────────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&cfg.plots)));
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    // ── Web server ──────────────────────────────────────────────────
    web::serve(AppState {
        shared,
        settings: Arc::new(settings),
    })
    .await
}
