//! TOML config file loading and validation: farm-local display settings,
//! advisory thresholds, the growth-stage table, and plot planting dates.

use anyhow::{bail, Context, Result};
use paddy_advisor::stage::STAGE_COUNT;
use paddy_advisor::{AdvisoryEngine, CropPlan, GrowthStage, StageTable, Thresholds, WaterRegime};
use serde::Deserialize;
use std::collections::HashSet;
use time::macros::format_description;
use time::{Date, UtcOffset};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub display: DisplayEntry,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Empty means the built-in rice table.
    #[serde(default)]
    pub stages: Vec<StageEntry>,
    #[serde(default)]
    pub plots: Vec<PlotEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayEntry {
    /// Farm-local offset, e.g. "+05:30".  Applied to timestamps without one.
    pub utc_offset: String,
    /// A plot's latest reading older than this is flagged stale.
    pub stale_after_min: i64,
}

impl Default for DisplayEntry {
    fn default() -> Self {
        Self {
            utc_offset: "+00:00".to_string(),
            stale_after_min: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StageEntry {
    pub name: String,
    pub duration_days: i64,
    pub regime: WaterRegime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlotEntry {
    pub sensor_id: String,
    pub name: String,
    #[serde(default, with = "paddy_advisor::iso_date::option")]
    pub planting_date: Option<Date>,
}

impl PlotEntry {
    pub fn plan(&self) -> CropPlan {
        CropPlan {
            sensor_id: self.sensor_id.clone(),
            planting_date: self.planting_date,
        }
    }
}

/// Validated runtime view of the config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: AdvisoryEngine,
    pub utc_offset: UtcOffset,
    pub stale_after_min: u64,
}

pub fn parse_utc_offset(s: &str) -> Result<UtcOffset> {
    UtcOffset::parse(
        s.trim(),
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .with_context(|| format!("invalid utc_offset '{s}' (expected e.g. \"+05:30\")"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_display(&mut errors);
        self.validate_thresholds(&mut errors);
        self.validate_stages(&mut errors);
        self.validate_plots(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_display(&self, errors: &mut Vec<String>) {
        if let Err(e) = parse_utc_offset(&self.display.utc_offset) {
            errors.push(format!("display: {e}"));
        }
        if self.display.stale_after_min <= 0 {
            errors.push(format!(
                "display: stale_after_min must be positive, got {}",
                self.display.stale_after_min
            ));
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let t = &self.thresholds;

        let named = [
            ("low_cm", t.low_cm),
            ("soil_surface_cm", t.soil_surface_cm),
            ("high_cm", t.high_cm),
            ("flood_target_min_cm", t.flood_target_min_cm),
            ("flood_target_max_cm", t.flood_target_max_cm),
            ("heat_temp_c", t.heat_temp_c),
            ("rain_chance_pct", t.rain_chance_pct),
            ("rain_forecast_mm", t.rain_forecast_mm),
        ];
        let non_finite: Vec<&str> = named
            .iter()
            .filter(|(_, v)| !v.is_finite())
            .map(|(name, _)| *name)
            .collect();
        if !non_finite.is_empty() {
            errors.push(format!(
                "thresholds: {} must be finite numbers",
                non_finite.join(", ")
            ));
            return;
        }

        // ── Gauge marks ─────────────────────────────────────
        if !(t.low_cm < t.soil_surface_cm && t.soil_surface_cm < t.high_cm) {
            errors.push(format!(
                "thresholds: expected low_cm ({}) < soil_surface_cm ({}) < high_cm ({})",
                t.low_cm, t.soil_surface_cm, t.high_cm
            ));
        }

        // ── Flood target band ───────────────────────────────
        if t.flood_target_min_cm > t.flood_target_max_cm {
            errors.push(format!(
                "thresholds: flood_target_min_cm ({}) exceeds flood_target_max_cm ({})",
                t.flood_target_min_cm, t.flood_target_max_cm
            ));
        }
        // Standing water only: strictly above the soil surface.
        if t.flood_target_min_cm <= t.soil_surface_cm || t.flood_target_max_cm > t.high_cm {
            errors.push(format!(
                "thresholds: flood target {}-{} cm must lie above soil_surface_cm ({}) and at or below high_cm ({})",
                t.flood_target_min_cm, t.flood_target_max_cm, t.soil_surface_cm, t.high_cm
            ));
        }

        // ── Weather cut-offs ────────────────────────────────
        if !(0.0..=100.0).contains(&t.rain_chance_pct) {
            errors.push(format!(
                "thresholds: rain_chance_pct {} out of range [0, 100]",
                t.rain_chance_pct
            ));
        }
        if t.rain_forecast_mm < 0.0 {
            errors.push(format!(
                "thresholds: rain_forecast_mm must not be negative, got {}",
                t.rain_forecast_mm
            ));
        }
    }

    fn validate_stages(&self, errors: &mut Vec<String>) {
        if self.stages.is_empty() {
            return;
        }

        if self.stages.len() != STAGE_COUNT {
            errors.push(format!(
                "stages: expected {STAGE_COUNT} entries, got {}",
                self.stages.len()
            ));
        }

        for (i, s) in self.stages.iter().enumerate() {
            if s.name.trim().is_empty() {
                errors.push(format!("stages[{i}]: name is empty"));
            }
            if s.duration_days <= 0 || s.duration_days > i64::from(u32::MAX) {
                errors.push(format!(
                    "stages[{i}]: duration_days must be positive, got {}",
                    s.duration_days
                ));
            }
        }

        for regime in [WaterRegime::Flood, WaterRegime::Drying, WaterRegime::Drain] {
            if !self.stages.iter().any(|s| s.regime == regime) {
                errors.push(format!("stages: no stage uses the {regime:?} regime"));
            }
        }
    }

    fn validate_plots(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, p) in self.plots.iter().enumerate() {
            let ctx = || {
                if p.sensor_id.is_empty() {
                    format!("plots[{i}]")
                } else {
                    format!("plot '{}'", p.sensor_id)
                }
            };

            if p.sensor_id.trim().is_empty() {
                errors.push(format!("{}: sensor_id is empty", ctx()));
            } else if !seen_ids.insert(&p.sensor_id) {
                errors.push(format!("{}: duplicate sensor_id", ctx()));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Runtime view
    // -----------------------------------------------------------------------

    pub fn stage_table(&self) -> StageTable {
        if self.stages.is_empty() {
            return StageTable::rice();
        }
        StageTable::new(
            self.stages
                .iter()
                .map(|s| {
                    GrowthStage::new(
                        s.name.trim(),
                        u32::try_from(s.duration_days).unwrap_or(0),
                        s.regime,
                    )
                })
                .collect(),
        )
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            engine: AdvisoryEngine::new(self.thresholds, self.stage_table()),
            utc_offset: parse_utc_offset(&self.display.utc_offset)?,
            stale_after_min: u64::try_from(self.display.stale_after_min)
                .context("stale_after_min must be positive")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        plots = config.plots.len(),
        custom_stages = !config.stages.is_empty(),
        utc_offset = %config.display.utc_offset,
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, offset};

    fn valid_plot() -> PlotEntry {
        PlotEntry {
            sensor_id: "101".into(),
            name: "North paddy".into(),
            planting_date: Some(date!(2024 - 06 - 01)),
        }
    }

    fn valid_config() -> Config {
        Config {
            plots: vec![valid_plot()],
            ..Config::default()
        }
    }

    fn rice_entries() -> Vec<StageEntry> {
        StageTable::rice()
            .stages()
            .iter()
            .map(|s| StageEntry {
                name: s.name.clone(),
                duration_days: i64::from(s.duration_days),
                regime: s.regime,
            })
            .collect()
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[display]
utc_offset = "+05:30"
stale_after_min = 90

[thresholds]
low_cm = 4.0
heat_temp_c = 37.0

[[stages]]
name = "Nursery"
duration_days = 21
regime = "flood"

[[plots]]
sensor_id = "101"
name = "North paddy"
planting_date = "2024-06-01"

[[plots]]
sensor_id = "102"
name = "South paddy"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.display.stale_after_min, 90);
        assert_eq!(config.thresholds.low_cm, 4.0);
        assert_eq!(config.thresholds.high_cm, 20.0, "unset keys keep defaults");
        assert_eq!(config.stages[0].regime, WaterRegime::Flood);
        assert_eq!(config.plots[0].planting_date, Some(date!(2024 - 06 - 01)));
        assert_eq!(config.plots[1].planting_date, None);
    }

    #[test]
    fn parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.plots.is_empty());
        assert!(config.stages.is_empty());
        assert_eq!(config.display.utc_offset, "+00:00");
        config.validate().unwrap();
    }

    #[test]
    fn parse_bad_planting_date_fails() {
        let toml_str = r#"
[[plots]]
sensor_id = "101"
name = "North"
planting_date = "06/01/2024"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn explicit_rice_table_passes() {
        let cfg = Config {
            stages: rice_entries(),
            ..valid_config()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.stage_table(), StageTable::rice());
    }

    // -- Display ------------------------------------------------------------

    #[test]
    fn utc_offset_parses() {
        assert_eq!(parse_utc_offset("+05:30").unwrap(), offset!(+5:30));
        assert_eq!(parse_utc_offset("-03:00").unwrap(), offset!(-3));
    }

    #[test]
    fn bad_utc_offset_rejected() {
        let mut cfg = valid_config();
        cfg.display.utc_offset = "IST".into();
        assert_validation_err(&cfg, "invalid utc_offset 'IST'");
    }

    #[test]
    fn stale_after_zero_rejected() {
        let mut cfg = valid_config();
        cfg.display.stale_after_min = 0;
        assert_validation_err(&cfg, "stale_after_min must be positive");
    }

    // -- Thresholds ---------------------------------------------------------

    #[test]
    fn marks_out_of_order_rejected() {
        let mut cfg = valid_config();
        cfg.thresholds.low_cm = 16.0;
        assert_validation_err(&cfg, "expected low_cm (16) < soil_surface_cm (15)");
    }

    #[test]
    fn flood_target_above_high_rejected() {
        let mut cfg = valid_config();
        cfg.thresholds.flood_target_max_cm = 25.0;
        assert_validation_err(&cfg, "at or below high_cm (20)");
    }

    #[test]
    fn flood_target_at_soil_surface_rejected() {
        let mut cfg = valid_config();
        cfg.thresholds.flood_target_min_cm = 15.0;
        assert_validation_err(&cfg, "must lie above soil_surface_cm (15)");
    }

    #[test]
    fn flood_target_at_high_mark_passes() {
        let mut cfg = valid_config();
        cfg.thresholds.flood_target_max_cm = 20.0;
        cfg.validate().unwrap();
    }

    #[test]
    fn flood_target_inverted_rejected() {
        let mut cfg = valid_config();
        cfg.thresholds.flood_target_min_cm = 19.0;
        assert_validation_err(&cfg, "flood_target_min_cm (19) exceeds flood_target_max_cm (18)");
    }

    #[test]
    fn rain_chance_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.thresholds.rain_chance_pct = 120.0;
        assert_validation_err(&cfg, "rain_chance_pct 120 out of range");
    }

    #[test]
    fn non_finite_threshold_rejected() {
        let mut cfg = valid_config();
        cfg.thresholds.high_cm = f64::NAN;
        assert_validation_err(&cfg, "high_cm must be finite");
    }

    // -- Stages -------------------------------------------------------------

    #[test]
    fn short_stage_table_rejected() {
        let mut cfg = valid_config();
        cfg.stages = rice_entries();
        cfg.stages.truncate(5);
        assert_validation_err(&cfg, "expected 8 entries, got 5");
    }

    #[test]
    fn stage_zero_duration_rejected() {
        let mut cfg = valid_config();
        cfg.stages = rice_entries();
        cfg.stages[2].duration_days = 0;
        assert_validation_err(&cfg, "stages[2]: duration_days must be positive");
    }

    #[test]
    fn reordered_regimes_keep_default_stage_drying() {
        let mut cfg = valid_config();
        cfg.stages = rice_entries();
        cfg.stages[1].regime = WaterRegime::Flood;
        cfg.stages[3].regime = WaterRegime::Drying;
        cfg.validate().unwrap();

        let settings = cfg.settings().unwrap();
        let v = settings.engine.evaluate(10.0, None, None);
        assert_eq!(v.advice, paddy_advisor::Advice::AwdActive);
    }

    #[test]
    fn stage_missing_regime_rejected() {
        let mut cfg = valid_config();
        cfg.stages = rice_entries();
        for s in &mut cfg.stages {
            if s.regime == WaterRegime::Drain {
                s.regime = WaterRegime::Drying;
            }
        }
        assert_validation_err(&cfg, "no stage uses the Drain regime");
    }

    // -- Plots --------------------------------------------------------------

    #[test]
    fn plot_empty_id_rejected() {
        let mut cfg = valid_config();
        cfg.plots[0].sensor_id = "".into();
        assert_validation_err(&cfg, "plots[0]: sensor_id is empty");
    }

    #[test]
    fn plot_duplicate_id_rejected() {
        let mut cfg = valid_config();
        cfg.plots.push(valid_plot());
        assert_validation_err(&cfg, "duplicate sensor_id");
    }

    #[test]
    fn plot_empty_name_rejected() {
        let mut cfg = valid_config();
        cfg.plots[0].name = " ".into();
        assert_validation_err(&cfg, "name is empty");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.display.utc_offset = "bogus".into();
        cfg.thresholds.rain_chance_pct = -1.0;
        cfg.plots[0].name = "".into();

        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("3 errors"), "expected 3 errors in: {msg}");
        assert!(msg.contains("invalid utc_offset"), "missing offset error in: {msg}");
        assert!(msg.contains("rain_chance_pct"), "missing rain error in: {msg}");
        assert!(msg.contains("name is empty"), "missing plot error in: {msg}");
    }

    // -- Runtime view -------------------------------------------------------

    #[test]
    fn settings_carry_offset_and_engine() {
        let cfg: Config = toml::from_str(
            r#"
[display]
utc_offset = "+07:00"
stale_after_min = 30

[thresholds]
low_cm = 6.0
"#,
        )
        .unwrap();
        let settings = cfg.settings().unwrap();
        assert_eq!(settings.utc_offset, offset!(+7));
        assert_eq!(settings.stale_after_min, 30);
        assert_eq!(settings.engine.thresholds().low_cm, 6.0);
        assert_eq!(settings.engine.stages().len(), STAGE_COUNT);
    }

    #[test]
    fn plot_entry_converts_to_crop_plan() {
        let plan = valid_plot().plan();
        assert_eq!(plan.sensor_id, "101");
        assert_eq!(plan.planting_date, Some(date!(2024 - 06 - 01)));
    }
}
