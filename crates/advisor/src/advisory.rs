//! Irrigation advisory: one verdict per plot from gauge level, growth stage,
//! and weather.
//!
//! The engine is a fixed-priority cascade.  Guard rules run top to bottom and
//! the first one that fires decides the outcome; if none fires, the level is
//! in the intermediate band and the stage's water regime decides.
//!
//! ```text
//! 1. drain stage        ── level > soil ──▶ Drain Field      else ▶ Ready
//! 2. level > high       ── rain ─────────▶ Drain Excess     else ▶ Stop Irrigating
//! 3. level < low        ── rain ─────────▶ Wait for Rain    else ▶ Irrigate Now
//! 4. low ≤ level ≤ high
//!      flood regime     ── level < soil ─▶ Wait for Rain | Increase Level
//!                                          else ▶ Optimal Flood
//!      drying regime    ── level < soil ─▶ AWD Active       else ▶ Levels Good
//! ```
//!
//! Missing weather means "no rain, no heat".  A missing stage means the
//! default vegetative stage, which always allows drying whatever the table
//! says.  Levels are compared numerically without range
//! checks, so the cascade returns a verdict for any `f64`.

use serde::{Deserialize, Serialize};

use crate::model::WeatherSnapshot;
use crate::stage::{CropStage, StageTable, WaterRegime, DEFAULT_STAGE_NAME, DEFAULT_STAGE_REGIME};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Gauge marks (absolute readings, cm) and weather cut-offs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub low_cm: f64,
    pub soil_surface_cm: f64,
    pub high_cm: f64,
    /// Band to aim for when topping up a flood-stage field.
    pub flood_target_min_cm: f64,
    pub flood_target_max_cm: f64,
    /// Above this air temperature (°C) the heat tip is attached.
    pub heat_temp_c: f64,
    /// Rain is expected when the chance exceeds this percentage...
    pub rain_chance_pct: f64,
    /// ...or the 24-hour forecast exceeds this many millimetres.
    pub rain_forecast_mm: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_cm: 5.0,
            soil_surface_cm: 15.0,
            high_cm: 20.0,
            flood_target_min_cm: 17.0,
            flood_target_max_cm: 18.0,
            heat_temp_c: 35.0,
            rain_chance_pct: 50.0,
            rain_forecast_mm: 5.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Good,
    Warn,
    Critical,
    Info,
}

/// Outcome of the cascade.  Each variant maps to exactly one severity and
/// one headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    DrainField,
    HarvestReady,
    DrainExcess,
    StopIrrigating,
    WaitForRain,
    IrrigateNow,
    IncreaseLevel,
    OptimalFlood,
    AwdActive,
    LevelsGood,
}

impl Advice {
    pub fn severity(self) -> Severity {
        match self {
            Advice::HarvestReady | Advice::OptimalFlood | Advice::LevelsGood => Severity::Good,
            Advice::DrainField
            | Advice::DrainExcess
            | Advice::WaitForRain
            | Advice::IncreaseLevel => Severity::Warn,
            Advice::IrrigateNow => Severity::Critical,
            Advice::StopIrrigating | Advice::AwdActive => Severity::Info,
        }
    }

    pub fn headline(self) -> &'static str {
        match self {
            Advice::DrainField => "Drain Field",
            Advice::HarvestReady => "Ready",
            Advice::DrainExcess => "Drain Excess",
            Advice::StopIrrigating => "Stop Irrigating",
            Advice::WaitForRain => "Wait for Rain",
            Advice::IrrigateNow => "Irrigate Now",
            Advice::IncreaseLevel => "Increase Level",
            Advice::OptimalFlood => "Optimal Flood",
            Advice::AwdActive => "AWD Active",
            Advice::LevelsGood => "Levels Good",
        }
    }

    pub fn subtext(self) -> &'static str {
        match self {
            Advice::DrainField => "Standing water before harvest",
            Advice::HarvestReady => "Field dry for harvest",
            Advice::DrainExcess => "Full field with rain coming",
            Advice::StopIrrigating => "Above high mark",
            Advice::WaitForRain => "Rain expected",
            Advice::IrrigateNow => "Below low mark",
            Advice::IncreaseLevel => "Flood stage needs standing water",
            Advice::OptimalFlood => "Standing water on target",
            Advice::AwdActive => "Safe drying zone",
            Advice::LevelsGood => "Soil saturated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryVerdict {
    pub advice: Advice,
    pub severity: Severity,
    pub headline: &'static str,
    pub subtext: &'static str,
    pub rationale: String,
    pub tip: Option<String>,
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// Everything a rule may look at, resolved once per evaluation.
struct Conditions<'a> {
    level: f64,
    stage_name: &'a str,
    regime: WaterRegime,
    rain_expected: bool,
    high_heat: bool,
    weather: Option<&'a WeatherSnapshot>,
    limits: &'a Thresholds,
}

type Rule = fn(&Conditions<'_>) -> Option<Advice>;

/// Guard rules in priority order.  Reordering changes behaviour.
const PRIORITY_RULES: [Rule; 3] = [drain_stage, above_high, below_low];

fn drain_stage(c: &Conditions<'_>) -> Option<Advice> {
    if c.regime != WaterRegime::Drain {
        return None;
    }
    Some(if c.level > c.limits.soil_surface_cm {
        Advice::DrainField
    } else {
        Advice::HarvestReady
    })
}

fn above_high(c: &Conditions<'_>) -> Option<Advice> {
    if c.level <= c.limits.high_cm {
        return None;
    }
    Some(if c.rain_expected {
        Advice::DrainExcess
    } else {
        Advice::StopIrrigating
    })
}

fn below_low(c: &Conditions<'_>) -> Option<Advice> {
    if c.level >= c.limits.low_cm {
        return None;
    }
    Some(if c.rain_expected {
        Advice::WaitForRain
    } else {
        Advice::IrrigateNow
    })
}

/// `low <= level <= high`.  Always decides.
fn intermediate_band(c: &Conditions<'_>) -> Advice {
    let below_soil = c.level < c.limits.soil_surface_cm;
    match c.regime {
        WaterRegime::Flood if below_soil && c.rain_expected => Advice::WaitForRain,
        WaterRegime::Flood if below_soil => Advice::IncreaseLevel,
        WaterRegime::Flood => Advice::OptimalFlood,
        WaterRegime::Drying if below_soil => Advice::AwdActive,
        WaterRegime::Drying => Advice::LevelsGood,
        // Unreachable through the cascade; keeps the match total.
        WaterRegime::Drain if below_soil => Advice::HarvestReady,
        WaterRegime::Drain => Advice::DrainField,
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AdvisoryEngine {
    thresholds: Thresholds,
    stages: StageTable,
}

impl AdvisoryEngine {
    pub fn new(thresholds: Thresholds, stages: StageTable) -> Self {
        Self { thresholds, stages }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn stages(&self) -> &StageTable {
        &self.stages
    }

    pub fn rain_expected(&self, weather: Option<&WeatherSnapshot>) -> bool {
        weather.is_some_and(|w| {
            w.rain_chance > self.thresholds.rain_chance_pct
                || w.rain_forecast_24h > self.thresholds.rain_forecast_mm
        })
    }

    pub fn high_heat(&self, weather: Option<&WeatherSnapshot>) -> bool {
        weather.is_some_and(|w| w.temp > self.thresholds.heat_temp_c)
    }

    /// Produce exactly one verdict.  Never fails.
    pub fn evaluate(
        &self,
        level: f64,
        stage: Option<&CropStage>,
        weather: Option<&WeatherSnapshot>,
    ) -> AdvisoryVerdict {
        let (stage_name, regime) = match stage {
            Some(s) => (s.stage_name.as_str(), self.stages.regime(s.stage_index)),
            None => (DEFAULT_STAGE_NAME, DEFAULT_STAGE_REGIME),
        };

        let c = Conditions {
            level,
            stage_name,
            regime,
            rain_expected: self.rain_expected(weather),
            high_heat: self.high_heat(weather),
            weather,
            limits: &self.thresholds,
        };

        let advice = PRIORITY_RULES
            .iter()
            .find_map(|rule| rule(&c))
            .unwrap_or_else(|| intermediate_band(&c));

        AdvisoryVerdict {
            advice,
            severity: advice.severity(),
            headline: advice.headline(),
            subtext: advice.subtext(),
            rationale: rationale(advice, &c),
            tip: tip(advice, &c),
        }
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

fn rain_summary(c: &Conditions<'_>) -> String {
    match c.weather {
        Some(w) => format!(
            "{:.0}% chance, {:.1} mm forecast in 24h",
            w.rain_chance, w.rain_forecast_24h
        ),
        None => "no weather data".to_string(),
    }
}

fn rationale(advice: Advice, c: &Conditions<'_>) -> String {
    let t = c.limits;
    let level = c.level;
    let stage = c.stage_name;
    match advice {
        Advice::DrainField => format!(
            "Level {level:.1} cm is above the soil surface ({:.1} cm) during {stage}; \
             the crop should stand in a dry field before harvest.",
            t.soil_surface_cm
        ),
        Advice::HarvestReady => format!(
            "Level {level:.1} cm is at or below the soil surface ({:.1} cm) during {stage}; \
             the field is dry enough for ripening.",
            t.soil_surface_cm
        ),
        Advice::DrainExcess => format!(
            "Level {level:.1} cm is above the high mark ({:.1} cm) and rain is expected ({}).",
            t.high_cm,
            rain_summary(c)
        ),
        Advice::StopIrrigating => format!(
            "Level {level:.1} cm is above the high mark ({:.1} cm) with no significant rain expected.",
            t.high_cm
        ),
        Advice::WaitForRain if level < t.low_cm => format!(
            "Level {level:.1} cm is below the low mark ({:.1} cm), but rain is expected ({}).",
            t.low_cm,
            rain_summary(c)
        ),
        Advice::WaitForRain => format!(
            "Level {level:.1} cm is below the soil surface ({:.1} cm) while {stage} needs \
             standing water, but rain is expected ({}).",
            t.soil_surface_cm,
            rain_summary(c)
        ),
        Advice::IrrigateNow => format!(
            "Level {level:.1} cm is below the low mark ({:.1} cm) and no rain is expected.",
            t.low_cm
        ),
        Advice::IncreaseLevel => format!(
            "Level {level:.1} cm is below the soil surface ({:.1} cm) while {stage} needs \
             standing water.",
            t.soil_surface_cm
        ),
        Advice::OptimalFlood => format!(
            "Level {level:.1} cm is between the soil surface ({:.1} cm) and the high mark \
             ({:.1} cm) during {stage}.",
            t.soil_surface_cm, t.high_cm
        ),
        Advice::AwdActive => format!(
            "Level {level:.1} cm is below the soil surface ({:.1} cm) but above the low mark \
             ({:.1} cm); {stage} tolerates drying.",
            t.soil_surface_cm, t.low_cm
        ),
        Advice::LevelsGood => format!(
            "Level {level:.1} cm is between the soil surface ({:.1} cm) and the high mark \
             ({:.1} cm); the soil is saturated.",
            t.soil_surface_cm, t.high_cm
        ),
    }
}

fn tip(advice: Advice, c: &Conditions<'_>) -> Option<String> {
    let t = c.limits;
    let target = format!("{:.0}-{:.0} cm", t.flood_target_min_cm, t.flood_target_max_cm);
    match advice {
        Advice::DrainField => Some("Open the outlet and let the field drain.".to_string()),
        Advice::HarvestReady => Some("Keep inlets closed until harvest.".to_string()),
        Advice::DrainExcess => Some(format!(
            "Lower the water to {:.0} cm before the rain arrives.",
            t.flood_target_max_cm
        )),
        Advice::StopIrrigating => Some(format!(
            "Close the inlet and let the level fall below {:.0} cm.",
            t.high_cm
        )),
        Advice::WaitForRain => {
            Some("Hold irrigation and re-check the gauge after the rain.".to_string())
        }
        Advice::IrrigateNow => Some(format!("Irrigate until the gauge reads {target}.")),
        Advice::IncreaseLevel => Some(format!("Raise the water to {target}.")),
        Advice::OptimalFlood if c.high_heat => Some(match c.weather {
            Some(w) => format!(
                "High heat ({:.1} °C): hold water at {target} to keep the canopy cool.",
                w.temp
            ),
            None => format!("High heat: hold water at {target} to keep the canopy cool."),
        }),
        Advice::OptimalFlood => None,
        Advice::AwdActive => Some(format!(
            "Let the field dry; irrigate again when the gauge reaches {:.0} cm.",
            t.low_cm
        )),
        Advice::LevelsGood => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
