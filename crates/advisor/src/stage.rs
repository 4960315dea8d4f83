//! Crop growth stages and the days-since-planting resolver.
//!
//! The stage table is configuration, not behaviour: each entry names a phase,
//! its expected length, and the water regime it calls for.  Because the
//! regime is carried per entry, the flood / drying / drain index sets always
//! partition the table with no gaps and no overlaps.

use serde::{Deserialize, Serialize};
use time::Date;

/// Stage assumed when a plot has no planting date.
pub const DEFAULT_STAGE_INDEX: usize = 1;
pub const DEFAULT_STAGE_NAME: &str = "Vegetative";
/// Regime of the default stage, independent of any configured table.
pub const DEFAULT_STAGE_REGIME: WaterRegime = WaterRegime::Drying;

/// Number of stages a valid table carries.
pub const STAGE_COUNT: usize = 8;

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// What a stage wants from the field's water.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterRegime {
    /// Keep standing water above the soil surface.
    Flood,
    /// Alternate wetting and drying is safe.
    Drying,
    /// Remove standing water ahead of harvest.
    Drain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthStage {
    pub name: String,
    pub duration_days: u32,
    pub regime: WaterRegime,
}

impl GrowthStage {
    pub fn new(name: impl Into<String>, duration_days: u32, regime: WaterRegime) -> Self {
        Self {
            name: name.into(),
            duration_days,
            regime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageTable {
    stages: Vec<GrowthStage>,
}

impl Default for StageTable {
    fn default() -> Self {
        Self::rice()
    }
}

impl StageTable {
    pub fn new(stages: Vec<GrowthStage>) -> Self {
        Self { stages }
    }

    /// 115-day transplanted rice cycle.
    pub fn rice() -> Self {
        use WaterRegime::*;
        Self::new(vec![
            GrowthStage::new("Establishment", 15, Flood),
            GrowthStage::new(DEFAULT_STAGE_NAME, 20, Drying),
            GrowthStage::new("Tillering", 15, Drying),
            GrowthStage::new("Panicle Initiation", 15, Flood),
            GrowthStage::new("Flowering", 15, Flood),
            GrowthStage::new("Milk Grain", 15, Drying),
            GrowthStage::new("Dough Grain", 10, Drain),
            GrowthStage::new("Maturity", 10, Drain),
        ])
    }

    pub fn stages(&self) -> &[GrowthStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn total_days(&self) -> i64 {
        self.stages.iter().map(|s| i64::from(s.duration_days)).sum()
    }

    /// Regime for a stage index.  Indices past the end use the last stage;
    /// an empty table falls back to the drying regime of the default stage.
    pub fn regime(&self, index: usize) -> WaterRegime {
        self.stages
            .get(index)
            .or_else(|| self.stages.last())
            .map(|s| s.regime)
            .unwrap_or(WaterRegime::Drying)
    }

    pub fn indices_with(&self, regime: WaterRegime) -> Vec<usize> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.regime == regime)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn needs_flood(&self) -> Vec<usize> {
        self.indices_with(WaterRegime::Flood)
    }

    pub fn allows_drying(&self) -> Vec<usize> {
        self.indices_with(WaterRegime::Drying)
    }

    pub fn needs_drain(&self) -> Vec<usize> {
        self.indices_with(WaterRegime::Drain)
    }

    /// Stage for a plot planted on `planting`, as of `today`.
    ///
    /// Days elapsed are whole calendar days, floored at zero for planting
    /// dates in the future.  Past the end of the cycle the last stage sticks.
    pub fn resolve(&self, planting: Date, today: Date) -> CropStage {
        let days_elapsed = (today - planting).whole_days().max(0);

        let mut cumulative = 0i64;
        for (index, stage) in self.stages.iter().enumerate() {
            cumulative += i64::from(stage.duration_days);
            if days_elapsed < cumulative {
                return CropStage {
                    stage_index: index,
                    stage_name: stage.name.clone(),
                    days_elapsed,
                };
            }
        }

        match self.stages.last() {
            Some(last) => CropStage {
                stage_index: self.stages.len() - 1,
                stage_name: last.name.clone(),
                days_elapsed,
            },
            None => CropStage {
                days_elapsed,
                ..CropStage::default_stage()
            },
        }
    }

    /// Days left in the cycle for a resolved stage, floored at zero.
    pub fn days_remaining(&self, stage: &CropStage) -> i64 {
        (self.total_days() - stage.days_elapsed).max(0)
    }
}

// ---------------------------------------------------------------------------
// Resolved stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropStage {
    pub stage_index: usize,
    pub stage_name: String,
    pub days_elapsed: i64,
}

impl CropStage {
    /// Stand-in used when the planting date is unknown.
    pub fn default_stage() -> Self {
        Self {
            stage_index: DEFAULT_STAGE_INDEX,
            stage_name: DEFAULT_STAGE_NAME.to_string(),
            days_elapsed: 0,
        }
    }

    pub fn at_index(table: &StageTable, stage_index: usize) -> Self {
        let stage_name = table
            .stages()
            .get(stage_index)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        Self {
            stage_index,
            stage_name,
            days_elapsed: 0,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
