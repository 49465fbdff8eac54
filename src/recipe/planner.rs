//! Turning a scaled recipe into a pump plan
//!
//! The planner checks that a scaled recipe can be poured with the bottles
//! currently mounted and produces a [`PreparationPlan`]: phases (one per
//! `recipe_order`) made of waves (at most `max_simultaneous_pumps` pumps
//! each) made of [`PumpOp`]s.
//!
//! # Validation order
//!
//! 1. The recipe is possible (enabled, virgin version allowed)
//! 2. Every machine ingredient is mounted on a wired slot
//! 3. The number of hand ingredients is within the limit
//! 4. Every bottle holds at least [`FILL_LEVEL_TOLERANCE`] of what is needed
//!
//! Validation never touches hardware.

use super::scaling::ScaledRecipe;
use crate::config::PumpConfig;
use crate::error::{BerryError, Result};
use crate::hardware::PinAddress;
use crate::types::{BottleState, IngredientId, Recipe, RecipeId, Slot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Share of the required volume a bottle must hold
pub const FILL_LEVEL_TOLERANCE: f64 = 0.8;

/// Resolution of pump open times in seconds
pub const OPEN_TIME_RESOLUTION_S: f64 = 0.1;

/// Limits applied while validating and planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPolicy {
    pub max_hand_ingredients: usize,
    pub enforce_fill_level: bool,
    pub max_simultaneous_pumps: usize,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        crate::config::EngineConfig::default().plan_policy()
    }
}

/// What a plan is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// A cocktail; consumption is committed
    Preparation,
    /// All pumps flushing
    Cleaning,
    /// Filling the tube of a freshly mounted bottle
    Priming,
    /// A single pump pouring a fixed volume to measure its flow
    Calibration,
}

impl PlanKind {
    /// Whether consumption of this run is written to the store
    pub fn commits(&self) -> bool {
        matches!(self, PlanKind::Preparation)
    }
}

/// One pump running for a fixed time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpOp {
    pub slot: Slot,
    pub pin: PinAddress,
    /// Ingredient poured (none for cleaning)
    pub ingredient_id: Option<IngredientId>,
    /// Name shown in logs and records
    pub label: String,
    /// Flow in ml/s after applying the pump speed
    pub effective_flow: f64,
    /// Volume to pour in ml
    pub volume: f64,
    /// Seconds the pump stays open (multiple of 0.1 s)
    pub open_time: f64,
}

impl PumpOp {
    /// Op pouring `volume` through a pump at `pump_speed` percent
    pub fn pour(slot: Slot, pump: &PumpConfig, pump_speed: u8, volume: f64) -> Result<Self> {
        let effective_flow = pump.volume_flow * f64::from(pump_speed) / 100.0;
        if effective_flow <= 0.0 {
            return Err(BerryError::Config(format!(
                "Pump {} has no flow at {}% speed",
                slot, pump_speed
            )));
        }
        Ok(Self {
            slot,
            pin: pump.address()?,
            ingredient_id: None,
            label: format!("Slot {}", slot),
            effective_flow,
            volume,
            open_time: round_open_time(volume / effective_flow),
        })
    }

    /// Op running a pump for a fixed time
    pub fn timed(slot: Slot, pump: &PumpConfig, seconds: f64) -> Result<Self> {
        Ok(Self {
            slot,
            pin: pump.address()?,
            ingredient_id: None,
            label: format!("Slot {}", slot),
            effective_flow: pump.volume_flow,
            volume: pump.volume_flow * seconds,
            open_time: round_open_time(seconds),
        })
    }

    pub fn with_ingredient(mut self, id: IngredientId, name: impl Into<String>) -> Self {
        self.ingredient_id = Some(id);
        self.label = name.into();
        self
    }

    /// Open time as a duration, exact to the millisecond
    pub fn deadline(&self) -> Duration {
        Duration::from_millis((self.open_time * 1000.0).round() as u64)
    }
}

/// Round an open time to 0.1 s, never below 0.1 s for a positive time
pub fn round_open_time(seconds: f64) -> f64 {
    if seconds <= 0.0 || !seconds.is_finite() {
        return 0.0;
    }
    let steps = (seconds / OPEN_TIME_RESOLUTION_S).round().max(1.0);
    (steps * OPEN_TIME_RESOLUTION_S * 10.0).round() / 10.0
}

/// Pumps that run together
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Wave {
    pub ops: Vec<PumpOp>,
}

impl Wave {
    /// Longest open time in the wave
    pub fn duration(&self) -> f64 {
        self.ops.iter().map(|op| op.open_time).fold(0.0, f64::max)
    }

    pub fn pins(&self) -> Vec<PinAddress> {
        self.ops.iter().map(|op| op.pin).collect()
    }
}

/// All lines sharing one `recipe_order`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub recipe_order: i32,
    pub waves: Vec<Wave>,
}

impl Phase {
    /// Sum of the wave durations
    pub fn duration(&self) -> f64 {
        self.waves.iter().map(Wave::duration).sum()
    }

    pub fn ops(&self) -> impl Iterator<Item = &PumpOp> {
        self.waves.iter().flat_map(|w| w.ops.iter())
    }
}

/// Instruction for the user to add an ingredient by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandAdd {
    pub ingredient_id: IngredientId,
    pub ingredient_name: String,
    pub amount: f64,
    pub unit: String,
}

/// Everything the engine needs to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationPlan {
    pub kind: PlanKind,
    pub recipe_id: Option<RecipeId>,
    pub name: String,
    pub virgin: bool,
    pub phases: Vec<Phase>,
    pub hand_adds: Vec<HandAdd>,
}

impl PreparationPlan {
    /// Plan without any pump ops
    pub fn empty(kind: PlanKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            recipe_id: None,
            name: name.into(),
            virgin: false,
            phases: Vec::new(),
            hand_adds: Vec::new(),
        }
    }

    /// Planned run time in seconds
    pub fn total_duration(&self) -> f64 {
        self.phases.iter().map(Phase::duration).sum()
    }

    pub fn ops(&self) -> impl Iterator<Item = &PumpOp> {
        self.phases.iter().flat_map(Phase::ops)
    }

    pub fn wave_count(&self) -> usize {
        self.phases.iter().map(|p| p.waves.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Hand-add instructions shown after the run
    pub fn comment_text(&self) -> String {
        comment_text(&self.hand_adds)
    }
}

/// Render hand-add instructions, one line per ingredient
pub fn comment_text(hand_adds: &[HandAdd]) -> String {
    if hand_adds.is_empty() {
        return String::new();
    }
    let mut text = String::from("Please add:");
    for add in hand_adds {
        text.push_str(&format!(
            "\n- {:.0} {} {}",
            add.amount, add.unit, add.ingredient_name
        ));
    }
    text
}

/// Split ops into consecutive waves of at most `max` pumps, keeping order
pub fn split_waves(ops: Vec<PumpOp>, max: usize) -> Vec<Wave> {
    let max = max.max(1);
    let mut waves = Vec::with_capacity(ops.len().div_ceil(max));
    let mut current = Vec::with_capacity(max);
    for op in ops {
        current.push(op);
        if current.len() == max {
            waves.push(Wave {
                ops: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        waves.push(Wave { ops: current });
    }
    waves
}

/// Validates scaled recipes and builds plans against a pump table
#[derive(Debug, Clone)]
pub struct Planner {
    pumps: Vec<PumpConfig>,
    policy: PlanPolicy,
}

impl Planner {
    /// Create a planner; `pumps[0]` drives slot 1
    pub fn new(pumps: Vec<PumpConfig>, policy: PlanPolicy) -> Self {
        Self { pumps, policy }
    }

    pub fn policy(&self) -> &PlanPolicy {
        &self.policy
    }

    fn pump(&self, slot: Slot) -> Option<&PumpConfig> {
        slot.checked_sub(1).and_then(|i| self.pumps.get(i))
    }

    /// Check a scaled recipe against the bottles and build its plan
    pub fn validate(&self, scaled: &ScaledRecipe, bottles: &BottleState) -> Result<PreparationPlan> {
        self.check_possible(scaled)?;
        self.check_bottles(scaled, bottles)?;
        self.check_hand_count(scaled)?;
        if self.policy.enforce_fill_level {
            self.check_levels(scaled, bottles)?;
        }
        self.build_plan(scaled, bottles)
    }

    fn check_possible(&self, scaled: &ScaledRecipe) -> Result<()> {
        if !scaled.enabled {
            return Err(BerryError::RecipeNotPossible(format!(
                "'{}' is disabled",
                scaled.name
            )));
        }
        if scaled.virgin {
            if !scaled.virgin_available {
                return Err(BerryError::RecipeNotPossible(format!(
                    "'{}' has no virgin version",
                    scaled.name
                )));
            }
            if scaled.non_alcoholic_machine_volume() <= 0.0 {
                return Err(BerryError::RecipeNotPossible(format!(
                    "'{}' has no non-alcoholic machine ingredients",
                    scaled.name
                )));
            }
        }
        Ok(())
    }

    fn check_bottles(&self, scaled: &ScaledRecipe, bottles: &BottleState) -> Result<()> {
        for line in scaled.machine_lines().filter(|l| l.amount > 0.0) {
            let wired = bottles
                .slot_of(line.ingredient.id)
                .map(|entry| self.pump(entry.slot).is_some())
                .unwrap_or(false);
            if !wired {
                return Err(BerryError::NoBottleForIngredient {
                    ingredient_id: line.ingredient.id,
                    ingredient_name: line.ingredient.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_hand_count(&self, scaled: &ScaledRecipe) -> Result<()> {
        let count = scaled.hand_lines().filter(|l| l.amount > 0.0).count();
        if count > self.policy.max_hand_ingredients {
            return Err(BerryError::TooManyHandIngredients {
                count,
                max: self.policy.max_hand_ingredients,
            });
        }
        Ok(())
    }

    fn check_levels(&self, scaled: &ScaledRecipe, bottles: &BottleState) -> Result<()> {
        let mut needs: BTreeMap<IngredientId, (f64, &str)> = BTreeMap::new();
        for line in scaled.machine_lines().filter(|l| l.amount > 0.0) {
            let entry = needs
                .entry(line.ingredient.id)
                .or_insert((0.0, line.ingredient.name.as_str()));
            entry.0 += line.amount;
        }

        for (id, (need, name)) in needs {
            let have = bottles.slot_of(id).map(|s| s.fill_level).unwrap_or(0.0);
            if have < FILL_LEVEL_TOLERANCE * need {
                return Err(BerryError::InsufficientLevel {
                    ingredient_id: id,
                    ingredient_name: name.to_string(),
                    have,
                    need,
                });
            }
        }
        Ok(())
    }

    /// Build the plan without checking limits or levels
    ///
    /// Lines of the same ingredient within one phase are merged into one op.
    pub fn build_plan(&self, scaled: &ScaledRecipe, bottles: &BottleState) -> Result<PreparationPlan> {
        let mut phases: BTreeMap<i32, Vec<PumpOp>> = BTreeMap::new();

        for line in scaled.machine_lines().filter(|l| l.amount > 0.0) {
            let ingredient = &line.ingredient;
            let no_bottle = || BerryError::NoBottleForIngredient {
                ingredient_id: ingredient.id,
                ingredient_name: ingredient.name.clone(),
            };
            let slot = bottles.slot_of(ingredient.id).ok_or_else(no_bottle)?.slot;
            let pump = self.pump(slot).ok_or_else(no_bottle)?;

            let ops = phases.entry(line.recipe_order).or_default();
            let merged = ops.iter().position(|op| op.ingredient_id == Some(ingredient.id));
            let volume = merged.map_or(0.0, |index| ops[index].volume) + line.amount;
            let op = PumpOp::pour(slot, pump, ingredient.pump_speed, volume)?
                .with_ingredient(ingredient.id, ingredient.name.clone());
            // A merged op keeps the position of its first line
            match merged {
                Some(index) => ops[index] = op,
                None => ops.push(op),
            }
        }

        let phases = phases
            .into_iter()
            .filter(|(_, ops)| !ops.is_empty())
            .map(|(recipe_order, ops)| Phase {
                recipe_order,
                waves: split_waves(ops, self.policy.max_simultaneous_pumps),
            })
            .collect();

        let hand_adds = scaled
            .hand_lines()
            .filter(|l| l.amount > 0.0)
            .map(|l| HandAdd {
                ingredient_id: l.ingredient.id,
                ingredient_name: l.ingredient.name.clone(),
                amount: l.amount,
                unit: l.ingredient.unit.clone(),
            })
            .collect();

        Ok(PreparationPlan {
            kind: PlanKind::Preparation,
            recipe_id: Some(scaled.recipe_id),
            name: scaled.name.clone(),
            virgin: scaled.virgin,
            phases,
            hand_adds,
        })
    }

    /// Plan running every configured pump for `seconds`
    pub fn cleaning_plan(&self, seconds: f64) -> Result<PreparationPlan> {
        let ops = self
            .pumps
            .iter()
            .enumerate()
            .map(|(i, pump)| PumpOp::timed(i + 1, pump, seconds))
            .collect::<Result<Vec<_>>>()?;

        let mut plan = PreparationPlan::empty(PlanKind::Cleaning, "Cleaning");
        if !ops.is_empty() {
            plan.phases.push(Phase {
                recipe_order: 1,
                waves: split_waves(ops, self.policy.max_simultaneous_pumps),
            });
        }
        Ok(plan)
    }

    /// Plan pouring `volume` through a single slot
    ///
    /// `pump_speed` of `None` runs the pump at its nominal flow.
    pub fn single_pump_plan(
        &self,
        kind: PlanKind,
        slot: Slot,
        volume: f64,
        pump_speed: Option<u8>,
    ) -> Result<PreparationPlan> {
        let pump = self
            .pump(slot)
            .ok_or_else(|| BerryError::Config(format!("Slot {} has no pump configured", slot)))?;
        let name = match kind {
            PlanKind::Priming => format!("Priming slot {}", slot),
            _ => format!("Dispensing {:.0} ml on slot {}", volume, slot),
        };

        let mut plan = PreparationPlan::empty(kind, name);
        if volume > 0.0 {
            let op = PumpOp::pour(slot, pump, pump_speed.unwrap_or(100), volume)?;
            plan.phases.push(Phase {
                recipe_order: 1,
                waves: vec![Wave { ops: vec![op] }],
            });
        }
        Ok(plan)
    }
}

/// Enabled recipes whose machine ingredients are all mounted
///
/// Recipes needing more hand ingredients than allowed are left out as well.
pub fn possible_recipes<'a>(
    recipes: &'a [Recipe],
    bottles: &BottleState,
    policy: &PlanPolicy,
) -> Vec<&'a Recipe> {
    recipes
        .iter()
        .filter(|r| r.enabled)
        .filter(|r| {
            r.machine_lines()
                .filter(|l| l.amount > 0.0)
                .all(|l| bottles.is_mounted(l.ingredient.id))
        })
        .filter(|r| r.hand_lines().count() <= policy.max_hand_ingredients)
        .collect()
}
