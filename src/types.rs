//! Core data types for CocktailBerry
//!
//! This module contains the data structures the preparation engine reads
//! from and writes back to the store.
//!
//! # Main Types
//!
//! - [`Ingredient`] - A liquid with alcohol content, bottle size and fill level
//! - [`Recipe`] - An ordered list of [`RecipeLine`]s at default scale
//! - [`BottleState`] - Snapshot of which ingredient sits on which bottle slot
//!
//! # Units
//!
//! All volumes are millilitres. The `unit` label on an ingredient is only
//! used when rendering hand-add instructions.
//!
//! # Fill levels
//!
//! The fill level of an ingredient is always clamped into
//! `[0, bottle_volume]` by [`Ingredient::set_fill_level`]; deserialized rows
//! are clamped once through [`Ingredient::normalise`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of an ingredient row
pub type IngredientId = u32;

/// Identifier of a recipe row
pub type RecipeId = u32;

/// 1-based bottle slot number, physically wired to one pump
pub type Slot = usize;

/// Slowest allowed pump speed in percent
pub const MIN_PUMP_SPEED: u8 = 1;

/// Fastest allowed pump speed in percent
pub const MAX_PUMP_SPEED: u8 = 100;

fn default_pump_speed() -> u8 {
    MAX_PUMP_SPEED
}

fn default_unit() -> String {
    "ml".to_string()
}

/// An ingredient that can be poured by a pump or added by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Unique identifier
    pub id: IngredientId,
    /// Display name
    pub name: String,
    /// Alcohol content in percent (0..=100)
    #[serde(default)]
    pub alcohol: f64,
    /// Nominal bottle volume in ml
    pub bottle_volume: f64,
    /// Current fill level in ml
    #[serde(default)]
    fill_level: f64,
    /// Added by the user, never by a pump
    #[serde(default)]
    pub hand: bool,
    /// Percent of the pump's nominal flow this liquid reaches (viscosity)
    #[serde(default = "default_pump_speed")]
    pub pump_speed: u8,
    /// Display unit for hand-add instructions
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Consumption since the last reset in ml
    #[serde(default)]
    pub consumption: u32,
    /// Consumption over the lifetime of the ingredient in ml
    #[serde(default)]
    pub consumption_lifetime: u32,
}

impl Ingredient {
    /// Create a new non-alcoholic ingredient with a full 700 ml bottle
    pub fn new(id: IngredientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            alcohol: 0.0,
            bottle_volume: 700.0,
            fill_level: 700.0,
            hand: false,
            pump_speed: MAX_PUMP_SPEED,
            unit: default_unit(),
            consumption: 0,
            consumption_lifetime: 0,
        }
    }

    /// Set the alcohol content in percent
    pub fn with_alcohol(mut self, alcohol: f64) -> Self {
        self.alcohol = alcohol.clamp(0.0, 100.0);
        self
    }

    /// Set the bottle volume; the bottle is considered full
    pub fn with_bottle(mut self, volume: f64) -> Self {
        self.bottle_volume = volume.max(0.0);
        self.fill_level = self.bottle_volume;
        self
    }

    /// Set the current fill level
    pub fn with_fill_level(mut self, level: f64) -> Self {
        self.set_fill_level(level);
        self
    }

    /// Mark the ingredient as hand-added
    pub fn with_hand(mut self, hand: bool) -> Self {
        self.hand = hand;
        self
    }

    /// Set the pump speed percentage
    pub fn with_pump_speed(mut self, speed: u8) -> Self {
        self.pump_speed = speed.clamp(MIN_PUMP_SPEED, MAX_PUMP_SPEED);
        self
    }

    /// Set the display unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Current fill level in ml
    pub fn fill_level(&self) -> f64 {
        self.fill_level
    }

    /// Set the fill level, clamped into `[0, bottle_volume]`
    pub fn set_fill_level(&mut self, level: f64) {
        self.fill_level = level.clamp(0.0, self.bottle_volume.max(0.0));
    }

    /// Clamp all bounded fields after loading from disk
    pub fn normalise(&mut self) {
        self.alcohol = self.alcohol.clamp(0.0, 100.0);
        self.pump_speed = self.pump_speed.clamp(MIN_PUMP_SPEED, MAX_PUMP_SPEED);
        self.set_fill_level(self.fill_level);
    }

    /// Whether the ingredient contains alcohol
    pub fn is_alcoholic(&self) -> bool {
        self.alcohol > 0.0
    }

    /// Fill level as percentage of the bottle volume
    pub fn fill_percent(&self) -> f64 {
        if self.bottle_volume <= 0.0 {
            0.0
        } else {
            self.fill_level / self.bottle_volume * 100.0
        }
    }
}

/// One ingredient line of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLine {
    /// Snapshot of the ingredient this line uses
    pub ingredient: Ingredient,
    /// Amount in ml at default scale
    pub amount: f64,
    /// Phase this line is poured in; lower orders go first
    #[serde(default = "default_recipe_order")]
    pub recipe_order: i32,
}

fn default_recipe_order() -> i32 {
    1
}

impl RecipeLine {
    /// Create a new line poured in the first phase
    pub fn new(ingredient: Ingredient, amount: f64) -> Self {
        Self {
            ingredient,
            amount,
            recipe_order: default_recipe_order(),
        }
    }

    /// Set the phase of this line
    pub fn with_order(mut self, order: i32) -> Self {
        self.recipe_order = order;
        self
    }
}

/// A cocktail recipe at default scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Unique identifier
    pub id: RecipeId,
    /// Display name
    pub name: String,
    /// Alcohol percentage at default scale
    #[serde(default)]
    pub alcohol: f64,
    /// Volume in ml at default scale
    #[serde(default)]
    pub amount: f64,
    /// Whether the recipe is offered at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether a virgin version may be poured
    #[serde(default)]
    pub virgin_available: bool,
    /// Ingredient lines in display order
    #[serde(default)]
    pub lines: Vec<RecipeLine>,
    /// Finished preparations since the last reset
    #[serde(default)]
    pub counter: u32,
    /// Finished preparations over the lifetime of the recipe
    #[serde(default)]
    pub counter_lifetime: u32,
    /// Finished virgin preparations since the last reset
    #[serde(default)]
    pub counter_virgin: u32,
    /// Finished virgin preparations over the lifetime of the recipe
    #[serde(default)]
    pub counter_lifetime_virgin: u32,
}

fn default_true() -> bool {
    true
}

impl Recipe {
    /// Create a new enabled recipe without lines
    pub fn new(id: RecipeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            alcohol: 0.0,
            amount: 0.0,
            enabled: true,
            virgin_available: false,
            lines: Vec::new(),
            counter: 0,
            counter_lifetime: 0,
            counter_virgin: 0,
            counter_lifetime_virgin: 0,
        }
    }

    /// Append a line and refresh the derived amount and alcohol
    pub fn with_line(mut self, line: RecipeLine) -> Self {
        self.lines.push(line);
        self.refresh_totals();
        self
    }

    /// Allow or forbid the virgin version
    pub fn with_virgin_available(mut self, available: bool) -> Self {
        self.virgin_available = available;
        self
    }

    /// Recompute `amount` and `alcohol` from the lines
    pub fn refresh_totals(&mut self) {
        self.amount = self.lines.iter().map(|l| l.amount).sum();
        self.alcohol = if self.amount > 0.0 {
            let weighted: f64 = self
                .lines
                .iter()
                .map(|l| l.amount * l.ingredient.alcohol)
                .sum();
            (weighted / self.amount * 10.0).round() / 10.0
        } else {
            0.0
        };
    }

    /// Lines poured by the machine
    pub fn machine_lines(&self) -> impl Iterator<Item = &RecipeLine> {
        self.lines.iter().filter(|l| !l.ingredient.hand)
    }

    /// Lines added by hand
    pub fn hand_lines(&self) -> impl Iterator<Item = &RecipeLine> {
        self.lines.iter().filter(|l| l.ingredient.hand)
    }
}

/// What is mounted on one bottle slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleSlot {
    /// Slot number (1-based)
    pub slot: Slot,
    /// Mounted ingredient, if any
    pub ingredient_id: Option<IngredientId>,
    /// Fill level of the mounted bottle in ml
    pub fill_level: f64,
    /// Volume of the mounted bottle in ml
    pub bottle_volume: f64,
}

/// Snapshot of all bottle slots, taken at planning time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BottleState {
    slots: BTreeMap<Slot, BottleSlot>,
}

impl BottleState {
    /// Create an empty bottle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount an ingredient on a slot using its current fill level
    pub fn mount(&mut self, slot: Slot, ingredient: &Ingredient) {
        self.slots.insert(
            slot,
            BottleSlot {
                slot,
                ingredient_id: Some(ingredient.id),
                fill_level: ingredient.fill_level(),
                bottle_volume: ingredient.bottle_volume,
            },
        );
    }

    /// Insert a raw slot entry
    pub fn insert(&mut self, entry: BottleSlot) {
        self.slots.insert(entry.slot, entry);
    }

    /// Get the entry of a slot
    pub fn get(&self, slot: Slot) -> Option<&BottleSlot> {
        self.slots.get(&slot)
    }

    /// Find the slot an ingredient is mounted on
    pub fn slot_of(&self, ingredient_id: IngredientId) -> Option<&BottleSlot> {
        self.slots
            .values()
            .find(|s| s.ingredient_id == Some(ingredient_id))
    }

    /// Whether an ingredient is mounted anywhere
    pub fn is_mounted(&self, ingredient_id: IngredientId) -> bool {
        self.slot_of(ingredient_id).is_some()
    }

    /// Iterate over all slot entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = &BottleSlot> {
        self.slots.values()
    }

    /// Number of slot entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slot entries
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
