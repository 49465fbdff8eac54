//! Persistent recipe and bottle state
//!
//! The engine reads a snapshot before planning and writes exactly once, at
//! commit. [`Store`] is the contract; [`Inventory`] is the plain data both
//! bundled stores keep and the place where a run is applied.
//!
//! # Transactions
//!
//! [`Inventory::apply_run`] either applies every change of a run or returns
//! an error having changed nothing visible: stores apply it to a copy and
//! swap the copy in only after success (and, for [`JsonStore`], after the
//! file has been replaced).

pub mod json;
pub mod memory;

pub use json::{JsonStore, STORE_FILE};
pub use memory::MemoryStore;

use crate::error::{BerryError, Result};
use crate::types::{BottleState, Ingredient, IngredientId, Recipe, RecipeId, RecipeLine, Slot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delivered volume per ingredient in ml, unrounded
pub type ConsumptionMap = BTreeMap<IngredientId, f64>;

/// Storage the engine reads from and commits to
pub trait Store: Send + Sync {
    /// Recipe with ingredient snapshots, `None` if unknown
    fn get_recipe(&self, id: RecipeId) -> Result<Option<Recipe>>;

    /// All recipes
    fn list_recipes(&self) -> Result<Vec<Recipe>>;

    /// Which ingredient is mounted on which slot
    fn get_bottle_state(&self) -> Result<BottleState>;

    /// Apply the consumption of a run atomically
    ///
    /// Counters are only increased for `finished` runs.
    fn commit_run(
        &self,
        consumption: &ConsumptionMap,
        recipe_id: RecipeId,
        was_virgin: bool,
        finished: bool,
    ) -> Result<()>;

    /// Mark the bottle on `slot` as full and return the refilled ingredient
    fn refill_bottle(&self, slot: Slot) -> Result<Ingredient>;

    /// Zero the resettable consumption and recipe counters
    fn reset_consumption(&self) -> Result<()>;
}

// ==================== Rows ====================

/// Recipe line referring to an ingredient by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRow {
    pub ingredient_id: IngredientId,
    pub amount: f64,
    #[serde(default = "default_order")]
    pub recipe_order: i32,
}

fn default_order() -> i32 {
    1
}

/// Stored form of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRow {
    pub id: RecipeId,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub virgin_available: bool,
    #[serde(default)]
    pub lines: Vec<LineRow>,
    #[serde(default)]
    pub counter: u32,
    #[serde(default)]
    pub counter_lifetime: u32,
    #[serde(default)]
    pub counter_virgin: u32,
    #[serde(default)]
    pub counter_lifetime_virgin: u32,
}

fn default_enabled() -> bool {
    true
}

impl From<&Recipe> for RecipeRow {
    fn from(recipe: &Recipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name.clone(),
            enabled: recipe.enabled,
            virgin_available: recipe.virgin_available,
            lines: recipe
                .lines
                .iter()
                .map(|l| LineRow {
                    ingredient_id: l.ingredient.id,
                    amount: l.amount,
                    recipe_order: l.recipe_order,
                })
                .collect(),
            counter: recipe.counter,
            counter_lifetime: recipe.counter_lifetime,
            counter_virgin: recipe.counter_virgin,
            counter_lifetime_virgin: recipe.counter_lifetime_virgin,
        }
    }
}

/// Ingredient mounted on a bottle slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleAssignment {
    pub slot: Slot,
    pub ingredient_id: Option<IngredientId>,
}

// ==================== Inventory ====================

/// Everything a store persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub recipes: Vec<RecipeRow>,
    #[serde(default)]
    pub bottles: Vec<BottleAssignment>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp loaded values into range
    pub fn normalise(&mut self) {
        for ingredient in &mut self.ingredients {
            ingredient.normalise();
        }
    }

    /// Add or replace an ingredient
    pub fn upsert_ingredient(&mut self, ingredient: Ingredient) {
        match self.ingredients.iter_mut().find(|i| i.id == ingredient.id) {
            Some(existing) => *existing = ingredient,
            None => self.ingredients.push(ingredient),
        }
    }

    /// Add or replace a recipe; its ingredients are added if unknown
    pub fn upsert_recipe(&mut self, recipe: &Recipe) {
        for line in &recipe.lines {
            if self.ingredient(line.ingredient.id).is_none() {
                self.ingredients.push(line.ingredient.clone());
            }
        }
        let row = RecipeRow::from(recipe);
        match self.recipes.iter_mut().find(|r| r.id == recipe.id) {
            Some(existing) => *existing = row,
            None => self.recipes.push(row),
        }
    }

    /// Mount an ingredient on a slot, unmounting it elsewhere
    pub fn mount(&mut self, slot: Slot, ingredient_id: Option<IngredientId>) {
        if let Some(id) = ingredient_id {
            for bottle in &mut self.bottles {
                if bottle.ingredient_id == Some(id) {
                    bottle.ingredient_id = None;
                }
            }
        }
        match self.bottles.iter_mut().find(|b| b.slot == slot) {
            Some(bottle) => bottle.ingredient_id = ingredient_id,
            None => self.bottles.push(BottleAssignment {
                slot,
                ingredient_id,
            }),
        }
    }

    pub fn ingredient(&self, id: IngredientId) -> Option<&Ingredient> {
        self.ingredients.iter().find(|i| i.id == id)
    }

    fn ingredient_mut(&mut self, id: IngredientId) -> Result<&mut Ingredient> {
        self.ingredients
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| BerryError::Store(format!("Unknown ingredient {}", id)))
    }

    /// Materialise a recipe with current ingredient snapshots
    pub fn recipe(&self, id: RecipeId) -> Result<Option<Recipe>> {
        self.recipes
            .iter()
            .find(|r| r.id == id)
            .map(|row| self.materialise(row))
            .transpose()
    }

    pub fn recipes(&self) -> Result<Vec<Recipe>> {
        self.recipes.iter().map(|row| self.materialise(row)).collect()
    }

    fn materialise(&self, row: &RecipeRow) -> Result<Recipe> {
        let mut recipe = Recipe::new(row.id, row.name.clone());
        recipe.enabled = row.enabled;
        recipe.virgin_available = row.virgin_available;
        recipe.counter = row.counter;
        recipe.counter_lifetime = row.counter_lifetime;
        recipe.counter_virgin = row.counter_virgin;
        recipe.counter_lifetime_virgin = row.counter_lifetime_virgin;
        for line in &row.lines {
            let ingredient = self.ingredient(line.ingredient_id).ok_or_else(|| {
                BerryError::Store(format!(
                    "Recipe '{}' uses unknown ingredient {}",
                    row.name, line.ingredient_id
                ))
            })?;
            recipe
                .lines
                .push(RecipeLine::new(ingredient.clone(), line.amount).with_order(line.recipe_order));
        }
        recipe.refresh_totals();
        Ok(recipe)
    }

    /// Bottle snapshot with current fill levels
    pub fn bottle_state(&self) -> BottleState {
        let mut state = BottleState::new();
        for bottle in &self.bottles {
            let Some(id) = bottle.ingredient_id else {
                continue;
            };
            if let Some(ingredient) = self.ingredient(id) {
                state.mount(bottle.slot, ingredient);
            }
        }
        state
    }

    /// Apply the consumption of one run
    ///
    /// Each consumption is rounded once to whole millilitres. On error the
    /// inventory may be partially changed; callers apply to a copy.
    pub fn apply_run(
        &mut self,
        consumption: &ConsumptionMap,
        recipe_id: RecipeId,
        was_virgin: bool,
        finished: bool,
    ) -> Result<()> {
        for (&id, &amount) in consumption {
            let rounded = amount.round();
            if rounded <= 0.0 {
                continue;
            }
            let ingredient = self.ingredient_mut(id)?;
            let level = ingredient.fill_level();
            ingredient.set_fill_level((level - rounded).max(0.0));
            ingredient.consumption = ingredient.consumption.saturating_add(rounded as u32);
            ingredient.consumption_lifetime =
                ingredient.consumption_lifetime.saturating_add(rounded as u32);
        }

        if finished {
            let row = self
                .recipes
                .iter_mut()
                .find(|r| r.id == recipe_id)
                .ok_or_else(|| BerryError::Store(format!("Unknown recipe {}", recipe_id)))?;
            if was_virgin {
                row.counter_virgin += 1;
                row.counter_lifetime_virgin += 1;
            } else {
                row.counter += 1;
                row.counter_lifetime += 1;
            }
        }
        Ok(())
    }

    /// Fill the bottle on `slot` to its volume
    pub fn refill(&mut self, slot: Slot) -> Result<Ingredient> {
        let id = self
            .bottles
            .iter()
            .find(|b| b.slot == slot)
            .and_then(|b| b.ingredient_id)
            .ok_or_else(|| BerryError::Store(format!("No bottle mounted on slot {}", slot)))?;
        let ingredient = self.ingredient_mut(id)?;
        ingredient.set_fill_level(ingredient.bottle_volume);
        Ok(ingredient.clone())
    }

    pub fn reset_consumption(&mut self) {
        for ingredient in &mut self.ingredients {
            ingredient.consumption = 0;
        }
        for recipe in &mut self.recipes {
            recipe.counter = 0;
            recipe.counter_virgin = 0;
        }
    }

    /// Small inventory for demos: a Cuba Libre and a virgin-capable Mojito
    pub fn sample() -> Self {
        let rum = Ingredient::new(1, "White Rum").with_alcohol(40.0);
        let cola = Ingredient::new(2, "Cola").with_bottle(1000.0);
        let soda = Ingredient::new(3, "Soda").with_bottle(1000.0);
        let syrup = Ingredient::new(4, "Sugar Syrup").with_pump_speed(60);
        let lime = Ingredient::new(5, "Lime Juice").with_hand(true);

        let mut inventory = Self::new();
        inventory.upsert_recipe(
            &Recipe::new(1, "Cuba Libre")
                .with_line(RecipeLine::new(rum.clone(), 80.0))
                .with_line(RecipeLine::new(cola.clone(), 210.0).with_order(2)),
        );
        inventory.upsert_recipe(
            &Recipe::new(2, "Mojito")
                .with_line(RecipeLine::new(rum, 50.0))
                .with_line(RecipeLine::new(syrup, 20.0))
                .with_line(RecipeLine::new(lime, 20.0))
                .with_line(RecipeLine::new(soda, 110.0).with_order(2))
                .with_virgin_available(true),
        );
        for (slot, id) in [(1, 1), (2, 2), (3, 3), (4, 4)] {
            inventory.mount(slot, Some(id));
        }
        inventory
    }
}
