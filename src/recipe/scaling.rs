//! Scaling a recipe to a glass size and strength
//!
//! A recipe is stored at its default volume. Before planning it is scaled in
//! two steps: alcoholic lines are multiplied by the alcohol factor, then all
//! lines are stretched so the drink fills the requested volume. Amounts are
//! rounded to whole millilitres with the largest-remainder method, so the
//! scaled lines always add up to the rounded target and scaling an already
//! scaled recipe to the same volume changes nothing.

use crate::types::{Ingredient, Recipe, RecipeId, RecipeLine};
use serde::{Deserialize, Serialize};

/// Requested glass size and strength
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    /// Volume of the finished drink in ml
    pub target_volume: f64,
    /// Multiplier for alcoholic lines (0 = virgin, 1 = recipe strength)
    pub alcohol_factor: f64,
}

impl ScaleParams {
    pub fn new(target_volume: f64, alcohol_factor: f64) -> Self {
        Self {
            target_volume,
            alcohol_factor: alcohol_factor.max(0.0),
        }
    }

    /// Non-alcoholic version at the given volume
    pub fn virgin(target_volume: f64) -> Self {
        Self::new(target_volume, 0.0)
    }

    pub fn is_virgin(&self) -> bool {
        self.alcohol_factor == 0.0
    }
}

/// One line of a scaled recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledLine {
    pub ingredient: Ingredient,
    /// Whole millilitres to pour or add
    pub amount: f64,
    pub recipe_order: i32,
}

/// A recipe scaled to a concrete glass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledRecipe {
    pub recipe_id: RecipeId,
    pub name: String,
    pub enabled: bool,
    pub virgin_available: bool,
    /// Scaled with an alcohol factor of zero
    pub virgin: bool,
    pub params: ScaleParams,
    /// Resulting alcohol percentage (one decimal)
    pub alcohol: f64,
    /// Sum of all scaled amounts
    pub amount: f64,
    pub lines: Vec<ScaledLine>,
}

impl ScaledRecipe {
    /// Lines poured by the machine
    pub fn machine_lines(&self) -> impl Iterator<Item = &ScaledLine> {
        self.lines.iter().filter(|l| !l.ingredient.hand)
    }

    /// Lines added by hand
    pub fn hand_lines(&self) -> impl Iterator<Item = &ScaledLine> {
        self.lines.iter().filter(|l| l.ingredient.hand)
    }

    /// Total volume the machine pours
    pub fn machine_volume(&self) -> f64 {
        self.machine_lines().map(|l| l.amount).sum()
    }

    /// Volume of non-alcoholic machine lines
    pub fn non_alcoholic_machine_volume(&self) -> f64 {
        self.machine_lines()
            .filter(|l| !l.ingredient.is_alcoholic())
            .map(|l| l.amount)
            .sum()
    }

    /// Turn the scaled amounts back into a recipe
    pub fn as_recipe(&self) -> Recipe {
        let mut recipe = Recipe::new(self.recipe_id, self.name.clone());
        recipe.enabled = self.enabled;
        recipe.virgin_available = self.virgin_available;
        recipe.lines = self
            .lines
            .iter()
            .map(|l| RecipeLine::new(l.ingredient.clone(), l.amount).with_order(l.recipe_order))
            .collect();
        recipe.refresh_totals();
        recipe
    }
}

/// Scale a recipe to a target volume and alcohol factor
pub fn scale(recipe: &Recipe, params: ScaleParams) -> ScaledRecipe {
    let adjusted: Vec<f64> = recipe
        .lines
        .iter()
        .map(|line| {
            let factor = if line.ingredient.is_alcoholic() {
                params.alcohol_factor
            } else {
                1.0
            };
            line.amount.max(0.0) * factor
        })
        .collect();

    let intermediate: f64 = adjusted.iter().sum();
    let amounts = if intermediate > 0.0 && params.target_volume > 0.0 {
        let ratio = params.target_volume / intermediate;
        let raw: Vec<f64> = adjusted.iter().map(|a| a * ratio).collect();
        largest_remainder(&raw, params.target_volume.round())
    } else {
        vec![0.0; adjusted.len()]
    };

    let lines: Vec<ScaledLine> = recipe
        .lines
        .iter()
        .zip(amounts)
        .map(|(line, amount)| ScaledLine {
            ingredient: line.ingredient.clone(),
            amount,
            recipe_order: line.recipe_order,
        })
        .collect();

    let amount: f64 = lines.iter().map(|l| l.amount).sum();
    let alcohol = if amount > 0.0 {
        let weighted: f64 = lines.iter().map(|l| l.amount * l.ingredient.alcohol).sum();
        (weighted / amount * 10.0).round() / 10.0
    } else {
        0.0
    };

    ScaledRecipe {
        recipe_id: recipe.id,
        name: recipe.name.clone(),
        enabled: recipe.enabled,
        virgin_available: recipe.virgin_available,
        virgin: params.is_virgin(),
        params,
        alcohol,
        amount,
        lines,
    }
}

/// Round values to integers whose sum is exactly `total`
///
/// Every value is floored, then the missing units go to the values with the
/// largest fractional parts (earlier lines win ties).
fn largest_remainder(raw: &[f64], total: f64) -> Vec<f64> {
    const EPSILON: f64 = 1e-9;

    let mut floors: Vec<f64> = raw.iter().map(|v| (v + EPSILON).floor()).collect();
    let assigned: f64 = floors.iter().sum();
    let mut missing = (total - assigned).round().max(0.0) as usize;

    let mut order: Vec<usize> = (0..raw.len()).filter(|&i| raw[i] > 0.0).collect();
    order.sort_by(|&a, &b| {
        let ra = raw[a] - floors[a];
        let rb = raw[b] - floors[b];
        rb.total_cmp(&ra).then(a.cmp(&b))
    });

    for index in order {
        if missing == 0 {
            break;
        }
        floors[index] += 1.0;
        missing -= 1;
    }
    floors
}
