//! Test data builders for creating test objects

use cocktailberry_rs::{Ingredient, Recipe, RecipeLine};

/// Builder for creating test Ingredients
pub struct IngredientBuilder {
    ingredient: Ingredient,
}

impl IngredientBuilder {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            ingredient: Ingredient::new(id, name),
        }
    }

    pub fn alcohol(mut self, alcohol: f64) -> Self {
        self.ingredient = self.ingredient.with_alcohol(alcohol);
        self
    }

    pub fn fill_level(mut self, level: f64) -> Self {
        self.ingredient = self.ingredient.with_fill_level(level);
        self
    }

    pub fn pump_speed(mut self, speed: u8) -> Self {
        self.ingredient = self.ingredient.with_pump_speed(speed);
        self
    }

    pub fn hand(mut self) -> Self {
        self.ingredient = self.ingredient.with_hand(true);
        self
    }

    pub fn build(self) -> Ingredient {
        self.ingredient
    }
}

/// Builder for creating test Recipes
pub struct RecipeBuilder {
    recipe: Recipe,
}

impl RecipeBuilder {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            recipe: Recipe::new(id, name),
        }
    }

    /// Add a line in phase 1
    pub fn line(self, ingredient: &Ingredient, amount: f64) -> Self {
        self.line_in(ingredient, amount, 1)
    }

    /// Add a line in the given phase
    pub fn line_in(mut self, ingredient: &Ingredient, amount: f64, order: i32) -> Self {
        self.recipe = self
            .recipe
            .with_line(RecipeLine::new(ingredient.clone(), amount).with_order(order));
        self
    }

    pub fn virgin_available(mut self) -> Self {
        self.recipe = self.recipe.with_virgin_available(true);
        self
    }

    pub fn build(self) -> Recipe {
        self.recipe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_builder() {
        let rum = IngredientBuilder::new(1, "Rum").alcohol(40.0).build();
        let cola = IngredientBuilder::new(2, "Cola").build();
        let recipe = RecipeBuilder::new(1, "Cuba Libre")
            .line(&rum, 80.0)
            .line_in(&cola, 210.0, 2)
            .build();

        assert_eq!(recipe.lines.len(), 2);
        assert_eq!(recipe.amount, 290.0);
        assert_eq!(recipe.lines[1].recipe_order, 2);
    }
}
