//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{IngredientBuilder, RecipeBuilder};
use common::mock_helpers::{inventory, manual_rig, test_config};

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let rum = IngredientBuilder::new(1, "Rum").alcohol(40.0).fill_level(300.0).build();
    let recipe = RecipeBuilder::new(1, "Neat").line(&rum, 40.0).build();

    assert_eq!(rum.fill_level(), 300.0);
    assert!(rum.is_alcoholic());
    assert_eq!(recipe.amount, 40.0);

    // Test that a rig builds and sees the mounted bottle
    let rig = manual_rig(test_config(1), inventory(&[recipe], &[&rum]));
    assert_eq!(rig.engine.possible_recipes().unwrap().len(), 1);
    assert!(rig.pins.events().is_empty());
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
