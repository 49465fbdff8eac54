//! End-to-end preparation runs
//!
//! These tests drive the whole engine on simulated pins and a manual clock:
//! - Validation before any pin moves
//! - Phase and wave timing
//! - Cancellation and commit of partial consumption
//! - Boundary cases of the tick loop and the planner

mod common;

use cocktailberry_rs::engine::{
    CocktailState, NoopObserver, Observer, PreparationRequest, RunStatus,
};
use cocktailberry_rs::hardware::{PinAction, PinAddress};
use cocktailberry_rs::{BerryError, Engine, Ingredient, Recipe};
use common::builders::{IngredientBuilder, RecipeBuilder};
use common::mock_helpers::{inventory, manual_rig, test_config, TestRig};
use std::sync::Arc;
use std::time::Duration;

const RUM_PIN: PinAddress = PinAddress::Gpio(2);
const COLA_PIN: PinAddress = PinAddress::Gpio(3);

fn rum() -> Ingredient {
    IngredientBuilder::new(1, "White Rum").alcohol(40.0).build()
}

fn cola() -> Ingredient {
    IngredientBuilder::new(2, "Cola").build()
}

fn cuba_libre() -> Recipe {
    RecipeBuilder::new(1, "Cuba Libre")
        .line(&rum(), 80.0)
        .line_in(&cola(), 210.0, 2)
        .build()
}

fn cuba_libre_rig() -> TestRig {
    manual_rig(test_config(4), inventory(&[cuba_libre()], &[&rum(), &cola()]))
}

fn recipe_counter(rig: &TestRig, id: u32) -> u32 {
    rig.store
        .snapshot()
        .recipes
        .iter()
        .find(|r| r.id == id)
        .map(|r| r.counter)
        .unwrap()
}

#[test]
fn test_cuba_libre_runs_two_phases() {
    let rig = cuba_libre_rig();
    let request = PreparationRequest::new(1, 290.0);

    let plan = rig.engine.plan(&request).unwrap();
    assert_eq!(plan.phases.len(), 2);
    common::assert_float_eq(plan.total_duration(), 9.7, 1e-9);

    let record = rig.engine.prepare(&request, &mut NoopObserver).unwrap();

    assert_eq!(record.status, RunStatus::Finished);
    common::assert_float_eq(record.delivered(1), 80.0, 1e-9);
    common::assert_float_eq(record.delivered(2), 210.0, 1e-9);
    common::assert_float_eq(record.planned_s, 9.7, 1e-9);
    assert!(rig.pins.open_pins().is_empty());
    assert_eq!(recipe_counter(&rig, 1), 1);

    let inventory = rig.store.snapshot();
    assert_eq!(inventory.ingredient(1).unwrap().fill_level(), 620.0);
    assert_eq!(inventory.ingredient(2).unwrap().consumption, 210);
    assert_eq!(rig.engine.status().state(), CocktailState::Finished);
}

#[test]
fn test_virgin_request_without_virgin_version_is_refused() {
    let rig = cuba_libre_rig();
    let request = PreparationRequest::new(1, 290.0).with_alcohol_factor(0.0).virgin();

    let result = rig.engine.prepare(&request, &mut NoopObserver);

    assert!(matches!(result, Err(BerryError::RecipeNotPossible(_))));
    assert!(rig.pins.events().is_empty());
    assert_eq!(rig.engine.status().state(), CocktailState::Idle);
}

#[test]
fn test_slow_ingredient_stays_open_longer() {
    let a = IngredientBuilder::new(1, "A").build();
    let b = IngredientBuilder::new(2, "B").pump_speed(50).build();
    let recipe = RecipeBuilder::new(1, "Split").line(&a, 50.0).line(&b, 50.0).build();
    let rig = manual_rig(test_config(2), inventory(&[recipe], &[&a, &b]));

    let plan = rig.engine.plan(&PreparationRequest::new(1, 100.0)).unwrap();
    assert_eq!(plan.phases.len(), 1);
    assert_eq!(plan.wave_count(), 1);
    common::assert_float_eq(plan.total_duration(), 3.3, 1e-9);

    let record = rig
        .engine
        .prepare(&PreparationRequest::new(1, 100.0), &mut NoopObserver)
        .unwrap();

    assert_eq!(rig.pins.open_time(PinAddress::Gpio(2)), Duration::from_millis(1700));
    assert_eq!(rig.pins.open_time(PinAddress::Gpio(3)), Duration::from_millis(3300));
    common::assert_float_eq(record.delivered(1), 50.0, 1e-9);
    common::assert_float_eq(record.delivered(2), 50.0, 1.0);
}

/// Cancels through the engine once the clock reaches `at`
struct CancelAt {
    engine: Arc<Engine>,
    clock: Arc<dyn cocktailberry_rs::Clock>,
    at: Duration,
}

impl Observer for CancelAt {
    fn on_progress(&mut self, _progress: u8) {
        if self.clock.now() >= self.at {
            self.engine.cancel();
        }
    }
}

#[test]
fn test_cancel_commits_partial_consumption() {
    let rig = cuba_libre_rig();
    let mut observer = CancelAt {
        engine: Arc::clone(&rig.engine),
        clock: rig.clock.clone(),
        at: Duration::from_secs(1),
    };

    let record = rig
        .engine
        .prepare(&PreparationRequest::new(1, 290.0), &mut observer)
        .unwrap();

    assert_eq!(record.status, RunStatus::Canceled);
    common::assert_float_eq(record.delivered(1), 30.0, 1e-9);
    assert_eq!(record.delivered(2), 0.0);
    assert!(rig.pins.events_for(COLA_PIN).is_empty());
    assert!(rig.pins.open_time(RUM_PIN) <= Duration::from_millis(1000));
    assert!(rig.pins.open_pins().is_empty());

    assert_eq!(recipe_counter(&rig, 1), 0);
    let rum = rig.store.snapshot().ingredient(1).cloned().unwrap();
    assert_eq!(rum.fill_level(), 670.0);
    assert_eq!(rum.consumption, 30);
    assert_eq!(rig.engine.status().state(), CocktailState::Canceled);
}

#[test]
fn test_third_pump_waits_for_the_first_wave() {
    let ingredients: Vec<Ingredient> = (1..=3)
        .map(|id| IngredientBuilder::new(id, &format!("I{id}")).build())
        .collect();
    let recipe = RecipeBuilder::new(1, "Triple")
        .line(&ingredients[0], 30.0)
        .line(&ingredients[1], 60.0)
        .line(&ingredients[2], 30.0)
        .build();
    let mut config = test_config(3);
    config.engine.max_simultaneous_pumps = 2;
    let mounted: Vec<&Ingredient> = ingredients.iter().collect();
    let rig = manual_rig(config, inventory(&[recipe], &mounted));

    let plan = rig.engine.plan(&PreparationRequest::new(1, 120.0)).unwrap();
    assert_eq!(plan.wave_count(), 2);

    rig.engine
        .prepare(&PreparationRequest::new(1, 120.0), &mut NoopObserver)
        .unwrap();

    let third = rig.pins.events_for(PinAddress::Gpio(4));
    assert_eq!(third[0].action, PinAction::Open);
    assert_eq!(third[0].at, Duration::from_secs(2));
    assert_eq!(rig.pins.peak_open(), 2);
}

#[test]
fn test_low_bottle_is_refused_before_pumping() {
    let low_rum = IngredientBuilder::new(1, "White Rum")
        .alcohol(40.0)
        .fill_level(60.0)
        .build();
    let rig = manual_rig(test_config(2), inventory(&[cuba_libre()], &[&low_rum, &cola()]));

    let result = rig
        .engine
        .prepare(&PreparationRequest::new(1, 290.0), &mut NoopObserver);

    match result {
        Err(BerryError::InsufficientLevel {
            ingredient_id,
            have,
            need,
            ..
        }) => {
            assert_eq!(ingredient_id, 1);
            assert_eq!(have, 60.0);
            assert_eq!(need, 80.0);
        }
        other => panic!("expected INSUFFICIENT_LEVEL, got {:?}", other),
    }
    assert!(rig.pins.events().is_empty());
    assert_eq!(rig.engine.status().state(), CocktailState::Idle);
}

#[test]
fn test_bottle_with_exactly_the_need_passes() {
    let rum = IngredientBuilder::new(1, "White Rum")
        .alcohol(40.0)
        .fill_level(80.0)
        .build();
    let rig = manual_rig(test_config(2), inventory(&[cuba_libre()], &[&rum, &cola()]));

    assert!(rig.engine.plan(&PreparationRequest::new(1, 290.0)).is_ok());
}

#[test]
fn test_phases_never_overlap() {
    let rig = cuba_libre_rig();
    rig.engine
        .prepare(&PreparationRequest::new(1, 290.0), &mut NoopObserver)
        .unwrap();

    let rum_close = rig
        .pins
        .events_for(RUM_PIN)
        .iter()
        .filter(|e| e.action == PinAction::Close)
        .map(|e| (e.at, e.seq))
        .max()
        .unwrap();
    let cola_open = rig
        .pins
        .events_for(COLA_PIN)
        .iter()
        .filter(|e| e.action == PinAction::Open)
        .map(|e| (e.at, e.seq))
        .min()
        .unwrap();
    assert!(cola_open > rum_close);
}

#[test]
fn test_slowest_tick_closes_within_one_tick() {
    let mut config = test_config(2);
    config.engine.tick_period_s = 0.2;
    let rig = manual_rig(config, inventory(&[cuba_libre()], &[&rum(), &cola()]));

    let record = rig
        .engine
        .prepare(&PreparationRequest::new(1, 290.0), &mut NoopObserver)
        .unwrap();

    let open = rig.pins.open_time(RUM_PIN);
    assert!(open >= Duration::from_millis(2700));
    assert!(open <= Duration::from_millis(2900));
    assert!(record.delivered(1) <= 80.0);
}

#[test]
fn test_all_zero_recipe_finishes_immediately() {
    let recipe = RecipeBuilder::new(7, "Nothing")
        .line(&rum(), 0.0)
        .line(&cola(), 0.0)
        .build();
    let rig = manual_rig(test_config(2), inventory(&[recipe], &[&rum(), &cola()]));

    let record = rig
        .engine
        .prepare(&PreparationRequest::new(7, 250.0), &mut NoopObserver)
        .unwrap();

    assert_eq!(record.status, RunStatus::Finished);
    assert_eq!(record.total_delivered(), 0.0);
    assert!(rig.pins.events().is_empty());
    assert_eq!(recipe_counter(&rig, 7), 1);
    assert_eq!(rig.store.snapshot().ingredient(1).unwrap().consumption, 0);
}

#[test]
fn test_pump_ceiling_splits_waves() {
    let ingredients: Vec<Ingredient> = (1..=5)
        .map(|id| IngredientBuilder::new(id, &format!("I{id}")).build())
        .collect();
    let build = |count: usize| {
        let mut builder = RecipeBuilder::new(1, "Wide");
        for (i, ingredient) in ingredients.iter().take(count).enumerate() {
            builder = builder.line(ingredient, 30.0 * (i + 1) as f64);
        }
        builder.build()
    };
    let mounted: Vec<&Ingredient> = ingredients.iter().collect();
    let mut config = test_config(5);
    config.engine.max_simultaneous_pumps = 4;

    let rig = manual_rig(config.clone(), inventory(&[build(4)], &mounted));
    let request = PreparationRequest::new(1, 300.0);
    let plan = rig.engine.plan(&request).unwrap();
    assert_eq!(plan.wave_count(), 1);

    let rig = manual_rig(config, inventory(&[build(5)], &mounted));
    let request = PreparationRequest::new(1, 450.0);
    let plan = rig.engine.plan(&request).unwrap();
    assert_eq!(plan.wave_count(), 2);
    let waves: f64 = plan.phases[0].waves.iter().map(|w| w.duration()).sum();
    common::assert_float_eq(waves, plan.total_duration(), 1e-9);
}

#[test]
fn test_hand_ingredients_end_up_in_the_comment() {
    let lime = IngredientBuilder::new(5, "Lime Juice").hand().build();
    let recipe = RecipeBuilder::new(2, "Daiquiri-ish")
        .line(&rum(), 60.0)
        .line(&lime, 20.0)
        .line_in(&cola(), 120.0, 2)
        .build();
    let rig = manual_rig(test_config(2), inventory(&[recipe], &[&rum(), &cola()]));

    let record = rig
        .engine
        .prepare(&PreparationRequest::new(2, 200.0), &mut NoopObserver)
        .unwrap();

    assert_eq!(record.hand_adds.len(), 1);
    assert_eq!(record.comment_text, "Please add:\n- 20 ml Lime Juice");
    assert_eq!(rig.engine.status().message(), record.comment_text);
    assert_eq!(record.delivered(5), 0.0);
}

#[test]
fn test_virgin_run_counts_separately() {
    let recipe = RecipeBuilder::new(2, "Mojito")
        .line(&rum(), 50.0)
        .line_in(&cola(), 150.0, 2)
        .virgin_available()
        .build();
    let rig = manual_rig(test_config(2), inventory(&[recipe], &[&rum(), &cola()]));

    let record = rig
        .engine
        .prepare(&PreparationRequest::new(2, 200.0).virgin(), &mut NoopObserver)
        .unwrap();

    assert_eq!(record.status, RunStatus::Finished);
    assert!(record.virgin);
    assert_eq!(record.delivered(1), 0.0);
    common::assert_float_eq(record.delivered(2), 200.0, 1e-9);
    let row = rig.store.snapshot().recipes[0].clone();
    assert_eq!((row.counter, row.counter_virgin), (0, 1));
}
