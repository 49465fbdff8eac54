//! Engine construction helpers
//!
//! Every rig runs on [`SimulatedPins`] and a [`MemoryStore`]. Rigs built
//! with [`manual_rig`] use a [`ManualClock`] that advances on every sleep,
//! so runs finish instantly and timings are exact.

use cocktailberry_rs::clock::{Clock, ManualClock, MonotonicClock};
use cocktailberry_rs::config::{AppConfig, PumpConfig};
use cocktailberry_rs::store::{Inventory, MemoryStore};
use cocktailberry_rs::{Engine, EngineContext, Ingredient, Recipe, SimulatedPins};
use std::sync::Arc;

pub struct TestRig {
    pub engine: Arc<Engine>,
    pub pins: SimulatedPins,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<dyn Clock>,
}

/// `count` GPIO pumps on pins 2.. with the same flow
pub fn gpio_pumps(count: u8, flow: f64) -> Vec<PumpConfig> {
    (0..count).map(|i| PumpConfig::gpio(i + 2, flow)).collect()
}

/// Config with `count` pumps of 30 ml/s
pub fn test_config(count: u8) -> AppConfig {
    let mut config = AppConfig::default();
    config.pumps = gpio_pumps(count, 30.0);
    config
}

/// Inventory holding `recipes`, with `mounted` on slots 1, 2, ...
pub fn inventory(recipes: &[Recipe], mounted: &[&Ingredient]) -> Inventory {
    let mut inventory = Inventory::new();
    for ingredient in mounted {
        inventory.upsert_ingredient((*ingredient).clone());
    }
    for recipe in recipes {
        inventory.upsert_recipe(recipe);
    }
    for (index, ingredient) in mounted.iter().enumerate() {
        inventory.mount(index + 1, Some(ingredient.id));
    }
    inventory
}

fn rig_with(config: AppConfig, inventory: Inventory, clock: Arc<dyn Clock>) -> TestRig {
    let pins = SimulatedPins::new(clock.clone());
    let store = Arc::new(MemoryStore::new(inventory));
    let context = EngineContext::new(config, Box::new(pins.clone()), store.clone())
        .with_clock(clock.clone());
    TestRig {
        engine: Arc::new(Engine::new(context).expect("engine should build")),
        pins,
        store,
        clock,
    }
}

/// Rig on a manual clock
pub fn manual_rig(config: AppConfig, inventory: Inventory) -> TestRig {
    rig_with(config, inventory, Arc::new(ManualClock::new()))
}

/// Rig on the wall clock, for tests racing real threads
pub fn wall_clock_rig(config: AppConfig, inventory: Inventory) -> TestRig {
    rig_with(config, inventory, Arc::new(MonotonicClock::new()))
}
