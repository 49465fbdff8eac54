//! In-process store
//!
//! Keeps the [`Inventory`] behind an `RwLock`. A commit clones the
//! inventory, applies the run to the clone and swaps it in, so readers see
//! either the old or the new state.

use super::{ConsumptionMap, Inventory, Store};
use crate::error::Result;
use crate::types::{BottleState, Ingredient, Recipe, RecipeId, Slot};
use std::sync::{PoisonError, RwLock};

/// Store holding everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inventory: RwLock<Inventory>,
}

impl MemoryStore {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: RwLock::new(inventory),
        }
    }

    /// Copy of the current inventory
    pub fn snapshot(&self) -> Inventory {
        self.inventory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the inventory outside a run (mounting, editing recipes)
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Inventory),
    {
        let mut inventory = self.inventory.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *inventory);
    }

    fn read<T>(&self, f: impl FnOnce(&Inventory) -> T) -> T {
        let inventory = self.inventory.read().unwrap_or_else(PoisonError::into_inner);
        f(&*inventory)
    }

    fn transact<T>(&self, f: impl FnOnce(&mut Inventory) -> Result<T>) -> Result<T> {
        let mut inventory = self.inventory.write().unwrap_or_else(PoisonError::into_inner);
        let mut draft = inventory.clone();
        let value = f(&mut draft)?;
        *inventory = draft;
        Ok(value)
    }
}

impl Store for MemoryStore {
    fn get_recipe(&self, id: RecipeId) -> Result<Option<Recipe>> {
        self.read(|inv| inv.recipe(id))
    }

    fn list_recipes(&self) -> Result<Vec<Recipe>> {
        self.read(Inventory::recipes)
    }

    fn get_bottle_state(&self) -> Result<BottleState> {
        Ok(self.read(Inventory::bottle_state))
    }

    fn commit_run(
        &self,
        consumption: &ConsumptionMap,
        recipe_id: RecipeId,
        was_virgin: bool,
        finished: bool,
    ) -> Result<()> {
        self.transact(|inv| inv.apply_run(consumption, recipe_id, was_virgin, finished))
    }

    fn refill_bottle(&self, slot: Slot) -> Result<Ingredient> {
        self.transact(|inv| inv.refill(slot))
    }

    fn reset_consumption(&self) -> Result<()> {
        self.transact(|inv| {
            inv.reset_consumption();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_commit_changes_nothing() {
        let store = MemoryStore::new(Inventory::sample());
        let before = store.snapshot();

        let consumption: ConsumptionMap = [(1, 40.0), (77, 10.0)].into_iter().collect();
        assert!(store.commit_run(&consumption, 1, false, true).is_err());

        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_commit_is_visible_to_readers() {
        let store = MemoryStore::new(Inventory::sample());
        let consumption: ConsumptionMap = [(1, 40.2)].into_iter().collect();
        store.commit_run(&consumption, 1, false, true).unwrap();

        let recipe = store.get_recipe(1).unwrap().unwrap();
        assert_eq!(recipe.counter, 1);
        let bottles = store.get_bottle_state().unwrap();
        assert_eq!(bottles.slot_of(1).unwrap().fill_level, 660.0);
    }

    #[test]
    fn test_update_mounts_bottle() {
        let store = MemoryStore::new(Inventory::sample());
        store.update(|inv| inv.mount(1, None));
        assert!(!store.get_bottle_state().unwrap().is_mounted(1));
        assert_eq!(store.list_recipes().unwrap().len(), 2);
    }
}
