//! File-backed store
//!
//! The inventory is kept in memory and written to a JSON file on every
//! change. Writes go to a sibling temp file which is then renamed over the
//! target, so a crash leaves either the old or the new file.

use super::{ConsumptionMap, Inventory, Store};
use crate::error::{BerryError, Result};
use crate::types::{BottleState, Ingredient, Recipe, RecipeId, Slot};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default store filename in the data directory
pub const STORE_FILE: &str = "store.json";

/// Store persisted as a JSON file
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    inventory: Mutex<Inventory>,
}

impl JsonStore {
    /// Open an existing store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            BerryError::Store(format!("Failed to read store {:?}: {}", path, e))
        })?;
        let mut inventory: Inventory = serde_json::from_str(&content).map_err(|e| {
            BerryError::Serialization(format!("Failed to parse store {:?}: {}", path, e))
        })?;
        inventory.normalise();

        tracing::info!(
            "Opened store {:?}: {} ingredients, {} recipes",
            path,
            inventory.ingredients.len(),
            inventory.recipes.len()
        );
        Ok(Self {
            path,
            inventory: Mutex::new(inventory),
        })
    }

    /// Create a store file with the given contents, replacing any existing file
    pub fn create(path: impl AsRef<Path>, inventory: Inventory) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        write_atomically(&path, &inventory)?;
        Ok(Self {
            path,
            inventory: Mutex::new(inventory),
        })
    }

    /// Open the file if it exists, otherwise create it from `seed`
    pub fn open_or_create(path: impl AsRef<Path>, seed: impl FnOnce() -> Inventory) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            tracing::info!("Creating store {:?}", path.as_ref());
            Self::create(path, seed())
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current inventory
    pub fn snapshot(&self) -> Inventory {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transact<T>(&self, f: impl FnOnce(&mut Inventory) -> Result<T>) -> Result<T> {
        let mut inventory = self.lock();
        let mut draft = inventory.clone();
        let value = f(&mut draft)?;
        write_atomically(&self.path, &draft)?;
        *inventory = draft;
        Ok(value)
    }
}

fn write_atomically(path: &Path, inventory: &Inventory) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(inventory)
        .map_err(|e| BerryError::Serialization(e.to_string()))?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, content).map_err(|e| {
        BerryError::Store(format!("Failed to write {:?}: {}", temp, e))
    })?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        BerryError::Store(format!("Failed to replace {:?}: {}", path, e))
    })
}

impl Store for JsonStore {
    fn get_recipe(&self, id: RecipeId) -> Result<Option<Recipe>> {
        self.lock().recipe(id)
    }

    fn list_recipes(&self) -> Result<Vec<Recipe>> {
        self.lock().recipes()
    }

    fn get_bottle_state(&self) -> Result<BottleState> {
        Ok(self.lock().bottle_state())
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
    use tempfile::tempdir;

    #[test]
    fn test_commit_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonStore::create(&path, Inventory::sample()).unwrap();

        let consumption: ConsumptionMap = [(2, 210.4)].into_iter().collect();
        store.commit_run(&consumption, 1, false, true).unwrap();

        let reopened = JsonStore::open(&path).unwrap();
        let cola = reopened.snapshot().ingredient(2).cloned().unwrap();
        assert_eq!(cola.fill_level(), 790.0);
        assert_eq!(cola.consumption_lifetime, 210);
        assert_eq!(reopened.get_recipe(1).unwrap().unwrap().counter, 1);
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[test]
    fn test_failed_commit_leaves_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonStore::create(&path, Inventory::sample()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let consumption: ConsumptionMap = [(1, 20.0)].into_iter().collect();
        assert!(store.commit_run(&consumption, 404, false, true).is_err());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert_eq!(store.snapshot(), Inventory::sample());
    }

    #[test]
    fn test_open_or_create_seeds_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonStore::open_or_create(&path, Inventory::sample).unwrap();
        store.reset_consumption().unwrap();
        store.refill_bottle(1).unwrap();

        let again = JsonStore::open_or_create(&path, Inventory::new).unwrap();
        assert_eq!(again.list_recipes().unwrap().len(), 2);
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonStore::open(&path).unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION");
    }
}
