//! # CocktailBerry-RS: Cocktail Preparation Engine
//!
//! Turns a recipe and a glass size into timed pump runs on a cocktail
//! machine. Recipes are scaled, validated against the mounted bottles and
//! planned into phases of simultaneous pumps; the engine then drives the
//! relay pins on a dedicated thread, streams progress and commits the
//! consumed volumes back to storage.
//!
//! ## Architecture
//!
//! - **Recipe**: Scaling and planning, pure and free of I/O
//! - **Engine**: Tick loop on a worker thread, cancellation, status, observers
//! - **Hardware**: Pin drivers for board GPIO and MCP23017/PCF8574 expanders
//! - **Store**: Recipes, bottles and consumption, committed once per run
//! - **Communication**: Crossbeam channels towards the UI
//!
//! ## Configuration
//!
//! The machine configuration and the JSON store live in the platform data
//! directory under `dev.cocktailberry.engine`:
//!
//! - **Linux**: `~/.local/share/dev.cocktailberry.engine/`
//! - **macOS**: `~/Library/Application Support/dev.cocktailberry.engine/`
//! - **Windows**: `%APPDATA%\dev.cocktailberry.engine\`
//!
//! ## Example
//!
//! ```ignore
//! use cocktailberry_rs::{
//!     config::AppConfig,
//!     engine::{ChannelObserver, Engine, EngineContext, PreparationRequest},
//!     hardware::create_driver,
//!     store::{Inventory, JsonStore},
//! };
//! use std::sync::Arc;
//!
//! let config = AppConfig::load_or_default(AppConfig::default_path());
//! let store = Arc::new(JsonStore::open_or_create("store.json", Inventory::sample)?);
//! let driver = create_driver(config.engine.invert_logic);
//! let engine = Arc::new(Engine::new(EngineContext::new(config, driver, store))?);
//!
//! let (observer, events) = ChannelObserver::bounded(64);
//! let run = engine.start(&PreparationRequest::new(1, 250.0), Box::new(observer))?;
//! for event in events.iter() {
//!     println!("{:?}", event);
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! let record = run.join()?;
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod recipe;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::AppConfig;
pub use engine::{
    CancelHandle, CocktailState, CompletionRecord, Engine, EngineContext, Observer,
    PreparationRequest, RunHandle, RunStatus,
};
pub use error::{BerryError, Result};
pub use hardware::{PinAddress, PinDriver, SimulatedPins};
pub use recipe::{PreparationPlan, Planner};
pub use store::{Inventory, JsonStore, MemoryStore, Store};
pub use types::{BottleState, Ingredient, Recipe, RecipeLine};
