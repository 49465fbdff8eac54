//! CocktailBerry - Main Entry Point
//!
//! Prepares one cocktail from the command line:
//!
//! ```text
//! cocktailberry [config.toml] [store.json] [recipe name or id] [volume ml] [alcohol factor]
//! ```
//!
//! Missing arguments fall back to the default config location, the default
//! store (seeded with a small sample inventory) and the first possible
//! recipe at the configured default volume.

use anyhow::{bail, Context};
use cocktailberry_rs::{
    config::{self, AppConfig},
    engine::{ChannelObserver, Engine, EngineContext, EngineEvent, PreparationRequest},
    hardware::{create_driver, create_gpio, LedController},
    store::{Inventory, JsonStore, Store, STORE_FILE},
    Recipe,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let data_dir = config::ensure_data_dir().unwrap_or_else(|_| PathBuf::from("."));

    // Initialize logging to stdout and a daily log file
    let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "cocktailberry.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cocktailberry_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    tracing::info!("Starting CocktailBerry");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let store_path = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(STORE_FILE));

    let mut config = AppConfig::load_or_default(&config_path);
    if config.pumps.is_empty() {
        tracing::warn!("No pumps configured in {:?}, using the sample machine", config_path);
        config = AppConfig::sample();
    }
    let volume = match args.get(3) {
        Some(v) => v.parse::<f64>().context("Volume must be a number")?,
        None => config.ui.default_volume,
    };
    let factor = match args.get(4) {
        Some(f) => f.parse::<f64>().context("Alcohol factor must be a number")?,
        None => 1.0,
    };

    let store = Arc::new(
        JsonStore::open_or_create(&store_path, Inventory::sample)
            .with_context(|| format!("Failed to open store {:?}", store_path))?,
    );
    let driver = create_driver(config.engine.invert_logic);
    let engine = Arc::new(Engine::new(EngineContext::new(config, driver, store.clone()))?);

    match LedController::from_config(&engine.config().leds, create_gpio()) {
        Ok(leds) if leds.is_enabled() => engine.add_observer(Box::new(leds)),
        Ok(_) => {}
        Err(e) => tracing::warn!("Status LEDs disabled: {}", e),
    }

    let recipe = pick_recipe(&engine, store.as_ref(), args.get(2).map(String::as_str))?;
    tracing::info!("Preparing {} ({} ml, factor {})", recipe.name, volume, factor);

    let request = PreparationRequest::new(recipe.id, volume).with_alcohol_factor(factor);
    let (observer, events) = ChannelObserver::bounded(256);
    let run = engine.start(&request, Box::new(observer))?;

    for event in events.iter() {
        match &event {
            EngineEvent::Started { name, planned_s } => {
                println!("{}: {:.1} s planned", name, planned_s)
            }
            EngineEvent::Phase(index) => println!("Phase {}", index + 1),
            EngineEvent::Progress(progress) => tracing::trace!("{}%", progress),
            _ => {}
        }
        if event.is_terminal() {
            break;
        }
    }

    let record = run.join()?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if !record.comment_text.is_empty() {
        println!("{}", record.comment_text);
    }
    Ok(())
}

/// Recipe by id or name, or the first one that can be made
fn pick_recipe(engine: &Engine, store: &dyn Store, wanted: Option<&str>) -> anyhow::Result<Recipe> {
    let Some(wanted) = wanted else {
        return match engine.possible_recipes()?.into_iter().next() {
            Some(recipe) => Ok(recipe),
            None => bail!("No recipe can be made with the mounted bottles"),
        };
    };

    let recipes = store.list_recipes()?;
    let found = match wanted.parse::<u32>() {
        Ok(id) => recipes.into_iter().find(|r| r.id == id),
        Err(_) => recipes
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(wanted)),
    };
    found.with_context(|| format!("Unknown recipe '{}'", wanted))
}
