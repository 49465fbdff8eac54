//! Configuration module for CocktailBerry
//!
//! This module handles the machine configuration:
//! - Engine parameters read by the preparation engine ([`EngineConfig`])
//! - Pump wiring and calibration per bottle slot ([`PumpConfig`])
//! - Display and LED settings that the engine never reads ([`settings`])
//!
//! The engine only ever sees a snapshot of [`EngineConfig`] and the pump
//! table; UI-adjacent settings live in their own structs so the engine does
//! not depend on them.
//!
//! # Config Location
//!
//! The default config file is stored in the platform-appropriate location:
//! - **Linux**: `~/.config/dev.cocktailberry.engine/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.cocktailberry.engine/config.toml`
//! - **Windows**: `%APPDATA%\dev.cocktailberry.engine\config.toml`
//!
//! # Formats
//!
//! Files ending in `.json` are read as JSON, everything else as TOML.
//! [`AppConfig::save`] picks the format the same way.
//!
//! # Example
//!
//! ```ignore
//! use cocktailberry_rs::config::AppConfig;
//!
//! let config = AppConfig::load_or_default(AppConfig::default_path());
//! let tick = config.engine.tick_period();
//! ```

pub mod pumps;
pub mod settings;

pub use pumps::*;
pub use settings::*;

use crate::error::{BerryError, Result};
use crate::recipe::PlanPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config and data directories
pub const APP_ID: &str = "dev.cocktailberry.engine";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default tick period of the pump loop in seconds
pub const DEFAULT_TICK_PERIOD_S: f64 = 0.05;

/// Shortest allowed tick period in seconds
pub const MIN_TICK_PERIOD_S: f64 = 0.01;

/// Longest allowed tick period in seconds
pub const MAX_TICK_PERIOD_S: f64 = 0.2;

/// Default number of pumps allowed to run at once
pub const DEFAULT_MAX_SIMULTANEOUS_PUMPS: usize = 16;

/// Default number of hand-added ingredients per recipe
pub const DEFAULT_MAX_HAND_INGREDIENTS: usize = 3;

/// Default duration of a cleaning cycle in seconds
pub const DEFAULT_CLEANING_TIME_S: f64 = 20.0;

// ==================== Config Directories ====================

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the data directory path (store, logs)
pub fn data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the data directory exists
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = data_dir()
        .ok_or_else(|| BerryError::Config("Could not determine data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            BerryError::Config(format!("Failed to create data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== Engine Config ====================

/// Parameters read by the preparation engine
///
/// This is a read-only snapshot for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval of the pump loop in seconds
    pub tick_period_s: f64,

    /// Ceiling of pumps running at the same time (power supply limit)
    pub max_simultaneous_pumps: usize,

    /// Maximum number of ingredients the user adds by hand
    pub max_hand_ingredients: usize,

    /// Duration each pump runs during cleaning in seconds
    pub cleaning_time_s: f64,

    /// Refuse recipes when a bottle is too empty
    pub enforce_fill_level: bool,

    /// Relays are active-low (logical on = physical LOW)
    pub invert_logic: bool,

    /// GPIO driving the direction relay used during cleaning
    pub reversion_pin: Option<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_period_s: DEFAULT_TICK_PERIOD_S,
            max_simultaneous_pumps: DEFAULT_MAX_SIMULTANEOUS_PUMPS,
            max_hand_ingredients: DEFAULT_MAX_HAND_INGREDIENTS,
            cleaning_time_s: DEFAULT_CLEANING_TIME_S,
            enforce_fill_level: true,
            invert_logic: false,
            reversion_pin: None,
        }
    }
}

impl EngineConfig {
    /// Tick period clamped into the supported range
    ///
    /// A NaN period falls back to the default.
    pub fn tick_period(&self) -> Duration {
        let seconds = self.tick_period_s.clamp(MIN_TICK_PERIOD_S, MAX_TICK_PERIOD_S);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TICK_PERIOD_S))
    }

    /// Cleaning duration, at least one tick
    ///
    /// A value no `Duration` can hold falls back to the default.
    pub fn cleaning_time(&self) -> Duration {
        let seconds = self.cleaning_time_s.max(self.tick_period().as_secs_f64());
        Duration::try_from_secs_f64(seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_CLEANING_TIME_S))
    }

    /// Planning policy derived from these settings
    pub fn plan_policy(&self) -> PlanPolicy {
        PlanPolicy {
            max_hand_ingredients: self.max_hand_ingredients,
            enforce_fill_level: self.enforce_fill_level,
            max_simultaneous_pumps: self.max_simultaneous_pumps.max(1),
        }
    }
}

// ==================== App Config ====================

/// Complete machine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Engine parameters
    #[serde(default)]
    pub engine: EngineConfig,

    /// Pumps indexed by bottle slot (slot 1 is the first entry)
    #[serde(default)]
    pub pumps: Vec<PumpConfig>,

    /// LED settings
    #[serde(default)]
    pub leds: LedConfig,

    /// Display settings
    #[serde(default)]
    pub ui: UiConfig,
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        config_dir()
            .map(|d| d.join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Number of configured bottle slots
    pub fn bottle_count(&self) -> usize {
        self.pumps.len()
    }

    /// Pump behind a 1-based slot
    pub fn pump(&self, slot: usize) -> Option<&PumpConfig> {
        slot.checked_sub(1).and_then(|i| self.pumps.get(i))
    }

    /// Load a config file, picking the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BerryError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                BerryError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                BerryError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, picking the format by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BerryError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| BerryError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| BerryError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            BerryError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check value ranges and pin assignments
    ///
    /// An out-of-range tick period is not an error; it is clamped when read
    /// through [`EngineConfig::tick_period`] and only logged here.
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;

        if !engine.tick_period_s.is_finite() {
            return Err(BerryError::Config(format!(
                "tick_period_s must be a finite number, got {}",
                engine.tick_period_s
            )));
        }
        if !(MIN_TICK_PERIOD_S..=MAX_TICK_PERIOD_S).contains(&engine.tick_period_s) {
            tracing::warn!(
                "tick_period_s {} outside [{}, {}], clamping",
                engine.tick_period_s,
                MIN_TICK_PERIOD_S,
                MAX_TICK_PERIOD_S
            );
        }
        if engine.max_simultaneous_pumps == 0 {
            return Err(BerryError::Config(
                "max_simultaneous_pumps must be at least 1".to_string(),
            ));
        }
        if !(engine.cleaning_time_s > 0.0 && engine.cleaning_time_s.is_finite()) {
            return Err(BerryError::Config(format!(
                "cleaning_time_s must be positive and finite, got {}",
                engine.cleaning_time_s
            )));
        }

        let mut seen = HashSet::new();
        for (index, pump) in self.pumps.iter().enumerate() {
            let slot = index + 1;
            if pump.volume_flow <= 0.0 || !pump.volume_flow.is_finite() {
                return Err(BerryError::Config(format!(
                    "Pump {} has invalid flow {}",
                    slot, pump.volume_flow
                )));
            }
            if pump.tube_volume < 0.0 || !pump.tube_volume.is_finite() {
                return Err(BerryError::Config(format!(
                    "Pump {} has invalid tube volume {}",
                    slot, pump.tube_volume
                )));
            }
            let address = pump.address()?;
            if !seen.insert(address) {
                return Err(BerryError::Config(format!(
                    "Pin {} is used by more than one pump",
                    address
                )));
            }
        }

        if let Some(pin) = engine.reversion_pin {
            if seen.contains(&crate::hardware::PinAddress::Gpio(pin)) {
                return Err(BerryError::Config(format!(
                    "Reversion pin GPIO{} is also a pump pin",
                    pin
                )));
            }
        }

        if self.leds.kind == LedKind::Normal {
            if self.leds.pins.is_empty() {
                return Err(BerryError::Config(
                    "Normal LEDs need at least one pin".to_string(),
                ));
            }
            for &pin in &self.leds.pins {
                if seen.contains(&crate::hardware::PinAddress::Gpio(pin))
                    || engine.reversion_pin == Some(pin)
                {
                    return Err(BerryError::Config(format!(
                        "LED pin GPIO{} is already used by the engine",
                        pin
                    )));
                }
            }
        }

        Ok(())
    }

    /// Sample configuration with six GPIO pumps and an expander bank
    pub fn sample() -> Self {
        let mut config = Self::default();
        for pin in [14, 15, 18, 23, 24, 25] {
            config.pumps.push(PumpConfig::gpio(pin, 30.0).with_tube_volume(8.0));
        }
        for pin in 0..4 {
            config
                .pumps
                .push(PumpConfig::pcf8574(DEFAULT_I2C_ADDRESS, pin, 30.0).with_tube_volume(8.0));
        }
        config.engine.invert_logic = true;
        config
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

// ==================== Tests ====================
