//! Settings the engine never reads
//!
//! Display preferences and LED wiring live here, separate from
//! [`EngineConfig`](super::EngineConfig), so UI-adjacent code can depend on
//! them without the preparation engine depending on the UI.
//!
//! # Main Types
//!
//! - [`UiConfig`] - Volume and strength presets offered to the user
//! - [`LedConfig`] - Which LED backend to drive and on which pins

use serde::{Deserialize, Serialize};

/// Display settings for the surrounding UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Volume presets offered to the user in ml
    pub volume_presets: Vec<f64>,

    /// Default volume in ml
    pub default_volume: f64,

    /// Alcohol factor presets (1.0 = recipe strength)
    pub alcohol_presets: Vec<f64>,

    /// Show recipes that need ingredients which are not mounted
    pub show_unavailable: bool,

    /// Language code of the UI
    pub language: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            volume_presets: vec![200.0, 250.0, 300.0],
            default_volume: 250.0,
            alcohol_presets: vec![0.75, 1.0, 1.25],
            show_unavailable: false,
            language: "en".to_string(),
        }
    }
}

impl UiConfig {
    /// Nearest volume preset to a requested volume
    pub fn nearest_volume(&self, requested: f64) -> f64 {
        self.volume_presets
            .iter()
            .copied()
            .min_by(|a, b| (a - requested).abs().total_cmp(&(b - requested).abs()))
            .unwrap_or(self.default_volume)
    }
}

/// LED backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedKind {
    /// No LEDs attached
    #[default]
    Disabled,
    /// Plain LEDs switched by a GPIO each
    Normal,
}

/// LED wiring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    /// Backend to drive
    pub kind: LedKind,

    /// GPIO pin of each LED
    pub pins: Vec<u8>,

    /// LEDs are active-low
    pub invert: bool,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            kind: LedKind::Disabled,
            pins: Vec::new(),
            invert: false,
        }
    }
}
