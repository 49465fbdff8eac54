//! Status LEDs
//!
//! The LED controller is just another [`Observer`]: it lights up when a run
//! starts and goes dark when the run ends, however it ends. LED failures are
//! logged and never reach the engine.

use super::gpio::GpioLines;
use crate::config::{LedConfig, LedKind};
use crate::engine::{CompletionRecord, Observer};
use crate::error::{BerryError, Result};
use crate::recipe::PreparationPlan;

/// What the LEDs show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Idle,
    Preparing,
    Done,
}

/// Where the LED state goes
pub enum LedBackend {
    Disabled,
    /// Plain LEDs, one GPIO each
    Normal {
        gpio: Box<dyn GpioLines>,
        pins: Vec<u8>,
        invert: bool,
    },
}

/// Drives the status LEDs from run events
pub struct LedController {
    backend: LedBackend,
    mode: LedMode,
}

impl LedController {
    /// Build the backend selected in the config, with every LED off
    pub fn from_config(config: &LedConfig, gpio: Box<dyn GpioLines>) -> Result<Self> {
        let backend = match config.kind {
            LedKind::Disabled => LedBackend::Disabled,
            LedKind::Normal => {
                if config.pins.is_empty() {
                    return Err(BerryError::Config(
                        "Normal LEDs need at least one pin".to_string(),
                    ));
                }
                let mut gpio = gpio;
                for &pin in &config.pins {
                    gpio.configure_output(pin, config.invert)?;
                }
                tracing::info!("Status LEDs on GPIO{:?}", config.pins);
                LedBackend::Normal {
                    gpio,
                    pins: config.pins.clone(),
                    invert: config.invert,
                }
            }
        };
        Ok(Self {
            backend,
            mode: LedMode::Idle,
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: LedBackend::Disabled,
            mode: LedMode::Idle,
        }
    }

    pub fn mode(&self) -> LedMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, LedBackend::Disabled)
    }

    /// Logical state of every LED
    pub fn lit(&mut self) -> Result<Vec<bool>> {
        match &mut self.backend {
            LedBackend::Normal { gpio, pins, invert } => pins
                .iter()
                .map(|&pin| gpio.read(pin).map(|level| level != *invert))
                .collect(),
            LedBackend::Disabled => Ok(Vec::new()),
        }
    }

    pub fn set_mode(&mut self, mode: LedMode) {
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        if let Err(e) = self.apply() {
            tracing::warn!("Failed to switch LEDs to {:?}: {}", mode, e);
        }
    }

    fn apply(&mut self) -> Result<()> {
        let on = self.mode == LedMode::Preparing;
        match &mut self.backend {
            LedBackend::Disabled => Ok(()),
            LedBackend::Normal { gpio, pins, invert } => {
                for &pin in pins.iter() {
                    gpio.write(pin, on != *invert)?;
                }
                Ok(())
            }
        }
    }
}

impl Drop for LedController {
    fn drop(&mut self) {
        if let LedBackend::Normal { gpio, pins, .. } = &mut self.backend {
            for &pin in pins.iter() {
                gpio.release(pin);
            }
        }
    }
}

impl Observer for LedController {
    fn on_start(&mut self, _plan: &PreparationPlan) {
        self.set_mode(LedMode::Preparing);
    }

    fn on_finish(&mut self, _record: &CompletionRecord) {
        self.set_mode(LedMode::Done);
    }

    fn on_cancel(&mut self, _record: &CompletionRecord) {
        self.set_mode(LedMode::Idle);
    }

    fn on_error(&mut self, _record: &CompletionRecord) {
        self.set_mode(LedMode::Idle);
    }
}
