//! Pin driver abstraction for pump relays
//!
//! The engine only speaks "logical on/off" for a set of [`PinAddress`]es.
//! Everything below that (active-low relay boards, I2C expanders sharing one
//! output register, missing hardware libraries) is handled here.
//!
//! # Architecture
//!
//! - [`PinDriver`] - Capability set the engine drives (open, close, read, ...)
//! - [`PinBank`] - The production driver; routes board pins to [`GpioLines`]
//!   and expander pins to [`Mcp23017`]/[`Pcf8574`] devices on an [`I2cBus`]
//! - [`SimulatedPins`] - In-memory driver that records timestamped events
//! - [`LedController`] - LED backends, attached to the engine as an observer
//!
//! # Dev fallback
//!
//! Without the `rpi` feature (or when the Raspberry Pi peripherals cannot be
//! opened) [`create_driver`] returns a [`PinBank`] over [`DevGpio`] and
//! [`DevBus`]: every call is logged and otherwise a no-op, which keeps the
//! engine runnable for tests and UI development.
//!
//! # Example
//!
//! ```ignore
//! use cocktailberry_rs::hardware::{create_driver, PinAddress};
//!
//! let mut driver = create_driver(false);
//! let pins = [PinAddress::Gpio(14), PinAddress::Pcf8574 { address: 0x20, pin: 2 }];
//! driver.initialise(&pins, true)?;
//! driver.open(&pins)?;   // both relays on, one I2C write for the expander
//! driver.close(&pins)?;
//! ```

pub mod bank;
pub mod expander;
pub mod gpio;
pub mod led;
pub mod sim;

pub use bank::PinBank;
pub use expander::{DevBus, I2cBus, Mcp23017, Pcf8574};
pub use gpio::{DevGpio, GpioLines};
pub use led::{LedBackend, LedController, LedMode};
pub use sim::{MemoryBus, PinAction, PinEvent, SimulatedPins};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Address of one relay pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PinAddress {
    /// Board GPIO (BCM numbering)
    Gpio(u8),
    /// Pin 0..=15 of an MCP23017 at an I2C address
    Mcp23017 { address: u8, pin: u8 },
    /// Pin 0..=7 of a PCF8574 at an I2C address
    Pcf8574 { address: u8, pin: u8 },
}

impl std::fmt::Display for PinAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinAddress::Gpio(pin) => write!(f, "GPIO{}", pin),
            PinAddress::Mcp23017 { address, pin } => {
                write!(f, "MCP23017@0x{:02X}:{}", address, pin)
            }
            PinAddress::Pcf8574 { address, pin } => {
                write!(f, "PCF8574@0x{:02X}:{}", address, pin)
            }
        }
    }
}

/// Counters for driver operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Pins switched on
    pub opens: u64,
    /// Pins switched off
    pub closes: u64,
    /// Physical writes issued (one per GPIO pin, one per expander device)
    pub writes: u64,
    /// Failed pin operations
    pub failures: u64,
}

impl DriverStats {
    /// Writes saved by merging expander pins into one transfer
    pub fn merged_writes(&self) -> u64 {
        (self.opens + self.closes).saturating_sub(self.writes)
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Uniform interface over every relay backend
///
/// Implementations must be `Send` so the engine can drive them from its
/// worker thread. Batch calls should issue as few physical writes as the
/// transport permits.
pub trait PinDriver: Send {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Configure pins as outputs in the logical off state
    ///
    /// Calling this again for the same pins is harmless.
    fn initialise(&mut self, pins: &[PinAddress], invert_logic: bool) -> Result<()>;

    /// Switch pins logically on
    ///
    /// Fails with `OpenFailed` naming the first pin that could not be set.
    fn open(&mut self, pins: &[PinAddress]) -> Result<()>;

    /// Switch pins logically off
    ///
    /// Every pin is attempted; fails with `CloseFailed` listing the pins that
    /// could not be closed.
    fn close(&mut self, pins: &[PinAddress]) -> Result<()>;

    /// Read the logical state of a pin
    fn read(&mut self, pin: PinAddress) -> Result<bool>;

    /// Close and release pins (all initialised pins for `None`)
    fn cleanup(&mut self, pins: Option<&[PinAddress]>) -> Result<()>;

    /// Emergency stop: close every initialised pin
    fn close_all(&mut self) -> Result<()>;

    /// Operation counters
    fn stats(&self) -> DriverStats;
}

/// Driver shared between the engine and emergency-stop handles
pub type SharedDriver = Arc<Mutex<Box<dyn PinDriver>>>;

/// Wrap a driver for sharing
pub fn share(driver: Box<dyn PinDriver>) -> SharedDriver {
    Arc::new(Mutex::new(driver))
}

/// Lock a shared driver, recovering from a poisoned lock
///
/// A panic while holding the lock must never prevent closing the pumps.
pub fn lock_driver(driver: &SharedDriver) -> MutexGuard<'_, Box<dyn PinDriver>> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the best available driver for this machine
///
/// With the `rpi` feature the Raspberry Pi GPIO and I2C peripherals are
/// used when they can be opened; anything missing falls back to the logging
/// dev backend.
pub fn create_driver(invert_logic: bool) -> Box<dyn PinDriver> {
    #[cfg(feature = "rpi")]
    {
        let gpio = create_gpio();
        let bus: Box<dyn I2cBus> = match expander::RppalBus::new() {
            Ok(bus) => Box::new(bus),
            Err(e) => {
                tracing::warn!("I2C unavailable, using dev fallback: {}", e);
                Box::new(DevBus::new())
            }
        };
        return Box::new(PinBank::new("rpi", gpio, bus, invert_logic));
    }

    #[cfg(not(feature = "rpi"))]
    {
        tracing::warn!("Built without hardware support, pump pins are simulated by the dev fallback");
        Box::new(PinBank::dev(invert_logic))
    }
}

/// Board GPIO lines for peripherals outside the pin bank, such as LEDs
pub fn create_gpio() -> Box<dyn GpioLines> {
    #[cfg(feature = "rpi")]
    {
        match gpio::RppalGpio::new() {
            Ok(gpio) => return Box::new(gpio),
            Err(e) => tracing::warn!("GPIO unavailable, using dev fallback: {}", e),
        }
    }
    Box::new(DevGpio::new())
}
