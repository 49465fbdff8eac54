//! Pump wiring and calibration
//!
//! Each bottle slot is wired to exactly one pump. A [`PumpConfig`] says how
//! the pump's relay is reached (board GPIO or a pin on an I2C expander) and
//! how fast it pours.

use crate::error::{BerryError, Result};
use crate::hardware::PinAddress;
use serde::{Deserialize, Serialize};

/// Default I2C address of MCP23017 and PCF8574 boards with all address pins low
pub const DEFAULT_I2C_ADDRESS: u8 = 0x20;

/// Number of pins on an MCP23017 expander
pub const MCP23017_PIN_COUNT: u8 = 16;

/// Number of pins on a PCF8574 expander
pub const PCF8574_PIN_COUNT: u8 = 8;

/// How a pump relay is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PinType {
    /// Directly on a board GPIO
    #[default]
    Gpio,
    /// On a 16-bit MCP23017 I2C expander
    Mcp23017,
    /// On an 8-bit PCF8574 I2C expander
    Pcf8574,
}

impl std::fmt::Display for PinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinType::Gpio => write!(f, "GPIO"),
            PinType::Mcp23017 => write!(f, "MCP23017"),
            PinType::Pcf8574 => write!(f, "PCF8574"),
        }
    }
}

/// Configuration of the pump behind one bottle slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Pin number on the board or expander
    pub pin: u8,

    /// How the pin is reached
    #[serde(default)]
    pub pin_type: PinType,

    /// I2C address for expander pins
    #[serde(default)]
    pub i2c_address: Option<u8>,

    /// Calibrated nominal flow in ml/s
    pub volume_flow: f64,

    /// Volume of the tube between bottle and outlet in ml
    #[serde(default)]
    pub tube_volume: f64,

    /// Per-pump override of the global invert logic
    #[serde(default)]
    pub invert_logic: Option<bool>,
}

impl PumpConfig {
    /// Create a GPIO pump with the given nominal flow
    pub fn gpio(pin: u8, volume_flow: f64) -> Self {
        Self {
            pin,
            pin_type: PinType::Gpio,
            i2c_address: None,
            volume_flow,
            tube_volume: 0.0,
            invert_logic: None,
        }
    }

    /// Create a pump on an MCP23017 expander
    pub fn mcp23017(address: u8, pin: u8, volume_flow: f64) -> Self {
        Self {
            pin_type: PinType::Mcp23017,
            i2c_address: Some(address),
            ..Self::gpio(pin, volume_flow)
        }
    }

    /// Create a pump on a PCF8574 expander
    pub fn pcf8574(address: u8, pin: u8, volume_flow: f64) -> Self {
        Self {
            pin_type: PinType::Pcf8574,
            i2c_address: Some(address),
            ..Self::gpio(pin, volume_flow)
        }
    }

    /// Set the tube volume used for priming
    pub fn with_tube_volume(mut self, volume: f64) -> Self {
        self.tube_volume = volume;
        self
    }

    /// Override the global invert logic for this pump
    pub fn with_invert_logic(mut self, invert: bool) -> Self {
        self.invert_logic = Some(invert);
        self
    }

    /// Resolve the pin address, validating the pin range for expanders
    pub fn address(&self) -> Result<PinAddress> {
        let address = self.i2c_address.unwrap_or(DEFAULT_I2C_ADDRESS);
        match self.pin_type {
            PinType::Gpio => Ok(PinAddress::Gpio(self.pin)),
            PinType::Mcp23017 if self.pin < MCP23017_PIN_COUNT => Ok(PinAddress::Mcp23017 {
                address,
                pin: self.pin,
            }),
            PinType::Pcf8574 if self.pin < PCF8574_PIN_COUNT => Ok(PinAddress::Pcf8574 {
                address,
                pin: self.pin,
            }),
            other => Err(BerryError::Config(format!(
                "Pin {} is out of range for {} at 0x{:02X}",
                self.pin, other, address
            ))),
        }
    }

    /// Whether this pump's relay is active-low
    pub fn inverted(&self, global_invert: bool) -> bool {
        self.invert_logic.unwrap_or(global_invert)
    }
}
