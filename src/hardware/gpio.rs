//! Board GPIO lines
//!
//! [`GpioLines`] works on physical levels. Inversion for active-low relay
//! boards happens one layer up in [`PinBank`](super::PinBank).

use crate::error::Result;
use std::collections::HashMap;

/// Physical access to board GPIO pins
pub trait GpioLines: Send {
    /// Configure a pin as output and drive it to `level`
    fn configure_output(&mut self, pin: u8, level: bool) -> Result<()>;

    /// Drive an output pin
    fn write(&mut self, pin: u8, level: bool) -> Result<()>;

    /// Read back the level of an output pin
    fn read(&mut self, pin: u8) -> Result<bool>;

    /// Give the pin back to the system
    fn release(&mut self, pin: u8);
}

/// Logging stand-in used when no GPIO library is available
#[derive(Debug, Default)]
pub struct DevGpio {
    levels: HashMap<u8, bool>,
}

impl DevGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current physical level of a pin, if configured
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.levels.get(&pin).copied()
    }
}

impl GpioLines for DevGpio {
    fn configure_output(&mut self, pin: u8, level: bool) -> Result<()> {
        tracing::debug!("[dev] GPIO{} configured as output, level {}", pin, level);
        self.levels.insert(pin, level);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: bool) -> Result<()> {
        tracing::trace!("[dev] GPIO{} <- {}", pin, level);
        self.levels.insert(pin, level);
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<bool> {
        Ok(self.levels.get(&pin).copied().unwrap_or(false))
    }

    fn release(&mut self, pin: u8) {
        tracing::debug!("[dev] GPIO{} released", pin);
        self.levels.remove(&pin);
    }
}

#[cfg(feature = "rpi")]
pub use rpi::RppalGpio;

#[cfg(feature = "rpi")]
mod rpi {
    use super::GpioLines;
    use crate::error::{BerryError, Result};
    use rppal::gpio::{Gpio, OutputPin};
    use std::collections::HashMap;

    /// Raspberry Pi GPIO through rppal
    pub struct RppalGpio {
        gpio: Gpio,
        outputs: HashMap<u8, OutputPin>,
    }

    impl RppalGpio {
        pub fn new() -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| BerryError::Hardware(e.to_string()))?;
            Ok(Self {
                gpio,
                outputs: HashMap::new(),
            })
        }

        fn output(&mut self, pin: u8) -> Result<&mut OutputPin> {
            self.outputs
                .get_mut(&pin)
                .ok_or_else(|| BerryError::Hardware(format!("GPIO{} is not configured", pin)))
        }
    }

    impl GpioLines for RppalGpio {
        fn configure_output(&mut self, pin: u8, level: bool) -> Result<()> {
            if let Some(output) = self.outputs.get_mut(&pin) {
                if level {
                    output.set_high();
                } else {
                    output.set_low();
                }
                return Ok(());
            }
            let raw = self
                .gpio
                .get(pin)
                .map_err(|e| BerryError::Hardware(format!("GPIO{}: {}", pin, e)))?;
            let output = if level {
                raw.into_output_high()
            } else {
                raw.into_output_low()
            };
            self.outputs.insert(pin, output);
            Ok(())
        }

        fn write(&mut self, pin: u8, level: bool) -> Result<()> {
            let output = self.output(pin)?;
            if level {
                output.set_high();
            } else {
                output.set_low();
            }
            Ok(())
        }

        fn read(&mut self, pin: u8) -> Result<bool> {
            Ok(self.output(pin)?.is_set_high())
        }

        fn release(&mut self, pin: u8) {
            // Dropping the OutputPin resets it to its previous mode
            self.outputs.remove(&pin);
        }
    }
}
