//! The production pin driver
//!
//! A [`PinBank`] owns the board GPIO lines, the I2C bus and a cached model
//! of every expander seen so far. Batch operations are grouped per device so
//! that all pins on one expander change with a single bus write.

use super::expander::{I2cBus, Mcp23017, Pcf8574};
use super::gpio::{DevGpio, GpioLines};
use super::{DevBus, DriverStats, PinAddress, PinDriver};
use crate::error::{BerryError, Result};
use std::collections::BTreeMap;

/// Pins of one expander touched by a batch
#[derive(Default)]
struct DeviceBatch<T> {
    mask: T,
    levels: T,
    members: Vec<PinAddress>,
}

/// Pin driver over board GPIO plus MCP23017/PCF8574 expanders
pub struct PinBank {
    name: String,
    gpio: Box<dyn GpioLines>,
    bus: Box<dyn I2cBus>,
    mcp: BTreeMap<u8, Mcp23017>,
    pcf: BTreeMap<u8, Pcf8574>,
    /// Initialised pins and whether each is active-low
    inverted: BTreeMap<PinAddress, bool>,
    default_invert: bool,
    stats: DriverStats,
}

impl PinBank {
    /// Create a bank over the given transports
    ///
    /// `default_invert` applies to pins used without being initialised first.
    pub fn new(
        name: impl Into<String>,
        gpio: Box<dyn GpioLines>,
        bus: Box<dyn I2cBus>,
        default_invert: bool,
    ) -> Self {
        Self {
            name: name.into(),
            gpio,
            bus,
            mcp: BTreeMap::new(),
            pcf: BTreeMap::new(),
            inverted: BTreeMap::new(),
            default_invert,
            stats: DriverStats::default(),
        }
    }

    /// Bank over the logging dev transports
    pub fn dev(default_invert: bool) -> Self {
        Self::new(
            "dev",
            Box::new(DevGpio::new()),
            Box::new(DevBus::new()),
            default_invert,
        )
    }

    /// Whether a pin has been initialised
    pub fn is_initialised(&self, pin: PinAddress) -> bool {
        self.inverted.contains_key(&pin)
    }

    /// All initialised pins in address order
    pub fn pins(&self) -> Vec<PinAddress> {
        self.inverted.keys().copied().collect()
    }

    fn physical_level(&self, pin: PinAddress, on: bool) -> bool {
        let inverted = self
            .inverted
            .get(&pin)
            .copied()
            .unwrap_or(self.default_invert);
        on != inverted
    }

    /// Drive pins to a logical state, one write per GPIO and per expander
    ///
    /// With `configure` set, pins are also switched to output mode. Returns
    /// the pins that failed together with the reason.
    fn apply(&mut self, pins: &[PinAddress], on: bool, configure: bool) -> Vec<(PinAddress, String)> {
        let mut failures = Vec::new();
        let mut mcp_batches: BTreeMap<u8, DeviceBatch<u16>> = BTreeMap::new();
        let mut pcf_batches: BTreeMap<u8, DeviceBatch<u8>> = BTreeMap::new();

        for &pin in pins {
            let level = self.physical_level(pin, on);
            match pin {
                PinAddress::Gpio(line) => {
                    self.stats.writes += 1;
                    let result = if configure {
                        self.gpio.configure_output(line, level)
                    } else {
                        self.gpio.write(line, level)
                    };
                    if let Err(e) = result {
                        failures.push((pin, e.to_string()));
                    }
                }
                PinAddress::Mcp23017 { address, pin: bit } => {
                    let batch = mcp_batches.entry(address).or_default();
                    batch.mask |= 1 << bit;
                    if level {
                        batch.levels |= 1 << bit;
                    }
                    batch.members.push(pin);
                }
                PinAddress::Pcf8574 { address, pin: bit } => {
                    let batch = pcf_batches.entry(address).or_default();
                    batch.mask |= 1 << bit;
                    if level {
                        batch.levels |= 1 << bit;
                    }
                    batch.members.push(pin);
                }
            }
        }

        for (address, batch) in mcp_batches {
            let device = self
                .mcp
                .entry(address)
                .or_insert_with(|| Mcp23017::new(address));
            self.stats.writes += 1;
            let result = if configure {
                device.configure_outputs(self.bus.as_mut(), batch.mask, batch.levels)
            } else {
                device.write_outputs(self.bus.as_mut(), batch.mask, batch.levels)
            };
            if let Err(e) = result {
                let reason = e.to_string();
                failures.extend(batch.members.into_iter().map(|p| (p, reason.clone())));
            }
        }

        for (address, batch) in pcf_batches {
            let device = self
                .pcf
                .entry(address)
                .or_insert_with(|| Pcf8574::new(address));
            self.stats.writes += 1;
            if let Err(e) = device.write_outputs(self.bus.as_mut(), batch.mask, batch.levels) {
                let reason = e.to_string();
                failures.extend(batch.members.into_iter().map(|p| (p, reason.clone())));
            }
        }

        self.stats.failures += failures.len() as u64;
        failures
    }

    fn ensure_initialised(&mut self, pins: &[PinAddress]) -> Result<()> {
        let missing: Vec<PinAddress> = pins
            .iter()
            .copied()
            .filter(|p| !self.inverted.contains_key(p))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "Initialising {} pins on first use (invert={})",
            missing.len(),
            self.default_invert
        );
        self.initialise(&missing, self.default_invert)
    }

    fn release(&mut self, pins: &[PinAddress]) {
        let mut mcp_masks: BTreeMap<u8, u16> = BTreeMap::new();
        let mut pcf_masks: BTreeMap<u8, u8> = BTreeMap::new();

        for &pin in pins {
            if self.inverted.remove(&pin).is_none() {
                continue;
            }
            match pin {
                PinAddress::Gpio(line) => self.gpio.release(line),
                PinAddress::Mcp23017 { address, pin } => {
                    *mcp_masks.entry(address).or_default() |= 1 << pin
                }
                PinAddress::Pcf8574 { address, pin } => {
                    *pcf_masks.entry(address).or_default() |= 1 << pin
                }
            }
        }

        for (address, mask) in mcp_masks {
            if let Some(device) = self.mcp.get_mut(&address) {
                if let Err(e) = device.release(self.bus.as_mut(), mask) {
                    tracing::warn!("Failed to release MCP23017@0x{:02X}: {}", address, e);
                }
            }
        }
        for (address, mask) in pcf_masks {
            if let Some(device) = self.pcf.get_mut(&address) {
                if let Err(e) = device.release(self.bus.as_mut(), mask) {
                    tracing::warn!("Failed to release PCF8574@0x{:02X}: {}", address, e);
                }
            }
        }
    }
}

impl PinDriver for PinBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialise(&mut self, pins: &[PinAddress], invert_logic: bool) -> Result<()> {
        for &pin in pins {
            self.inverted.insert(pin, invert_logic);
        }
        let failures = self.apply(pins, false, true);
        if failures.is_empty() {
            tracing::debug!("{}: initialised {} pins", self.name, pins.len());
            return Ok(());
        }
        for (pin, _) in &failures {
            self.inverted.remove(pin);
        }
        let detail = failures
            .iter()
            .map(|(pin, reason)| format!("{} ({})", pin, reason))
            .collect::<Vec<_>>()
            .join(", ");
        Err(BerryError::Hardware(format!(
            "Failed to initialise pins: {}",
            detail
        )))
    }

    fn open(&mut self, pins: &[PinAddress]) -> Result<()> {
        self.ensure_initialised(pins)?;
        let failures = self.apply(pins, true, false);
        self.stats.opens += (pins.len() - failures.len()) as u64;
        match failures.into_iter().next() {
            None => Ok(()),
            Some((pin, reason)) => Err(BerryError::OpenFailed { pin, reason }),
        }
    }

    fn close(&mut self, pins: &[PinAddress]) -> Result<()> {
        let known: Vec<PinAddress> = pins
            .iter()
            .copied()
            .filter(|p| self.inverted.contains_key(p))
            .collect();
        let failures = self.apply(&known, false, false);
        self.stats.closes += (known.len() - failures.len()) as u64;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BerryError::CloseFailed(
                failures.into_iter().map(|(pin, _)| pin).collect(),
            ))
        }
    }

    fn read(&mut self, pin: PinAddress) -> Result<bool> {
        let inverted = self.inverted.get(&pin).copied().ok_or_else(|| {
            BerryError::Hardware(format!("Pin {} is not initialised", pin))
        })?;
        let level = match pin {
            PinAddress::Gpio(line) => self.gpio.read(line)?,
            PinAddress::Mcp23017 { address, pin: bit } => {
                let device = self.mcp.get(&address).ok_or_else(|| {
                    BerryError::Hardware(format!("No MCP23017 at 0x{:02X}", address))
                })?;
                device.read_port(self.bus.as_mut())? & (1 << bit) != 0
            }
            PinAddress::Pcf8574 { address, pin: bit } => {
                let device = self.pcf.get(&address).ok_or_else(|| {
                    BerryError::Hardware(format!("No PCF8574 at 0x{:02X}", address))
                })?;
                device.read_port(self.bus.as_mut())? & (1 << bit) != 0
            }
        };
        Ok(level != inverted)
    }

    fn cleanup(&mut self, pins: Option<&[PinAddress]>) -> Result<()> {
        let targets = match pins {
            Some(pins) => pins.to_vec(),
            None => self.pins(),
        };
        let closed = self.close(&targets);
        self.release(&targets);
        tracing::debug!("{}: cleaned up {} pins", self.name, targets.len());
        closed
    }

    fn close_all(&mut self) -> Result<()> {
        let pins = self.pins();
        self.close(&pins)
    }

    fn stats(&self) -> DriverStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MemoryBus;

    fn pcf(pin: u8) -> PinAddress {
        PinAddress::Pcf8574 { address: 0x20, pin }
    }

    fn mcp(pin: u8) -> PinAddress {
        PinAddress::Mcp23017 { address: 0x21, pin }
    }

    fn bank_with_bus(invert: bool) -> (PinBank, MemoryBus) {
        let bus = MemoryBus::new();
        let bank = PinBank::new(
            "test",
            Box::new(DevGpio::new()),
            Box::new(bus.clone()),
            invert,
        );
        (bank, bus)
    }

    #[test]
    fn test_expander_pins_share_one_write() {
        let (mut bank, bus) = bank_with_bus(false);
        let pins = [pcf(0), pcf(3), pcf(5)];
        bank.initialise(&pins, false).unwrap();
        let before = bus.write_count();

        bank.open(&pins).unwrap();

        assert_eq!(bus.write_count() - before, 1);
        assert_eq!(bus.pcf_port(0x20), 0b1111_1111);
        assert_eq!(bank.stats().opens, 3);
    }

    #[test]
    fn test_inverted_pins_idle_high() {
        let (mut bank, bus) = bank_with_bus(true);
        let pins = [pcf(1), mcp(9)];
        bank.initialise(&pins, true).unwrap();

        assert_eq!(bus.pcf_port(0x20) & 0b10, 0b10);
        assert_eq!(bus.mcp_latch(0x21) & (1 << 9), 1 << 9);
        assert_eq!(bus.mcp_direction(0x21) & (1 << 9), 0);

        bank.open(&pins).unwrap();
        assert_eq!(bus.pcf_port(0x20) & 0b10, 0);
        assert_eq!(bus.mcp_latch(0x21) & (1 << 9), 0);
        assert!(bank.read(mcp(9)).unwrap());
        assert!(bank.read(pcf(1)).unwrap());
    }

    #[test]
    fn test_mixed_transports_in_one_batch() {
        let (mut bank, bus) = bank_with_bus(false);
        let pins = [PinAddress::Gpio(14), mcp(0), mcp(1), pcf(2)];
        bank.initialise(&pins, false).unwrap();
        let before = bus.write_count();

        bank.open(&pins).unwrap();

        // one MCP write + one PCF write, the GPIO goes through the lines
        assert_eq!(bus.write_count() - before, 2);
        assert!(bank.read(PinAddress::Gpio(14)).unwrap());
        assert_eq!(bank.stats().writes, 3 + 3);
    }

    #[test]
    fn test_open_failure_names_pin() {
        let (mut bank, bus) = bank_with_bus(false);
        bank.initialise(&[pcf(4)], false).unwrap();
        bus.fail_device(0x20);

        let err = bank.open(&[pcf(4)]).unwrap_err();
        match err {
            BerryError::OpenFailed { pin, .. } => assert_eq!(pin, pcf(4)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_close_failure_lists_all_pins_of_device() {
        let (mut bank, bus) = bank_with_bus(false);
        let pins = [PinAddress::Gpio(2), pcf(0), pcf(1)];
        bank.initialise(&pins, false).unwrap();
        bank.open(&pins).unwrap();
        bus.fail_device(0x20);

        let err = bank.close(&pins).unwrap_err();
        match err {
            BerryError::CloseFailed(failed) => assert_eq!(failed, vec![pcf(0), pcf(1)]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!bank.read(PinAddress::Gpio(2)).unwrap());
    }

    #[test]
    fn test_open_uninitialised_uses_default_invert() {
        let (mut bank, bus) = bank_with_bus(true);
        bank.open(&[pcf(6)]).unwrap();
        assert!(bank.is_initialised(pcf(6)));
        assert_eq!(bus.pcf_port(0x20) & (1 << 6), 0);
    }

    #[test]
    fn test_close_all_and_cleanup() {
        let (mut bank, bus) = bank_with_bus(false);
        let pins = [mcp(0), mcp(15)];
        bank.initialise(&pins, false).unwrap();
        bank.open(&pins).unwrap();

        bank.close_all().unwrap();
        assert_eq!(bus.mcp_latch(0x21), 0);

        bank.cleanup(None).unwrap();
        assert!(bank.pins().is_empty());
        assert_eq!(bus.mcp_direction(0x21), 0xFFFF);
    }

    #[test]
    fn test_reinitialise_is_harmless() {
        let (mut bank, _bus) = bank_with_bus(false);
        bank.initialise(&[PinAddress::Gpio(5)], false).unwrap();
        bank.initialise(&[PinAddress::Gpio(5)], false).unwrap();
        assert_eq!(bank.pins(), vec![PinAddress::Gpio(5)]);
        assert!(!bank.read(PinAddress::Gpio(5)).unwrap());
    }
}
