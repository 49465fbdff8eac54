//! I2C port expanders
//!
//! Both supported chips expose all their pins through one output register,
//! so switching several pumps on the same chip is a single bus transfer.
//! Each device caches its register contents and only updates the cache
//! after a write succeeded.
//!
//! # MCP23017
//!
//! 16 pins in two 8-bit ports. With `IOCON.BANK = 0` (power-on default) the
//! A/B registers are adjacent and auto-increment, so a 16-bit register is
//! written as `[register, port_a, port_b]`.
//!
//! # PCF8574
//!
//! 8 quasi-bidirectional pins and no registers: the byte written is the
//! port state. A pin written high doubles as an input.

use crate::error::Result;

/// MCP23017 I/O direction register (port A, B follows)
pub const MCP_IODIRA: u8 = 0x00;
/// MCP23017 port register (port A, B follows)
pub const MCP_GPIOA: u8 = 0x12;
/// MCP23017 output latch register (port A, B follows)
pub const MCP_OLATA: u8 = 0x14;

/// Byte-level access to an I2C bus
pub trait I2cBus: Send {
    /// Write bytes to the device at `address`
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()>;

    /// Read bytes from the device at `address`
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write then read in one transaction
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.write(address, bytes)?;
        self.read(address, buffer)
    }
}

/// Logging stand-in used when no I2C bus is available
#[derive(Debug, Default)]
pub struct DevBus;

impl DevBus {
    pub fn new() -> Self {
        Self
    }
}

impl I2cBus for DevBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        tracing::trace!("[dev] I2C 0x{:02X} <- {:02X?}", address, bytes);
        Ok(())
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        tracing::trace!("[dev] I2C 0x{:02X} read {} bytes", address, buffer.len());
        buffer.fill(0);
        Ok(())
    }
}

/// Cached state of one MCP23017
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mcp23017 {
    address: u8,
    iodir: u16,
    olat: u16,
}

impl Mcp23017 {
    /// Device in power-on state (all inputs, latches low)
    pub fn new(address: u8) -> Self {
        Self {
            address,
            iodir: 0xFFFF,
            olat: 0x0000,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Cached output latch
    pub fn latch(&self) -> u16 {
        self.olat
    }

    /// Cached direction register (1 = input)
    pub fn direction(&self) -> u16 {
        self.iodir
    }

    /// Make the pins in `mask` outputs driven to `levels`
    ///
    /// The latch is written before the direction so the outputs never
    /// glitch through the wrong level.
    pub fn configure_outputs(&mut self, bus: &mut dyn I2cBus, mask: u16, levels: u16) -> Result<()> {
        self.write_outputs(bus, mask, levels)?;
        let iodir = self.iodir & !mask;
        if iodir != self.iodir {
            write_register(bus, self.address, MCP_IODIRA, iodir)?;
            self.iodir = iodir;
        }
        Ok(())
    }

    /// Set the pins in `mask` to the matching bits of `levels`
    pub fn write_outputs(&mut self, bus: &mut dyn I2cBus, mask: u16, levels: u16) -> Result<()> {
        let olat = (self.olat & !mask) | (levels & mask);
        write_register(bus, self.address, MCP_OLATA, olat)?;
        self.olat = olat;
        Ok(())
    }

    /// Read both ports
    pub fn read_port(&self, bus: &mut dyn I2cBus) -> Result<u16> {
        let mut buffer = [0u8; 2];
        bus.write_read(self.address, &[MCP_GPIOA], &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Turn the pins in `mask` back into inputs
    pub fn release(&mut self, bus: &mut dyn I2cBus, mask: u16) -> Result<()> {
        let iodir = self.iodir | mask;
        write_register(bus, self.address, MCP_IODIRA, iodir)?;
        self.iodir = iodir;
        Ok(())
    }
}

fn write_register(bus: &mut dyn I2cBus, address: u8, register: u8, value: u16) -> Result<()> {
    let [lo, hi] = value.to_le_bytes();
    bus.write(address, &[register, lo, hi])
}

/// Cached state of one PCF8574
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcf8574 {
    address: u8,
    port: u8,
}

impl Pcf8574 {
    /// Device in power-on state (all pins high)
    pub fn new(address: u8) -> Self {
        Self {
            address,
            port: 0xFF,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Cached port byte
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Set the pins in `mask` to the matching bits of `levels`
    pub fn write_outputs(&mut self, bus: &mut dyn I2cBus, mask: u8, levels: u8) -> Result<()> {
        let port = (self.port & !mask) | (levels & mask);
        bus.write(self.address, &[port])?;
        self.port = port;
        Ok(())
    }

    pub fn read_port(&self, bus: &mut dyn I2cBus) -> Result<u8> {
        let mut buffer = [0u8; 1];
        bus.read(self.address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Release pins by writing them high (quasi-input)
    pub fn release(&mut self, bus: &mut dyn I2cBus, mask: u8) -> Result<()> {
        self.write_outputs(bus, mask, 0xFF)
    }
}

#[cfg(feature = "rpi")]
pub use rpi::RppalBus;

#[cfg(feature = "rpi")]
mod rpi {
    use super::I2cBus;
    use crate::error::{BerryError, Result};
    use rppal::i2c::I2c;

    /// Raspberry Pi I2C bus through rppal
    pub struct RppalBus {
        i2c: I2c,
        selected: Option<u8>,
    }

    impl RppalBus {
        pub fn new() -> Result<Self> {
            let i2c = I2c::new().map_err(|e| BerryError::Hardware(e.to_string()))?;
            Ok(Self { i2c, selected: None })
        }

        fn select(&mut self, address: u8) -> Result<()> {
            if self.selected != Some(address) {
                self.i2c
                    .set_slave_address(u16::from(address))
                    .map_err(|e| BerryError::Hardware(format!("I2C 0x{:02X}: {}", address, e)))?;
                self.selected = Some(address);
            }
            Ok(())
        }
    }

    impl I2cBus for RppalBus {
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
            self.select(address)?;
            self.i2c
                .write(bytes)
                .map(|_| ())
                .map_err(|e| BerryError::Hardware(format!("I2C write 0x{:02X}: {}", address, e)))
        }

        fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
            self.select(address)?;
            self.i2c
                .read(buffer)
                .map(|_| ())
                .map_err(|e| BerryError::Hardware(format!("I2C read 0x{:02X}: {}", address, e)))
        }

        fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
            self.select(address)?;
            self.i2c
                .write_read(bytes, buffer)
                .map_err(|e| BerryError::Hardware(format!("I2C 0x{:02X}: {}", address, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MemoryBus;

    #[test]
    fn test_mcp_configure_writes_latch_then_direction() {
        let mut bus = MemoryBus::new();
        let mut mcp = Mcp23017::new(0x20);

        mcp.configure_outputs(&mut bus, 0b0000_0001_0000_0001, 0x0000)
            .unwrap();

        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, vec![MCP_OLATA, 0x00, 0x00]);
        assert_eq!(writes[1].1, vec![MCP_IODIRA, 0xFE, 0xFE]);
        assert_eq!(mcp.direction(), 0xFEFE);
    }

    #[test]
    fn test_mcp_write_outputs_merges_mask() {
        let mut bus = MemoryBus::new();
        let mut mcp = Mcp23017::new(0x20);

        mcp.write_outputs(&mut bus, 0x0003, 0xFFFF).unwrap();
        mcp.write_outputs(&mut bus, 0x0100, 0x0100).unwrap();
        assert_eq!(mcp.latch(), 0x0103);

        mcp.write_outputs(&mut bus, 0x0001, 0x0000).unwrap();
        assert_eq!(mcp.latch(), 0x0102);
        assert_eq!(bus.mcp_latch(0x20), 0x0102);
    }

    #[test]
    fn test_pcf_starts_high_and_merges() {
        let mut bus = MemoryBus::new();
        let mut pcf = Pcf8574::new(0x21);
        assert_eq!(pcf.port(), 0xFF);

        pcf.write_outputs(&mut bus, 0b0000_0101, 0x00).unwrap();
        assert_eq!(pcf.port(), 0b1111_1010);
        assert_eq!(bus.pcf_port(0x21), 0b1111_1010);

        pcf.release(&mut bus, 0b0000_0001).unwrap();
        assert_eq!(pcf.port(), 0b1111_1011);
    }

    #[test]
    fn test_failed_write_keeps_cache() {
        let mut bus = MemoryBus::new();
        bus.fail_device(0x20);
        let mut pcf = Pcf8574::new(0x20);

        assert!(pcf.write_outputs(&mut bus, 0x01, 0x00).is_err());
        assert_eq!(pcf.port(), 0xFF);
    }
}
