//! In-memory hardware for tests and demos
//!
//! - [`SimulatedPins`] - A [`PinDriver`] that records every state change with
//!   a timestamp from the engine's [`Clock`] and can be told to fail
//! - [`MemoryBus`] - An [`I2cBus`] that models MCP23017/PCF8574 registers
//!
//! Both are cheap handles over shared state: clone one, hand the clone to
//! the engine, and inspect the original afterwards.

use super::expander::{I2cBus, MCP_GPIOA, MCP_IODIRA, MCP_OLATA};
use super::{DriverStats, PinAddress, PinDriver};
use crate::clock::Clock;
use crate::error::{BerryError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ==================== SimulatedPins ====================

/// State change of a simulated pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinAction {
    Open,
    Close,
}

/// One recorded pin state change
#[derive(Debug, Clone, PartialEq)]
pub struct PinEvent {
    /// Global order of the event
    pub seq: u64,
    /// Clock time of the event
    pub at: Duration,
    pub pin: PinAddress,
    pub action: PinAction,
}

#[derive(Default)]
struct SimState {
    initialised: BTreeMap<PinAddress, bool>,
    open: BTreeSet<PinAddress>,
    events: Vec<PinEvent>,
    fail_open: BTreeSet<PinAddress>,
    fail_close: BTreeSet<PinAddress>,
    stats: DriverStats,
    next_seq: u64,
    peak_open: usize,
    close_all_calls: u64,
}

impl SimState {
    fn record(&mut self, at: Duration, pin: PinAddress, action: PinAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(PinEvent {
            seq,
            at,
            pin,
            action,
        });
    }

    fn close_pins(&mut self, at: Duration, pins: &[PinAddress]) -> Result<()> {
        self.stats.writes += 1;
        let mut failed = Vec::new();
        for &pin in pins {
            if self.fail_close.contains(&pin) {
                self.stats.failures += 1;
                failed.push(pin);
                continue;
            }
            if self.open.remove(&pin) {
                self.stats.closes += 1;
                self.record(at, pin, PinAction::Close);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(BerryError::CloseFailed(failed))
        }
    }
}

/// Recording pin driver
#[derive(Clone)]
pub struct SimulatedPins {
    state: Arc<Mutex<SimState>>,
    clock: Arc<dyn Clock>,
}

impl SimulatedPins {
    /// Create a driver that timestamps events with `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every future open of `pin` fail
    pub fn fail_open(&self, pin: PinAddress) {
        self.lock().fail_open.insert(pin);
    }

    /// Make every future close of `pin` fail (the pin stays open)
    pub fn fail_close(&self, pin: PinAddress) {
        self.lock().fail_close.insert(pin);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_open.clear();
        state.fail_close.clear();
    }

    /// All recorded events in order
    pub fn events(&self) -> Vec<PinEvent> {
        self.lock().events.clone()
    }

    /// Recorded events of one pin
    pub fn events_for(&self, pin: PinAddress) -> Vec<PinEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.pin == pin)
            .cloned()
            .collect()
    }

    /// Forget recorded events
    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn is_open(&self, pin: PinAddress) -> bool {
        self.lock().open.contains(&pin)
    }

    /// Pins currently open
    pub fn open_pins(&self) -> Vec<PinAddress> {
        self.lock().open.iter().copied().collect()
    }

    /// Highest number of pins open at the same time
    pub fn peak_open(&self) -> usize {
        self.lock().peak_open
    }

    /// Initialised pins with their invert flag
    pub fn initialised(&self) -> BTreeMap<PinAddress, bool> {
        self.lock().initialised.clone()
    }

    /// How often `close_all` was called
    pub fn close_all_calls(&self) -> u64 {
        self.lock().close_all_calls
    }

    /// Total time a pin spent open, summed over all open/close pairs
    ///
    /// A pin that is still open counts up to the clock's current time.
    pub fn open_time(&self, pin: PinAddress) -> Duration {
        let now = self.clock.now();
        let mut total = Duration::ZERO;
        let mut opened: Option<Duration> = None;
        for event in self.events_for(pin) {
            match event.action {
                PinAction::Open => opened = Some(event.at),
                PinAction::Close => {
                    if let Some(start) = opened.take() {
                        total += event.at.saturating_sub(start);
                    }
                }
            }
        }
        if let Some(start) = opened {
            total += now.saturating_sub(start);
        }
        total
    }
}

impl PinDriver for SimulatedPins {
    fn name(&self) -> &str {
        "simulated"
    }

    fn initialise(&mut self, pins: &[PinAddress], invert_logic: bool) -> Result<()> {
        let mut state = self.lock();
        for &pin in pins {
            state.initialised.insert(pin, invert_logic);
        }
        Ok(())
    }

    fn open(&mut self, pins: &[PinAddress]) -> Result<()> {
        let at = self.clock.now();
        let mut state = self.lock();
        state.stats.writes += 1;
        for &pin in pins {
            if state.fail_open.contains(&pin) {
                state.stats.failures += 1;
                return Err(BerryError::OpenFailed {
                    pin,
                    reason: "simulated failure".to_string(),
                });
            }
            if state.open.insert(pin) {
                state.stats.opens += 1;
                state.record(at, pin, PinAction::Open);
            }
        }
        state.peak_open = state.peak_open.max(state.open.len());
        Ok(())
    }

    fn close(&mut self, pins: &[PinAddress]) -> Result<()> {
        let at = self.clock.now();
        self.lock().close_pins(at, pins)
    }

    fn read(&mut self, pin: PinAddress) -> Result<bool> {
        Ok(self.lock().open.contains(&pin))
    }

    fn cleanup(&mut self, pins: Option<&[PinAddress]>) -> Result<()> {
        let at = self.clock.now();
        let mut state = self.lock();
        let targets: Vec<PinAddress> = match pins {
            Some(pins) => pins.to_vec(),
            None => state
                .initialised
                .keys()
                .chain(state.open.iter())
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };
        let closed = state.close_pins(at, &targets);
        for pin in &targets {
            state.initialised.remove(pin);
        }
        closed
    }

    fn close_all(&mut self) -> Result<()> {
        let at = self.clock.now();
        let mut state = self.lock();
        state.close_all_calls += 1;
        let targets: Vec<PinAddress> = state
            .initialised
            .keys()
            .chain(state.open.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        state.close_pins(at, &targets)
    }

    fn stats(&self) -> DriverStats {
        self.lock().stats.clone()
    }
}

// ==================== MemoryBus ====================

#[derive(Default)]
struct BusState {
    writes: Vec<(u8, Vec<u8>)>,
    /// MCP23017 16-bit registers keyed by (address, register)
    mcp: BTreeMap<(u8, u8), u16>,
    /// PCF8574 port bytes
    pcf: BTreeMap<u8, u8>,
    failing: BTreeSet<u8>,
}

/// Register-level model of expanders on an I2C bus
///
/// Three-byte writes are MCP23017 register writes, single-byte writes are
/// PCF8574 port writes.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every successful write as (address, bytes)
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Output latch of an MCP23017 (0 before the first write)
    pub fn mcp_latch(&self, address: u8) -> u16 {
        self.lock()
            .mcp
            .get(&(address, MCP_OLATA))
            .copied()
            .unwrap_or(0)
    }

    /// Direction register of an MCP23017 (all inputs before the first write)
    pub fn mcp_direction(&self, address: u8) -> u16 {
        self.lock()
            .mcp
            .get(&(address, MCP_IODIRA))
            .copied()
            .unwrap_or(0xFFFF)
    }

    /// Port byte of a PCF8574 (all high before the first write)
    pub fn pcf_port(&self, address: u8) -> u8 {
        self.lock().pcf.get(&address).copied().unwrap_or(0xFF)
    }

    /// Make every transfer to `address` fail
    pub fn fail_device(&self, address: u8) {
        self.lock().failing.insert(address);
    }

    pub fn heal_device(&self, address: u8) {
        self.lock().failing.remove(&address);
    }
}

fn nack(address: u8) -> BerryError {
    BerryError::Hardware(format!("No acknowledge from 0x{:02X}", address))
}

impl I2cBus for MemoryBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.failing.contains(&address) {
            return Err(nack(address));
        }
        match bytes {
            [register, lo, hi] => {
                state
                    .mcp
                    .insert((address, *register), u16::from_le_bytes([*lo, *hi]));
            }
            [port] => {
                state.pcf.insert(address, *port);
            }
            _ => {
                return Err(BerryError::Hardware(format!(
                    "Unexpected {}-byte write to 0x{:02X}",
                    bytes.len(),
                    address
                )))
            }
        }
        state.writes.push((address, bytes.to_vec()));
        Ok(())
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        let state = self.lock();
        if state.failing.contains(&address) {
            return Err(nack(address));
        }
        let port = state.pcf.get(&address).copied().unwrap_or(0xFF);
        buffer.fill(port);
        Ok(())
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        let state = self.lock();
        if state.failing.contains(&address) {
            return Err(nack(address));
        }
        // Output pins read back their latch
        let value = match bytes.first() {
            Some(&MCP_GPIOA) => state.mcp.get(&(address, MCP_OLATA)).copied().unwrap_or(0),
            Some(register) => state.mcp.get(&(address, *register)).copied().unwrap_or(0),
            None => 0,
        };
        for (slot, byte) in buffer.iter_mut().zip(value.to_le_bytes()) {
            *slot = byte;
        }
        Ok(())
    }
}
