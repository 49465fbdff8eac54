//! Cancellation and the BUSY gate
//!
//! - [`CancelToken`] - Per-run flag polled by the pump loop every tick
//! - [`CancelHandle`] - What callers hold to stop a run, optionally with an
//!   emergency `close_all` on the driver
//! - [`BusyGate`] - Admits one pump-driving run at a time

use crate::hardware::{lock_driver, SharedDriver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag of one run
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; calling it again has no further effect
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Handle to stop a run from another thread
#[derive(Clone)]
pub struct CancelHandle {
    token: CancelToken,
    driver: SharedDriver,
}

impl CancelHandle {
    pub(crate) fn new(token: CancelToken, driver: SharedDriver) -> Self {
        Self { token, driver }
    }

    /// Ask the run to stop; pins close within one tick
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and close every pin on the driver immediately
    ///
    /// For supervisors that did not see the run stop within a few ticks.
    pub fn emergency_stop(&self) {
        self.token.cancel();
        let closed = lock_driver(&self.driver).close_all();
        match closed {
            Ok(()) => tracing::warn!("Emergency stop: all pins closed"),
            Err(e) => tracing::error!("Emergency stop could not close every pin: {}", e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Admits one pump-driving run at a time
#[derive(Debug, Default)]
pub struct BusyGate {
    busy: AtomicBool,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate, or `None` if a run is in flight
    pub fn try_acquire(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                gate: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Keeps the gate closed until dropped
#[derive(Debug)]
pub struct BusyGuard {
    gate: Arc<BusyGate>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{share, PinAddress, PinDriver, SimulatedPins};
    use crate::clock::ManualClock;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_busy_gate_admits_one() {
        let gate = Arc::new(BusyGate::new());
        let first = gate.try_acquire();
        assert!(first.is_some());
        assert!(gate.try_acquire().is_none());
        assert!(gate.is_busy());

        drop(first);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_emergency_stop_closes_pins() {
        let sim = SimulatedPins::new(Arc::new(ManualClock::new()));
        let mut driver = sim.clone();
        driver.open(&[PinAddress::Gpio(5)]).unwrap();

        let handle = CancelHandle::new(CancelToken::new(), share(Box::new(sim.clone())));
        handle.emergency_stop();

        assert!(handle.is_cancelled());
        assert!(!sim.is_open(PinAddress::Gpio(5)));
        assert_eq!(sim.close_all_calls(), 1);
    }
}
