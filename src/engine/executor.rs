//! The pump loop
//!
//! Runs a [`PreparationPlan`] wave by wave. For every wave all pins are
//! opened in one driver call, then each tick:
//!
//! 1. open ops accrue `effective_flow × dt`, never beyond their volume
//! 2. ops whose open time has passed are closed in one batched call
//! 3. progress is published
//! 4. the cancel flag is checked
//! 5. the loop sleeps one tick
//!
//! On leaving a wave every pin of the wave is closed again, whatever the
//! reason. The driver lock is only held for the duration of a driver call,
//! never while sleeping, so an emergency `close_all` can always get in.

use super::cancel::CancelToken;
use super::observer::Notifier;
use super::record::{RunStatus, RunWarning};
use super::status::StatusWriter;
use crate::clock::Clock;
use crate::error::BerryError;
use crate::hardware::{lock_driver, PinAddress, SharedDriver};
use crate::recipe::{PreparationPlan, PumpOp, Wave};
use crate::types::IngredientId;
use std::collections::BTreeSet;
use std::time::Duration;

/// What one op delivered
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpDelivery {
    pub ingredient_id: Option<IngredientId>,
    pub label: String,
    pub requested: f64,
    pub delivered: f64,
}

/// Raw outcome of running a plan
#[derive(Debug)]
pub(crate) struct Execution {
    pub status: RunStatus,
    /// One entry per op, in plan order
    pub deliveries: Vec<OpDelivery>,
    pub elapsed: Duration,
    pub warnings: Vec<RunWarning>,
    pub error: Option<BerryError>,
}

enum WaveEnd {
    Completed,
    Canceled,
    Failed(BerryError),
}

/// Progress in percent of planned time
pub(crate) fn progress_percent(elapsed_s: f64, total_s: f64) -> u8 {
    if total_s <= 0.0 {
        return 100;
    }
    (100.0 * elapsed_s / total_s).round().clamp(0.0, 100.0) as u8
}

pub(crate) struct Executor<'a> {
    pub driver: &'a SharedDriver,
    pub clock: &'a dyn Clock,
    pub cancel: &'a CancelToken,
    pub status: &'a StatusWriter,
    pub tick: Duration,
}

impl Executor<'_> {
    pub fn run(&self, plan: &PreparationPlan, notifier: &mut Notifier<'_>) -> Execution {
        let started = self.clock.now();
        let total = plan.total_duration();
        let mut deliveries: Vec<OpDelivery> = plan
            .ops()
            .map(|op| OpDelivery {
                ingredient_id: op.ingredient_id,
                label: op.label.clone(),
                requested: op.volume,
                delivered: 0.0,
            })
            .collect();
        let mut failed_closes = BTreeSet::new();
        let mut offset = 0.0;
        let mut first_op = 0;
        let mut end = WaveEnd::Completed;

        'phases: for (phase_index, phase) in plan.phases.iter().enumerate() {
            tracing::debug!(
                "Phase {} (order {}): {} waves, {:.1} s",
                phase_index,
                phase.recipe_order,
                phase.waves.len(),
                phase.duration()
            );
            notifier.notify("on_phase", |o| o.on_phase(phase_index));

            for wave in &phase.waves {
                if self.cancel.is_cancelled() {
                    end = WaveEnd::Canceled;
                    break 'phases;
                }
                let ops = first_op..first_op + wave.ops.len();
                end = self.run_wave(
                    wave,
                    &mut deliveries[ops],
                    offset,
                    total,
                    notifier,
                    &mut failed_closes,
                );
                first_op += wave.ops.len();
                offset += wave.duration();
                if !matches!(end, WaveEnd::Completed) {
                    break 'phases;
                }
            }
        }

        let mut warnings = Vec::new();
        if !failed_closes.is_empty() {
            warnings.push(RunWarning::CloseFailed {
                pins: failed_closes.into_iter().collect(),
            });
        }

        let (status, error) = match end {
            WaveEnd::Completed => {
                self.status.set_progress(100);
                (RunStatus::Finished, None)
            }
            WaveEnd::Canceled => (RunStatus::Canceled, None),
            WaveEnd::Failed(e) => (RunStatus::Error, Some(e)),
        };

        Execution {
            status,
            deliveries,
            elapsed: self.clock.now().saturating_sub(started),
            warnings,
            error,
        }
    }

    fn run_wave(
        &self,
        wave: &Wave,
        deliveries: &mut [OpDelivery],
        offset: f64,
        total: f64,
        notifier: &mut Notifier<'_>,
        failed_closes: &mut BTreeSet<PinAddress>,
    ) -> WaveEnd {
        let pins = wave.pins();
        let deadlines: Vec<Duration> = wave.ops.iter().map(PumpOp::deadline).collect();
        let duration = wave.duration();
        let mut open = vec![true; wave.ops.len()];

        tracing::debug!(
            "Opening {} pumps for up to {:.1} s",
            pins.len(),
            duration
        );
        let wave_start = self.clock.now();
        let opened = lock_driver(self.driver).open(&pins);
        if let Err(e) = opened {
            tracing::error!("Aborting run, {}", e);
            self.close(&pins, failed_closes);
            return WaveEnd::Failed(e);
        }

        let mut previous: Option<Duration> = None;
        let end = loop {
            let reading = self.clock.now().saturating_sub(wave_start);
            let now = match previous {
                Some(prev) if reading <= prev => prev + self.tick,
                _ => reading,
            };
            let step = now.saturating_sub(previous.unwrap_or(Duration::ZERO));
            previous = Some(now);

            let mut closing = Vec::new();
            for (i, op) in wave.ops.iter().enumerate() {
                if !open[i] {
                    continue;
                }
                let delivery = &mut deliveries[i];
                delivery.delivered =
                    (delivery.delivered + op.effective_flow * step.as_secs_f64()).min(op.volume);
                if deadlines[i] <= now {
                    open[i] = false;
                    closing.push(op.pin);
                }
            }
            if !closing.is_empty() {
                tracing::debug!(
                    "Closing {} pumps at {:.2} s",
                    closing.len(),
                    now.as_secs_f64()
                );
                self.close(&closing, failed_closes);
            }

            let progress = progress_percent(offset + now.as_secs_f64().min(duration), total);
            self.status.set_progress(progress);
            notifier.notify("on_progress", |o| o.on_progress(progress));

            if open.iter().all(|o| !o) {
                break WaveEnd::Completed;
            }
            if self.cancel.is_cancelled() {
                tracing::info!("Cancel observed at {:.2} s into the wave", now.as_secs_f64());
                break WaveEnd::Canceled;
            }
            self.clock.sleep(self.tick);
        };

        self.close(&pins, failed_closes);
        end
    }

    /// Close pins, remembering the ones that failed
    fn close(&self, pins: &[PinAddress], failed_closes: &mut BTreeSet<PinAddress>) {
        let closed = lock_driver(self.driver).close(pins);
        match closed {
            Ok(()) => {}
            Err(BerryError::CloseFailed(failed)) => {
                tracing::warn!("{}", BerryError::CloseFailed(failed.clone()));
                failed_closes.extend(failed);
            }
            Err(e) => {
                tracing::warn!("Failed to close pins: {}", e);
                failed_closes.extend(pins.iter().copied());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PumpConfig;
    use crate::engine::observer::Observer;
    use crate::hardware::{share, SimulatedPins};
    use crate::recipe::{split_waves, Phase, PlanKind};
    use std::sync::{Arc, Mutex};

    const TICK: Duration = Duration::from_millis(50);

    fn op(pin: u8, flow: f64, volume: f64) -> PumpOp {
        PumpOp::pour(pin as usize, &PumpConfig::gpio(pin, flow), 100, volume)
            .unwrap()
            .with_ingredient(u32::from(pin), format!("I{pin}"))
    }

    fn plan(phases: Vec<Vec<PumpOp>>, max: usize) -> PreparationPlan {
        let mut plan = PreparationPlan::empty(PlanKind::Preparation, "Test");
        for (i, ops) in phases.into_iter().enumerate() {
            plan.phases.push(Phase {
                recipe_order: i as i32 + 1,
                waves: split_waves(ops, max),
            });
        }
        plan
    }

    struct Rig {
        clock: Arc<ManualClock>,
        sim: SimulatedPins,
        driver: SharedDriver,
        cancel: CancelToken,
        status: StatusWriter,
    }

    impl Rig {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            let sim = SimulatedPins::new(clock.clone());
            Self {
                driver: share(Box::new(sim.clone())),
                clock,
                sim,
                cancel: CancelToken::new(),
                status: StatusWriter::new(),
            }
        }

        fn run(&self, plan: &PreparationPlan, observer: &mut dyn Observer) -> Execution {
            let executor = Executor {
                driver: &self.driver,
                clock: self.clock.as_ref(),
                cancel: &self.cancel,
                status: &self.status,
                tick: TICK,
            };
            let mut notifier = Notifier::new();
            notifier.add(observer, "test");
            executor.run(plan, &mut notifier)
        }
    }

    #[derive(Default)]
    struct Progress(Vec<u8>);

    impl Observer for Progress {
        fn on_progress(&mut self, progress: u8) {
            self.0.push(progress);
        }
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0.0, 0.0), 100);
        assert_eq!(progress_percent(4.85, 9.7), 50);
        assert_eq!(progress_percent(12.0, 9.7), 100);
    }

    #[test]
    fn test_single_wave_closes_each_pin_on_time() {
        let rig = Rig::new();
        let plan = plan(vec![vec![op(1, 30.0, 50.0), op(2, 15.0, 50.0)]], 16);
        let mut progress = Progress::default();

        let execution = rig.run(&plan, &mut progress);

        assert_eq!(execution.status, RunStatus::Finished);
        assert_eq!(rig.sim.open_time(PinAddress::Gpio(1)), Duration::from_millis(1700));
        assert_eq!(rig.sim.open_time(PinAddress::Gpio(2)), Duration::from_millis(3300));
        assert_eq!(execution.deliveries[0].delivered, 50.0);
        assert!((execution.deliveries[1].delivered - 50.0).abs() < 1.0);
        assert!(rig.sim.open_pins().is_empty());
        assert!(progress.0.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progress.0.last().unwrap(), 100);
    }

    #[test]
    fn test_delivered_never_exceeds_requested() {
        let rig = Rig::new();
        let plan = plan(vec![vec![op(1, 33.0, 10.0), op(2, 7.0, 3.0)], vec![op(3, 29.0, 101.0)]], 1);

        let execution = rig.run(&plan, &mut Progress::default());

        for delivery in &execution.deliveries {
            assert!(delivery.delivered <= delivery.requested);
            assert!(delivery.delivered > 0.0);
        }
    }

    #[test]
    fn test_waves_run_back_to_back() {
        let rig = Rig::new();
        let plan = plan(vec![vec![op(1, 30.0, 30.0), op(2, 30.0, 60.0), op(3, 30.0, 30.0)]], 2);

        rig.run(&plan, &mut Progress::default());

        let third = rig.sim.events_for(PinAddress::Gpio(3));
        assert_eq!(third[0].at, Duration::from_secs(2));
        assert_eq!(rig.sim.peak_open(), 2);
    }

    #[test]
    fn test_open_failure_aborts() {
        let rig = Rig::new();
        rig.sim.fail_open(PinAddress::Gpio(3));
        let plan = plan(vec![vec![op(1, 30.0, 30.0)], vec![op(2, 30.0, 30.0), op(3, 30.0, 30.0)]], 16);

        let execution = rig.run(&plan, &mut Progress::default());

        assert_eq!(execution.status, RunStatus::Error);
        assert!(matches!(execution.error, Some(BerryError::OpenFailed { .. })));
        assert_eq!(execution.deliveries[0].delivered, 30.0);
        assert_eq!(execution.deliveries[1].delivered, 0.0);
        assert!(rig.sim.open_pins().is_empty());
    }

    #[test]
    fn test_close_failure_is_a_warning() {
        let rig = Rig::new();
        rig.sim.fail_close(PinAddress::Gpio(2));
        let plan = plan(vec![vec![op(1, 30.0, 30.0), op(2, 30.0, 15.0)]], 16);

        let execution = rig.run(&plan, &mut Progress::default());

        assert_eq!(execution.status, RunStatus::Finished);
        assert_eq!(
            execution.warnings,
            vec![RunWarning::CloseFailed {
                pins: vec![PinAddress::Gpio(2)]
            }]
        );
        assert_eq!(execution.deliveries[1].delivered, 15.0);
    }

    #[test]
    fn test_cancel_before_run_pours_nothing() {
        let rig = Rig::new();
        rig.cancel.cancel();
        let plan = plan(vec![vec![op(1, 30.0, 30.0)]], 16);

        let execution = rig.run(&plan, &mut Progress::default());

        assert_eq!(execution.status, RunStatus::Canceled);
        assert!(rig.sim.events().is_empty());
    }

    struct CancelAt {
        clock: Arc<ManualClock>,
        cancel: CancelToken,
        at: Duration,
    }

    impl Observer for CancelAt {
        fn on_progress(&mut self, _progress: u8) {
            if self.clock.now() >= self.at {
                self.cancel.cancel();
            }
        }
    }

    #[test]
    fn test_cancel_closes_within_one_tick() {
        let rig = Rig::new();
        let plan = plan(vec![vec![op(1, 30.0, 80.0)], vec![op(2, 30.0, 210.0)]], 16);
        let mut observer = CancelAt {
            clock: rig.clock.clone(),
            cancel: rig.cancel.clone(),
            at: Duration::from_secs(1),
        };

        let execution = rig.run(&plan, &mut observer);

        assert_eq!(execution.status, RunStatus::Canceled);
        assert_eq!(execution.deliveries[0].delivered, 30.0);
        assert_eq!(execution.deliveries[1].delivered, 0.0);
        assert_eq!(rig.sim.open_time(PinAddress::Gpio(1)), Duration::from_secs(1));
        assert!(rig.sim.events_for(PinAddress::Gpio(2)).is_empty());
    }

    /// Clock stuck at zero for the whole run
    struct FrozenClock {
        sleeps: Mutex<u32>,
    }

    impl Clock for FrozenClock {
        fn now(&self) -> Duration {
            Duration::ZERO
        }

        fn sleep(&self, _duration: Duration) {
            *self.sleeps.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_frozen_clock_still_progresses() {
        let rig = Rig::new();
        let clock = FrozenClock {
            sleeps: Mutex::new(0),
        };
        let executor = Executor {
            driver: &rig.driver,
            clock: &clock,
            cancel: &rig.cancel,
            status: &rig.status,
            tick: TICK,
        };
        let plan = plan(vec![vec![op(1, 30.0, 30.0)]], 16);
        let mut observer = Progress::default();
        let mut notifier = Notifier::new();
        notifier.add(&mut observer, "test");

        let execution = executor.run(&plan, &mut notifier);

        assert_eq!(execution.status, RunStatus::Finished);
        assert_eq!(execution.deliveries[0].delivered, 30.0);
        assert_eq!(*clock.sleeps.lock().unwrap(), 20);
    }
}
