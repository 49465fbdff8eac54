//! Run notifications
//!
//! Observers are called on the engine thread and must not block. Anything
//! slow (rendering, network) belongs on the other side of a
//! [`ChannelObserver`].
//!
//! A panicking observer never takes the engine down: every callback runs
//! under `catch_unwind`, a panic is logged, recorded as a warning and the
//! observer is skipped for the rest of the run.

use super::record::{CompletionRecord, RunWarning};
use crate::recipe::PreparationPlan;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callbacks for the lifecycle of a run
///
/// All methods default to doing nothing.
pub trait Observer: Send {
    fn on_start(&mut self, _plan: &PreparationPlan) {}

    /// A phase (index into `plan.phases`) is about to start
    fn on_phase(&mut self, _index: usize) {}

    /// Called every tick with the current progress in percent
    fn on_progress(&mut self, _progress: u8) {}

    fn on_finish(&mut self, _record: &CompletionRecord) {}

    fn on_cancel(&mut self, _record: &CompletionRecord) {}

    fn on_error(&mut self, _record: &CompletionRecord) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Fan-out to several observers
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Box<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Observer for ObserverSet {
    fn on_start(&mut self, plan: &PreparationPlan) {
        self.observers.iter_mut().for_each(|o| o.on_start(plan));
    }

    fn on_phase(&mut self, index: usize) {
        self.observers.iter_mut().for_each(|o| o.on_phase(index));
    }

    fn on_progress(&mut self, progress: u8) {
        self.observers.iter_mut().for_each(|o| o.on_progress(progress));
    }

    fn on_finish(&mut self, record: &CompletionRecord) {
        self.observers.iter_mut().for_each(|o| o.on_finish(record));
    }

    fn on_cancel(&mut self, record: &CompletionRecord) {
        self.observers.iter_mut().for_each(|o| o.on_cancel(record));
    }

    fn on_error(&mut self, record: &CompletionRecord) {
        self.observers.iter_mut().for_each(|o| o.on_error(record));
    }
}

/// Wraps one observer and isolates its panics
pub(crate) struct GuardedObserver<'a> {
    inner: &'a mut dyn Observer,
    label: &'static str,
    panicked: bool,
    warnings: Vec<RunWarning>,
}

impl<'a> GuardedObserver<'a> {
    pub(crate) fn new(inner: &'a mut dyn Observer, label: &'static str) -> Self {
        Self {
            inner,
            label,
            panicked: false,
            warnings: Vec::new(),
        }
    }

    /// Run a callback unless the observer panicked before
    pub(crate) fn notify<F>(&mut self, callback: &'static str, f: F)
    where
        F: FnOnce(&mut dyn Observer),
    {
        if self.panicked {
            return;
        }
        let inner = &mut *self.inner;
        if catch_unwind(AssertUnwindSafe(|| f(inner))).is_err() {
            tracing::warn!(
                "{} observer panicked in {}, ignoring it for the rest of the run",
                self.label,
                callback
            );
            self.panicked = true;
            self.warnings.push(RunWarning::ObserverPanicked {
                callback: callback.to_string(),
            });
        }
    }

    /// Warnings collected so far
    pub(crate) fn take_warnings(&mut self) -> Vec<RunWarning> {
        std::mem::take(&mut self.warnings)
    }
}

/// All observers of one run, each guarded on its own
#[derive(Default)]
pub(crate) struct Notifier<'a> {
    guards: Vec<GuardedObserver<'a>>,
}

impl<'a> Notifier<'a> {
    pub(crate) fn new() -> Self {
        Self { guards: Vec::new() }
    }

    pub(crate) fn add(&mut self, observer: &'a mut dyn Observer, label: &'static str) {
        self.guards.push(GuardedObserver::new(observer, label));
    }

    pub(crate) fn notify<F>(&mut self, callback: &'static str, f: F)
    where
        F: Fn(&mut dyn Observer),
    {
        for guard in &mut self.guards {
            guard.notify(callback, &f);
        }
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<RunWarning> {
        self.guards
            .iter_mut()
            .flat_map(GuardedObserver::take_warnings)
            .collect()
    }
}

// ==================== Channel Observer ====================

/// Event forwarded by a [`ChannelObserver`]
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started {
        name: String,
        planned_s: f64,
    },
    Phase(usize),
    Progress(u8),
    Finished(Box<CompletionRecord>),
    Canceled(Box<CompletionRecord>),
    Failed(Box<CompletionRecord>),
}

impl EngineEvent {
    /// Whether this is the last event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::Finished(_) | EngineEvent::Canceled(_) | EngineEvent::Failed(_)
        )
    }
}

/// Observer forwarding events over a bounded channel
///
/// Uses `try_send` so a slow consumer never stalls the pump loop; events
/// that do not fit are dropped and counted.
pub struct ChannelObserver {
    tx: Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn bounded(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Shared counter of dropped events
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn try_send(&self, event: EngineEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Observer for ChannelObserver {
    fn on_start(&mut self, plan: &PreparationPlan) {
        self.try_send(EngineEvent::Started {
            name: plan.name.clone(),
            planned_s: plan.total_duration(),
        });
    }

    fn on_phase(&mut self, index: usize) {
        self.try_send(EngineEvent::Phase(index));
    }

    fn on_progress(&mut self, progress: u8) {
        self.try_send(EngineEvent::Progress(progress));
    }

    fn on_finish(&mut self, record: &CompletionRecord) {
        self.try_send(EngineEvent::Finished(Box::new(record.clone())));
    }

    fn on_cancel(&mut self, record: &CompletionRecord) {
        self.try_send(EngineEvent::Canceled(Box::new(record.clone())));
    }

    fn on_error(&mut self, record: &CompletionRecord) {
        self.try_send(EngineEvent::Failed(Box::new(record.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::PlanKind;

    #[derive(Default)]
    struct Counting {
        progress: Vec<u8>,
        phases: usize,
    }

    impl Observer for Counting {
        fn on_phase(&mut self, _index: usize) {
            self.phases += 1;
        }

        fn on_progress(&mut self, progress: u8) {
            self.progress.push(progress);
        }
    }

    struct Exploding;

    impl Observer for Exploding {
        fn on_progress(&mut self, _progress: u8) {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_guarded_observer_isolates_panics() {
        let mut exploding = Exploding;
        let mut guarded = GuardedObserver::new(&mut exploding, "test");

        guarded.notify("on_progress", |o| o.on_progress(10));
        guarded.notify("on_progress", |o| o.on_progress(20));

        let warnings = guarded.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0],
            RunWarning::ObserverPanicked {
                callback: "on_progress".into()
            }
        );
    }

    #[test]
    fn test_guarded_observer_forwards() {
        let mut counting = Counting::default();
        {
            let mut guarded = GuardedObserver::new(&mut counting, "test");
            guarded.notify("on_phase", |o| o.on_phase(0));
            guarded.notify("on_progress", |o| o.on_progress(50));
            assert!(guarded.take_warnings().is_empty());
        }
        assert_eq!(counting.phases, 1);
        assert_eq!(counting.progress, vec![50]);
    }

    #[test]
    fn test_channel_observer_drops_when_full() {
        let (mut observer, rx) = ChannelObserver::bounded(2);
        observer.on_progress(1);
        observer.on_progress(2);
        observer.on_progress(3);

        assert_eq!(observer.dropped(), 1);
        let received: Vec<u8> = rx
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(received, vec![1, 2]);
    }

    #[test]
    fn test_observer_set_fans_out() {
        let (first, rx_first) = ChannelObserver::bounded(8);
        let (second, rx_second) = ChannelObserver::bounded(8);
        let mut set = ObserverSet::new();
        set.push(Box::new(first));
        set.push(Box::new(second));

        set.on_start(&PreparationPlan::empty(PlanKind::Cleaning, "Cleaning"));

        assert_eq!(set.len(), 2);
        assert!(matches!(rx_first.try_recv(), Ok(EngineEvent::Started { .. })));
        assert!(matches!(rx_second.try_recv(), Ok(EngineEvent::Started { .. })));
    }
}
