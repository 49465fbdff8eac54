//! Preparation engine
//!
//! This module turns recipes into timed pump runs and reports the result.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  start()/prepare()   ┌────────────────────────────────────┐
//! │  Caller  │ ───────────────────▶ │ Engine                             │
//! │ (UI/API) │                      │  validate ─▶ Executor ─▶ commit    │
//! │          │ ◀─── StatusReader ── │      │           │          │      │
//! │          │ ◀─── Observer ────── │   Planner   PinDriver     Store    │
//! └──────────┘                      └────────────────────────────────────┘
//! ```
//!
//! Runs execute synchronously on one worker thread. [`Engine::start`]
//! validates on the calling thread, so validation errors and `BUSY` are
//! returned directly, then hands the plan to a dedicated thread and returns
//! a [`RunHandle`]. [`Engine::prepare`] does the same on the calling thread.
//!
//! # Components
//!
//! - [`status`] - One writer, many readers of state and progress
//! - [`observer`] - Lifecycle callbacks and the UI event channel
//! - [`cancel`] - Cancel tokens and the BUSY gate
//! - [`record`] - The [`CompletionRecord`] a run produces
//! - [`shim`] - Async wrapper for tokio callers

pub mod cancel;
pub(crate) mod commit;
pub(crate) mod executor;
pub mod observer;
pub mod record;
pub mod shim;
pub mod status;

pub use cancel::{BusyGate, BusyGuard, CancelHandle, CancelToken};
pub use observer::{ChannelObserver, EngineEvent, NoopObserver, Observer, ObserverSet};
pub use record::{CompletionRecord, IngredientConsumption, RunStatus, RunWarning};
pub use status::{CocktailState, CocktailStatus, StatusReader, StatusWriter};

use crate::clock::{Clock, MonotonicClock};
use crate::config::AppConfig;
use crate::error::{BerryError, Result};
use crate::hardware::{lock_driver, share, DriverStats, PinAddress, PinDriver, SharedDriver};
use crate::recipe::{scale, PlanKind, Planner, PreparationPlan, ScaleParams};
use crate::store::Store;
use crate::types::{Recipe, RecipeId, Slot};
use chrono::Utc;
use executor::{Execution, Executor};
use observer::Notifier;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Everything the engine is built from
pub struct EngineContext {
    pub config: AppConfig,
    pub driver: Box<dyn PinDriver>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Context using the monotonic system clock
    pub fn new(config: AppConfig, driver: Box<dyn PinDriver>, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            driver,
            store,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparationRequest {
    pub recipe_id: RecipeId,
    /// Glass size in ml
    pub target_volume: f64,
    /// 1.0 is the recipe's own strength
    pub alcohol_factor: f64,
    pub virgin: bool,
}

impl PreparationRequest {
    pub fn new(recipe_id: RecipeId, target_volume: f64) -> Self {
        Self {
            recipe_id,
            target_volume,
            alcohol_factor: 1.0,
            virgin: false,
        }
    }

    pub fn with_alcohol_factor(mut self, factor: f64) -> Self {
        self.alcohol_factor = factor;
        self
    }

    /// Ask for the non-alcoholic version
    pub fn virgin(mut self) -> Self {
        self.virgin = true;
        self
    }

    fn scale_params(&self) -> ScaleParams {
        if self.virgin {
            ScaleParams::virgin(self.target_volume)
        } else {
            ScaleParams::new(self.target_volume, self.alcohol_factor)
        }
    }
}

/// A run executing on the engine thread
pub struct RunHandle {
    cancel: CancelHandle,
    thread: JoinHandle<CompletionRecord>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and close every pin immediately
    pub fn emergency_stop(&self) {
        self.cancel.emergency_stop();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end
    pub fn join(self) -> Result<CompletionRecord> {
        self.thread
            .join()
            .map_err(|_| BerryError::Worker("Engine thread panicked".to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The cocktail preparation engine
pub struct Engine {
    config: AppConfig,
    planner: Planner,
    driver: SharedDriver,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    status: StatusWriter,
    gate: Arc<BusyGate>,
    /// Token of the current (or last) run
    cancel: Mutex<CancelToken>,
    /// Observers notified about every run, after the per-run observer
    observers: Mutex<Vec<Box<dyn Observer>>>,
}

impl Engine {
    /// Validate the configuration and initialise every pump pin
    pub fn new(context: EngineContext) -> Result<Self> {
        let EngineContext {
            config,
            mut driver,
            store,
            clock,
        } = context;
        config.validate()?;

        let global = config.engine.invert_logic;
        let mut groups: BTreeMap<bool, Vec<PinAddress>> = BTreeMap::new();
        for pump in &config.pumps {
            groups
                .entry(pump.inverted(global))
                .or_default()
                .push(pump.address()?);
        }
        if let Some(pin) = config.engine.reversion_pin {
            groups.entry(global).or_default().push(PinAddress::Gpio(pin));
        }
        for (invert, pins) in &groups {
            driver
                .initialise(pins, *invert)
                .map_err(|e| e.with_context("Failed to initialise pump pins"))?;
        }
        tracing::info!(
            "Engine ready: {} pumps on {} driver, tick {:?}",
            config.pumps.len(),
            driver.name(),
            config.engine.tick_period()
        );

        Ok(Self {
            planner: Planner::new(config.pumps.clone(), config.engine.plan_policy()),
            config,
            driver: share(driver),
            store,
            clock,
            status: StatusWriter::new(),
            gate: Arc::new(BusyGate::new()),
            cancel: Mutex::new(CancelToken::new()),
            observers: Mutex::new(Vec::new()),
        })
    }

    // ==================== Queries ====================

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// New reader of the machine status
    pub fn status(&self) -> StatusReader {
        self.status.reader()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn driver_stats(&self) -> DriverStats {
        lock_driver(&self.driver).stats()
    }

    /// Recipes that can be made with the mounted bottles
    pub fn possible_recipes(&self) -> Result<Vec<Recipe>> {
        let recipes = self.store.list_recipes()?;
        let bottles = self.store.get_bottle_state()?;
        Ok(
            crate::recipe::possible_recipes(&recipes, &bottles, self.planner.policy())
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    /// Validate a request without running it
    pub fn plan(&self, request: &PreparationRequest) -> Result<PreparationPlan> {
        let recipe = self.store.get_recipe(request.recipe_id)?.ok_or_else(|| {
            BerryError::RecipeNotPossible(format!("Unknown recipe {}", request.recipe_id))
        })?;
        let bottles = self.store.get_bottle_state()?;
        let scaled = scale(&recipe, request.scale_params());
        self.planner.validate(&scaled, &bottles)
    }

    // ==================== Control ====================

    /// Register an observer for every future run (LEDs, loggers)
    ///
    /// An observer added while a run is in flight joins from the next run on.
    pub fn add_observer(&self, observer: Box<dyn Observer>) {
        lock(&self.observers).push(observer);
    }

    /// Cancel the current run; does nothing when idle
    pub fn cancel(&self) {
        lock(&self.cancel).cancel();
    }

    /// Handle cancelling the current (or most recent) run
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(lock(&self.cancel).clone(), Arc::clone(&self.driver))
    }

    /// Return from a terminal state to IDLE
    pub fn acknowledge(&self) {
        if self.status.state().is_terminal() {
            self.status.set_state(CocktailState::Idle, "");
        }
    }

    // ==================== Runs ====================

    /// Prepare a cocktail on the calling thread
    ///
    /// Validation errors and `BUSY` are returned as `Err`; anything that
    /// happens once the pumps run is reported in the record.
    pub fn prepare(
        &self,
        request: &PreparationRequest,
        observer: &mut dyn Observer,
    ) -> Result<CompletionRecord> {
        let (_busy, token) = self.acquire()?;
        let plan = self.validate_request(request)?;
        Ok(self.execute(&plan, &token, observer))
    }

    /// Prepare a cocktail on a dedicated engine thread
    pub fn start(
        self: &Arc<Self>,
        request: &PreparationRequest,
        observer: Box<dyn Observer>,
    ) -> Result<RunHandle> {
        let (busy, token) = self.acquire()?;
        let plan = self.validate_request(request)?;
        self.spawn(plan, busy, token, observer)
    }

    /// Run every pump for the configured cleaning time on the calling thread
    pub fn clean(&self, observer: &mut dyn Observer) -> Result<CompletionRecord> {
        let (_busy, token) = self.acquire()?;
        let plan = self.cleaning_plan()?;
        Ok(self.execute(&plan, &token, observer))
    }

    /// Start cleaning on a dedicated engine thread
    pub fn start_cleaning(self: &Arc<Self>, observer: Box<dyn Observer>) -> Result<RunHandle> {
        let (busy, token) = self.acquire()?;
        let plan = self.cleaning_plan()?;
        self.spawn(plan, busy, token, observer)
    }

    /// Mark the bottle on `slot` as full, optionally priming its tube
    ///
    /// Priming pours the pump's tube volume and is not committed. Returns
    /// the priming record, or `None` when nothing was pumped.
    pub fn refill(
        &self,
        slot: Slot,
        prime: bool,
        observer: &mut dyn Observer,
    ) -> Result<Option<CompletionRecord>> {
        let (_busy, token) = self.acquire()?;
        let ingredient = self.store.refill_bottle(slot)?;
        tracing::info!("Refilled slot {} with {}", slot, ingredient.name);

        let tube_volume = self.config.pump(slot).map_or(0.0, |p| p.tube_volume);
        if !prime || tube_volume <= 0.0 {
            return Ok(None);
        }
        let mut plan = self
            .planner
            .single_pump_plan(PlanKind::Priming, slot, tube_volume, None)?;
        for phase in &mut plan.phases {
            for wave in &mut phase.waves {
                for op in &mut wave.ops {
                    op.ingredient_id = Some(ingredient.id);
                    op.label = ingredient.name.clone();
                }
            }
        }
        Ok(Some(self.execute(&plan, &token, observer)))
    }

    /// Pour `volume` ml through one pump at its nominal flow, for calibration
    ///
    /// Ingredient pump speeds are ignored and nothing is committed; compare
    /// the measured output with `volume` to correct the pump's flow.
    pub fn dispense_volume(
        &self,
        slot: Slot,
        volume: f64,
        observer: &mut dyn Observer,
    ) -> Result<CompletionRecord> {
        let (_busy, token) = self.acquire()?;
        let plan = self
            .planner
            .single_pump_plan(PlanKind::Calibration, slot, volume, None)?;
        Ok(self.execute(&plan, &token, observer))
    }

    /// Enter the BUSY gate and install the token of the new run
    ///
    /// The token is swapped in before validation, so a cancel arriving while
    /// the request is checked already stops this run.
    fn acquire(&self) -> Result<(BusyGuard, CancelToken)> {
        let busy = self.gate.try_acquire().ok_or_else(|| {
            tracing::debug!("Rejecting run, engine is busy");
            BerryError::Busy
        })?;
        let token = CancelToken::new();
        *lock(&self.cancel) = token.clone();
        Ok((busy, token))
    }

    /// VALIDATING, then back to IDLE if the request is refused
    fn validate_request(&self, request: &PreparationRequest) -> Result<PreparationPlan> {
        self.status.begin(
            CocktailState::Validating,
            format!("Checking recipe {}", request.recipe_id),
        );
        let validated = self.plan(request);
        if let Err(e) = &validated {
            tracing::info!("Recipe {} refused: {}", request.recipe_id, e);
            self.status.set_state(CocktailState::Idle, e.to_string());
        }
        validated
    }

    fn cleaning_plan(&self) -> Result<PreparationPlan> {
        self.planner
            .cleaning_plan(self.config.engine.cleaning_time().as_secs_f64())
    }

    fn spawn(
        self: &Arc<Self>,
        plan: PreparationPlan,
        busy: BusyGuard,
        token: CancelToken,
        mut observer: Box<dyn Observer>,
    ) -> Result<RunHandle> {
        let cancel = CancelHandle::new(token.clone(), Arc::clone(&self.driver));
        let engine = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name("cocktailberry-engine".to_string())
            .spawn(move || {
                let _busy = busy;
                engine.execute(&plan, &token, observer.as_mut())
            })
            .map_err(|e| BerryError::Worker(format!("Failed to spawn engine thread: {}", e)))?;
        Ok(RunHandle { cancel, thread })
    }

    /// Run a validated plan to its end
    fn execute(
        &self,
        plan: &PreparationPlan,
        token: &CancelToken,
        observer: &mut dyn Observer,
    ) -> CompletionRecord {
        let started_at = Utc::now();
        // Taken out for the run so `add_observer` never waits on a pour
        let mut persistent = std::mem::take(&mut *lock(&self.observers));
        let mut notifier = Notifier::new();
        notifier.add(observer, "run");
        for extra in persistent.iter_mut() {
            notifier.add(extra.as_mut(), "engine");
        }

        tracing::info!(
            "Starting '{}': {} phases, {} waves, {:.1} s planned",
            plan.name,
            plan.phases.len(),
            plan.wave_count(),
            plan.total_duration()
        );
        self.status
            .begin(CocktailState::InProgress, format!("Preparing {}", plan.name));
        notifier.notify("on_start", |o| o.on_start(plan));

        let reversed = plan.kind == PlanKind::Cleaning && self.set_reversion(true);
        let executor = Executor {
            driver: &self.driver,
            clock: self.clock.as_ref(),
            cancel: token,
            status: &self.status,
            tick: self.config.engine.tick_period(),
        };
        let execution = executor.run(plan, &mut notifier);
        if reversed {
            self.set_reversion(false);
        }

        let mut record = build_record(plan, execution, started_at);
        record.warnings.extend(notifier.take_warnings());
        commit::commit(self.store.as_ref(), &mut record);

        let (state, message) = match record.status {
            RunStatus::Finished if record.comment_text.is_empty() => {
                (CocktailState::Finished, format!("{} is ready", record.name))
            }
            RunStatus::Finished => (CocktailState::Finished, record.comment_text.clone()),
            RunStatus::Canceled => (CocktailState::Canceled, format!("{} canceled", record.name)),
            RunStatus::Error => (
                CocktailState::Error,
                record.error.clone().unwrap_or_default(),
            ),
        };
        self.status.set_state(state, message);

        match record.status {
            RunStatus::Finished => notifier.notify("on_finish", |o| o.on_finish(&record)),
            RunStatus::Canceled => notifier.notify("on_cancel", |o| o.on_cancel(&record)),
            RunStatus::Error => notifier.notify("on_error", |o| o.on_error(&record)),
        }
        drop(notifier);
        let mut observers = lock(&self.observers);
        let added = std::mem::replace(&mut *observers, persistent);
        observers.extend(added);
        drop(observers);

        tracing::info!(
            "'{}' ended {} after {:.1} s ({:.0} ml delivered)",
            record.name,
            record.status,
            record.elapsed_s,
            record.total_delivered()
        );
        record
    }

    /// Switch the reversion relay; true if it is now in the requested state
    fn set_reversion(&self, on: bool) -> bool {
        let Some(pin) = self.config.engine.reversion_pin else {
            return false;
        };
        let pins = [PinAddress::Gpio(pin)];
        let switched = if on {
            lock_driver(&self.driver).open(&pins)
        } else {
            lock_driver(&self.driver).close(&pins)
        };
        match switched {
            Ok(()) => {
                tracing::debug!("Reversion pin GPIO{} {}", pin, if on { "on" } else { "off" });
                true
            }
            Err(e) => {
                tracing::warn!("Failed to switch reversion pin: {}", e);
                false
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let cleaned = lock_driver(&self.driver).cleanup(None);
        if let Err(e) = cleaned {
            tracing::warn!("Pin cleanup failed: {}", e);
        }
    }
}

/// Aggregate op deliveries per ingredient, in plan order
fn build_record(
    plan: &PreparationPlan,
    execution: Execution,
    started_at: chrono::DateTime<Utc>,
) -> CompletionRecord {
    let mut per_ingredient: Vec<IngredientConsumption> = Vec::new();
    for delivery in &execution.deliveries {
        let Some(id) = delivery.ingredient_id else {
            continue;
        };
        match per_ingredient.iter_mut().find(|e| e.ingredient_id == id) {
            Some(entry) => {
                entry.requested += delivery.requested;
                entry.delivered += delivery.delivered;
            }
            None => per_ingredient.push(IngredientConsumption {
                ingredient_id: id,
                ingredient_name: delivery.label.clone(),
                requested: delivery.requested,
                delivered: delivery.delivered,
            }),
        }
    }

    let mut record = CompletionRecord {
        status: execution.status,
        kind: plan.kind,
        recipe_id: plan.recipe_id,
        name: plan.name.clone(),
        virgin: plan.virgin,
        per_ingredient,
        elapsed_s: execution.elapsed.as_secs_f64(),
        planned_s: plan.total_duration(),
        warnings: execution.warnings,
        hand_adds: plan.hand_adds.clone(),
        comment_text: plan.comment_text(),
        error_code: None,
        error: None,
        started_at,
    };
    if let Some(error) = &execution.error {
        record.fail(error);
    }
    record
}
