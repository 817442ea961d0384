//! The scheduler: discovers schedules and controllers in a model, owns
//! their execution loops and exposes the application-side controls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::controller::{
    ScheduleController, TargetHandlerSlot, TargetValueChange, TargetValueHandler,
};
use crate::error::{Result, SchedulerError};
use crate::model::{DataModel, RELATIVE_MARKER, Value};
use crate::schedule::{Schedule, ScheduleParameter, ScheduleWorker};
use crate::storage::{self, SharedStorage};

/// Registry keyed by full reference and by `@`-relative reference.
pub(crate) struct ReferenceIndex<T> {
    items: Vec<Arc<T>>,
    by_full: HashMap<String, usize>,
    by_short: HashMap<String, usize>,
}

impl<T> ReferenceIndex<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            by_full: HashMap::new(),
            by_short: HashMap::new(),
        }
    }

    fn insert(&mut self, full: &str, short: &str, item: Arc<T>) {
        let index = self.items.len();
        self.items.push(item);
        self.by_full.insert(full.to_string(), index);
        self.by_short.insert(short.to_string(), index);
    }

    /// Finds an item by full reference, or by `@<ld>/<ln>`.
    pub(crate) fn lookup(&self, reference: &str) -> Option<&Arc<T>> {
        let index = match reference.strip_prefix(RELATIVE_MARKER) {
            Some(short) => self.by_short.get(short),
            None => self.by_full.get(reference),
        }?;
        self.items.get(*index)
    }

    pub(crate) fn items(&self) -> &[Arc<T>] {
        &self.items
    }
}

/// Owns every schedule and controller found in a model.
///
/// Dropping the scheduler stops and joins all schedule loops.
pub struct Scheduler {
    model: Arc<DataModel>,
    config: SchedulerConfig,
    schedules: Arc<ReferenceIndex<Schedule>>,
    controllers: ReferenceIndex<ScheduleController>,
    target_handler: TargetHandlerSlot,
    storage: SharedStorage,
    workers: Mutex<Vec<ScheduleWorker>>,
}

impl Scheduler {
    /// Builds a scheduler on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured storage cannot be opened or a
    /// schedule loop cannot be spawned.
    pub fn new(model: Arc<DataModel>, config: SchedulerConfig) -> Result<Self> {
        Self::with_clock(model, config, Arc::new(SystemClock))
    }

    /// Builds a scheduler on the given clock.
    ///
    /// Schedules are created first, then controllers are bound from the
    /// live attribute values. Policy overrides, storage restore and loop
    /// start follow, in that order.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured storage cannot be opened or a
    /// schedule loop cannot be spawned.
    pub fn with_clock(
        model: Arc<DataModel>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = SharedStorage::default();
        let target_handler: TargetHandlerSlot = Arc::new(RwLock::new(None));
        let markers = &config.scheduler;

        let mut schedules = ReferenceIndex::new();
        for device in model.devices() {
            for node in &device.nodes {
                if !node.name.contains(&markers.schedule_marker) {
                    continue;
                }
                let created = Schedule::create(
                    &model,
                    device,
                    node,
                    Arc::clone(&clock),
                    storage.clone(),
                );
                if let Some(schedule) = created {
                    config.policy.apply_defaults(schedule.policy());
                    let full = schedule.reference().to_string();
                    let short = schedule.short_reference().to_string();
                    schedules.insert(&full, &short, schedule);
                }
            }
        }
        let schedules = Arc::new(schedules);

        let mut controllers = ReferenceIndex::new();
        for device in model.devices() {
            for node in &device.nodes {
                if !node.name.contains(&markers.controller_marker)
                    || !node.has("ActSchdRef")
                    || !node.has("CtlEnt")
                {
                    continue;
                }
                let created = ScheduleController::create(
                    &model,
                    device,
                    node,
                    Arc::clone(&clock),
                    Arc::clone(&schedules),
                    Arc::clone(&target_handler),
                    storage.clone(),
                );
                if let Some(controller) = created {
                    let full = controller.reference().to_string();
                    let short = controller.short_reference().to_string();
                    controllers.insert(&full, &short, controller);
                }
            }
        }

        info!(
            ied = %model.ied_name(),
            schedules = schedules.items().len(),
            controllers = controllers.items().len(),
            "scheduler created"
        );

        let scheduler = Self {
            model,
            config,
            schedules,
            controllers,
            target_handler,
            storage,
            workers: Mutex::new(Vec::new()),
        };

        scheduler.apply_policy_overrides();

        if let Some(uri) = scheduler.config.storage.uri.clone() {
            let params = scheduler.config.storage.params.clone();
            scheduler.initialize_storage(&uri, &params)?;
        }

        if scheduler.config.scheduler.autostart {
            scheduler.start()?;
        }

        Ok(scheduler)
    }

    pub fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Looks up a schedule by full reference, or by `@<ld>/<ln>`.
    pub fn schedule(&self, reference: &str) -> Option<&Arc<Schedule>> {
        self.schedules.lookup(reference)
    }

    /// Looks up a controller by full reference, or by `@<ld>/<ln>`.
    pub fn controller(&self, reference: &str) -> Option<&Arc<ScheduleController>> {
        self.controllers.lookup(reference)
    }

    /// Like [`Scheduler::schedule`], but an unknown reference is an error.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownSchedule`].
    pub fn try_schedule(&self, reference: &str) -> Result<&Arc<Schedule>> {
        self.schedule(reference)
            .ok_or_else(|| SchedulerError::UnknownSchedule(reference.to_string()))
    }

    /// Like [`Scheduler::controller`], but an unknown reference is an error.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownController`].
    pub fn try_controller(&self, reference: &str) -> Result<&Arc<ScheduleController>> {
        self.controller(reference)
            .ok_or_else(|| SchedulerError::UnknownController(reference.to_string()))
    }

    /// All schedules in discovery order.
    pub fn schedules(&self) -> &[Arc<Schedule>] {
        self.schedules.items()
    }

    /// All controllers in discovery order.
    pub fn controllers(&self) -> &[Arc<ScheduleController>] {
        self.controllers.items()
    }

    /// Enables or disables a schedule as if requested locally.
    ///
    /// Returns `false` for an unknown reference or a failed enable.
    pub fn enable_schedule(&self, reference: &str, enable: bool) -> bool {
        let Some(schedule) = self.lookup_schedule(reference) else {
            return false;
        };
        if enable {
            schedule.enable()
        } else {
            schedule.disable();
            true
        }
    }

    /// Allows or denies remote enable/disable of a schedule.
    pub fn enable_schedule_control(&self, reference: &str, enable: bool) -> bool {
        let Some(schedule) = self.lookup_schedule(reference) else {
            return false;
        };
        schedule.policy().set_remote_control(enable);
        info!(schedule = %schedule.reference(), enable, "remote control policy changed");
        true
    }

    /// Allows or denies remote writes of one schedule parameter.
    pub fn enable_write_access_to_parameter(
        &self,
        reference: &str,
        parameter: ScheduleParameter,
        enable: bool,
    ) -> bool {
        let Some(schedule) = self.lookup_schedule(reference) else {
            return false;
        };
        schedule.policy().set_write_allowed(parameter, enable);
        info!(schedule = %schedule.reference(), ?parameter, enable, "write policy changed");
        true
    }

    /// Installs the callback invoked on every target value change,
    /// replacing any previous one.
    pub fn set_target_value_handler<F>(&self, handler: F)
    where
        F: Fn(&TargetValueChange) + Send + Sync + 'static,
    {
        let handler: TargetValueHandler = Arc::new(handler);
        *self.target_handler.write() = Some(handler);
    }

    /// Controlled entity reference and current value of a controller.
    pub fn target_value(&self, controller: &str) -> Option<(String, Value)> {
        self.controller(controller)?.target_value()
    }

    /// Attaches a storage backend and restores every schedule, then every
    /// controller, from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened. Failures while
    /// restoring individual documents are only logged.
    pub fn initialize_storage(&self, uri: &str, params: &BTreeMap<String, String>) -> Result<()> {
        let backend = storage::open(uri, params)?;
        self.storage.attach(Arc::clone(&backend));

        for schedule in self.schedules() {
            storage::restore_schedule(backend.as_ref(), schedule);
        }
        for controller in self.controllers() {
            storage::restore_controller(backend.as_ref(), controller);
        }
        info!(uri = %uri, "storage initialized");
        Ok(())
    }

    /// Runs one step of every schedule at `now`.
    ///
    /// Meant for hosts that drive time themselves with autostart off.
    pub fn tick(&self, now: u64) {
        for schedule in self.schedules() {
            schedule.tick(now);
        }
    }

    /// Starts one loop per schedule. Does nothing if they already run.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Spawn`] if a thread cannot be created.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }
        let period = self.config.scheduler.poll_period();
        for schedule in self.schedules() {
            let worker = ScheduleWorker::spawn(Arc::clone(schedule), period).map_err(|source| {
                error!(schedule = %schedule.reference(), error = %source, "cannot start schedule loop");
                SchedulerError::Spawn {
                    reference: schedule.reference().to_string(),
                    source,
                }
            })?;
            workers.push(worker);
        }
        info!(loops = workers.len(), period_ms = self.config.scheduler.poll_period_ms, "schedule loops started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().iter().any(ScheduleWorker::is_running)
    }

    /// Stops and joins every schedule loop.
    pub fn shutdown(&self) {
        let workers: Vec<ScheduleWorker> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let count = workers.len();
        drop(workers);
        info!(loops = count, "schedule loops stopped");
    }

    fn lookup_schedule(&self, reference: &str) -> Option<&Arc<Schedule>> {
        let schedule = self.schedule(reference);
        if schedule.is_none() {
            warn!(schedule = %reference, "unknown schedule reference");
        }
        schedule
    }

    fn apply_policy_overrides(&self) {
        for o in &self.config.policy.overrides {
            let Some(schedule) = self.lookup_schedule(&o.reference) else {
                continue;
            };
            if let Some(remote_control) = o.remote_control {
                schedule.policy().set_remote_control(remote_control);
            }
            for (parameter, allowed) in o.parameters() {
                schedule.policy().set_write_allowed(parameter, allowed);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("ied", &self.model.ied_name())
            .field("schedules", &self.schedules.items().len())
            .field("controllers", &self.controllers.items().len())
            .finish()
    }
}
