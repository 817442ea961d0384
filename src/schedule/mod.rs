//! Schedules: validation, the execution state machine, and the remote
//! access interceptors installed on a schedule node.
//!
//! A [`Schedule`] is always shared behind an `Arc`. Its state lives partly in
//! atomics (state, priority, reuse, policy) and partly in a per-schedule
//! run lock that serializes loop ticks with enable and disable. Listener
//! callbacks are always made after that lock is released.

pub mod interval;
mod kind;
mod state;
pub mod trigger;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::model::{
    CheckResult, ControlAction, ControlResult, DataAccessError, DataModel, LogicalDevice,
    LogicalNode, NodeRef, Quality, Transaction, Value, ValueKind,
};
use crate::storage::{self, SharedStorage};

pub use kind::{TargetKind, is_numbered, numbered_names};
pub use state::{AccessPolicy, EnableError, ScheduleParameter, ScheduleState};
pub use worker::ScheduleWorker;

use trigger::{EdgeDetector, StartTimeSlot, TriggerMode};

/// Objects a node must declare to be taken as a schedule.
const REQUIRED_PATHS: [&str; 5] = ["SchdSt", "NxtStrTm", "SchdPrio.setVal", "EnaReq", "DsaReq"];

/// Index value meaning "no entry published yet in this run".
const ENTRY_UNASSIGNED: i64 = -2;

/// Receives events from the schedules it is bound to.
pub trait ScheduleListener: Send + Sync {
    fn priority_updated(&self, schedule: &Schedule);
    fn state_updated(&self, schedule: &Schedule);
    fn value_updated(&self, schedule: &Schedule, value: &Value, timestamp_ms: u64);
}

#[derive(Debug)]
struct RunState {
    mode: Option<TriggerMode>,
    next_start: u64,
    start_time: u64,
    entry_duration_ms: u64,
    entry_count: usize,
    current_entry: i64,
    edge: EdgeDetector,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            mode: None,
            next_start: 0,
            start_time: 0,
            entry_duration_ms: 0,
            entry_count: 0,
            current_entry: ENTRY_UNASSIGNED,
            edge: EdgeDetector::default(),
        }
    }
}

#[derive(Default)]
struct TickEvents {
    state_changed: bool,
    value: Option<(Value, u64)>,
}

/// Point-in-time view of a schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub reference: String,
    pub kind: TargetKind,
    pub state: ScheduleState,
    pub priority: i32,
    pub reuse: bool,
    pub next_start_ms: u64,
    pub active_entry: Option<usize>,
    pub enable_error: Option<EnableError>,
    pub remote_control: bool,
}

/// One scheduling unit bound to a schedule node of the model.
pub struct Schedule {
    reference: String,
    node: String,
    kind: TargetKind,
    entry_names: Vec<String>,
    start_times: Vec<StartTimeSlot>,
    has_reuse: bool,
    model: Arc<DataModel>,
    clock: Arc<dyn Clock>,
    priority: AtomicI32,
    reuse: AtomicBool,
    state: AtomicI32,
    policy: AccessPolicy,
    run: Mutex<RunState>,
    listeners: RwLock<Vec<Weak<dyn ScheduleListener>>>,
    storage: SharedStorage,
}

impl Schedule {
    /// Builds a schedule for `node` and installs its interceptors.
    ///
    /// Returns `None` (after logging why) when the node lacks a required
    /// object or declares no recognizable target kind.
    pub fn create(
        model: &Arc<DataModel>,
        device: &LogicalDevice,
        node: &LogicalNode,
        clock: Arc<dyn Clock>,
        storage: SharedStorage,
    ) -> Option<Arc<Self>> {
        let short = format!("{}/{}", device.inst, node.name);

        let missing: Vec<&str> = REQUIRED_PATHS
            .into_iter()
            .filter(|path| !node.has(path))
            .collect();
        if !missing.is_empty() {
            warn!(node = %short, ?missing, "not a schedule, required objects missing");
            return None;
        }

        let Some(kind) = TargetKind::detect(node) else {
            error!(node = %short, "schedule node without a known target value kind");
            return None;
        };

        let entry_names: Vec<String> = node
            .objects
            .iter()
            .filter(|o| is_numbered(&o.name, kind.entry_prefix()))
            .map(|o| o.name.clone())
            .collect();

        let start_times: Vec<StartTimeSlot> = node
            .objects
            .iter()
            .filter(|o| is_numbered(&o.name, "StrTm") && o.attribute("setTm").is_some())
            .map(|o| StartTimeSlot {
                id: o.name.clone(),
                attribute: format!("{short}.{}.setTm", o.name),
            })
            .collect();

        if node.has("EvTrg.setVal") && !node.has("InSyn.setSrcRef") {
            error!(node = %short, "EvTrg present but InSyn.setSrcRef missing");
        }

        let priority = model
            .get_int(&format!("{short}.SchdPrio.setVal"))
            .unwrap_or(0);
        let has_reuse = node.has("SchdReuse.setVal");
        let reuse = model
            .get_bool(&format!("{short}.SchdReuse.setVal"))
            .unwrap_or(false);

        let schedule = Arc::new(Self {
            reference: model.object_reference(&short),
            node: short,
            kind,
            entry_names,
            start_times,
            has_reuse,
            model: Arc::clone(model),
            clock,
            priority: AtomicI32::new(priority),
            reuse: AtomicBool::new(reuse),
            state: AtomicI32::new(ScheduleState::NotReady.code()),
            policy: AccessPolicy::default(),
            run: Mutex::new(RunState::default()),
            listeners: RwLock::new(Vec::new()),
            storage,
        });

        schedule.install_handlers();
        schedule.publish_initial();

        info!(
            schedule = %schedule.reference,
            kind = ?kind,
            entries = schedule.entry_names.len(),
            start_times = schedule.start_times.len(),
            "found schedule"
        );

        Some(schedule)
    }

    /// Full object reference (IED name included).
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Reference without the IED name, `<ld>/<ln>`.
    pub fn short_reference(&self) -> &str {
        &self.node
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn state(&self) -> ScheduleState {
        ScheduleState::from_code(self.state.load(Ordering::Acquire))
            .unwrap_or(ScheduleState::NotReady)
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn reuse(&self) -> bool {
        self.reuse.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Cached next start time, 0 when none is pending.
    pub fn next_start_time(&self) -> u64 {
        self.run.lock().next_start
    }

    /// Last published enable diagnostic.
    pub fn enable_error(&self) -> Option<EnableError> {
        self.model
            .get_int(&self.path("SchdEnaErr.stVal"))
            .and_then(EnableError::from_code)
    }

    /// Number of entry objects the node declares.
    pub fn capacity(&self) -> usize {
        self.entry_names.len()
    }

    /// Configured entry count, `NumEntr.setVal`.
    pub fn configured_entries(&self) -> i32 {
        self.model.get_int(&self.path("NumEntr.setVal")).unwrap_or(0)
    }

    /// Entry interval derived from `SchdIntv`.
    pub fn interval_ms(&self) -> Option<u64> {
        let set_val = self.model.get_int(&self.path("SchdIntv.setVal"))?;
        interval::interval_ms(
            set_val,
            self.model.get_int(&self.path("SchdIntv.units.SIUnit")),
            self.model.get_int(&self.path("SchdIntv.units.multiplier")),
        )
    }

    /// Value of entry `index` (1-based), in the published shape.
    pub fn entry_value(&self, index: usize) -> Option<Value> {
        let (attr, _) = self.entry_attribute(index)?;
        self.kind.normalize(self.model.get(&attr)?)
    }

    /// Current `(id, time)` of every start-time slot.
    pub fn start_times(&self) -> Vec<(String, u64)> {
        self.start_times
            .iter()
            .map(|slot| {
                let time = self.model.get_time(&slot.attribute).unwrap_or(0);
                (slot.id.clone(), time)
            })
            .collect()
    }

    /// 1-based entry currently published while running.
    pub fn active_entry(&self) -> Option<usize> {
        let run = self.run.lock();
        if self.state() == ScheduleState::Running && run.current_entry >= 0 {
            usize::try_from(run.current_entry).ok().map(|i| i + 1)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            reference: self.reference.clone(),
            kind: self.kind,
            state: self.state(),
            priority: self.priority(),
            reuse: self.reuse(),
            next_start_ms: self.next_start_time(),
            active_entry: self.active_entry(),
            enable_error: self.enable_error(),
            remote_control: self.policy.remote_control(),
        }
    }

    /// Registers a listener. Duplicate registrations are ignored.
    pub fn add_listener(&self, listener: Weak<dyn ScheduleListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Weak::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Weak<dyn ScheduleListener>) {
        self.listeners
            .write()
            .retain(|l| !Weak::ptr_eq(l, listener) && l.strong_count() > 0);
    }

    /// Validates the configuration and moves to READY.
    ///
    /// Enabling a READY or RUNNING schedule is accepted without effect.
    /// On failure the diagnostic is published and the schedule stays
    /// NOT_READY.
    pub fn enable(&self) -> bool {
        let now = self.clock.now_ms();
        let (accepted, changed) = {
            let mut run = self.run.lock();
            match self.state() {
                ScheduleState::Ready | ScheduleState::Running => return true,
                ScheduleState::NotReady | ScheduleState::StartTimeRequired => {}
            }

            self.activate(&mut run, now)
        };

        if accepted {
            info!(schedule = %self.reference, "schedule enabled");
        }
        if changed {
            self.notify_state();
            self.persist();
        }
        accepted
    }

    /// Moves to NOT_READY from any state and clears the run indicators.
    pub fn disable(&self) {
        let now = self.clock.now_ms();
        let changed = {
            let mut run = self.run.lock();
            *run = RunState::default();
            self.model.update(|tx| {
                self.publish_time(tx, "NxtStrTm", 0, now);
                self.publish_time(tx, "ActStrTm", 0, now);
                self.clear_run_outputs(tx, now);
            });
            self.set_state(ScheduleState::NotReady, now)
        };

        if changed {
            info!(schedule = %self.reference, "schedule disabled");
            self.notify_state();
            self.persist();
        }
    }

    /// Updates the priority locally and re-triggers arbitration.
    pub fn set_priority(&self, priority: i32) {
        self.apply_priority(priority);
        self.persist();
    }

    pub fn set_reuse(&self, reuse: bool) {
        self.apply_reuse(reuse);
        self.persist();
    }

    /// Advances the state machine to `now`.
    pub fn tick(&self, now: u64) {
        let mut events = TickEvents::default();
        {
            let mut run = self.run.lock();
            if self.state() == ScheduleState::Ready {
                self.tick_ready(&mut run, now, &mut events);
            }
            if self.state() == ScheduleState::Running {
                self.tick_running(&mut run, now, &mut events);
            }
        }

        if events.state_changed {
            self.notify_state();
        }
        if let Some((value, timestamp)) = events.value {
            for listener in self.listeners() {
                listener.value_updated(self, &value, timestamp);
            }
        }
        if events.state_changed {
            self.persist();
        }
    }

    pub(crate) fn tick_now(&self) {
        self.tick(self.clock.now_ms());
    }

    pub(crate) fn model(&self) -> &DataModel {
        &self.model
    }

    /// Short reference of `<node>.<path>`.
    pub(crate) fn path(&self, path: &str) -> String {
        format!("{}.{path}", self.node)
    }

    /// Value attribute of entry `index` and its declared kind.
    pub(crate) fn entry_attribute(&self, index: usize) -> Option<(String, ValueKind)> {
        let name = numbered_names(self.kind.entry_prefix(), index)
            .into_iter()
            .find(|candidate| self.entry_names.contains(candidate))?;

        self.kind.entry_attributes().iter().find_map(|attr| {
            let reference = self.path(&format!("{name}.{attr}"));
            self.model.kind_of(&reference).map(|kind| (reference, kind))
        })
    }

    pub(crate) fn start_time_attribute(&self, id: &str) -> Option<&str> {
        self.start_times
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.attribute.as_str())
    }

    pub(crate) fn apply_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
        self.model
            .set(&self.path("SchdPrio.setVal"), Value::Int(priority));
        debug!(schedule = %self.reference, priority, "priority updated");
        for listener in self.listeners() {
            listener.priority_updated(self);
        }
    }

    pub(crate) fn apply_reuse(&self, reuse: bool) {
        self.reuse.store(reuse, Ordering::Release);
        if self.has_reuse {
            self.model
                .set(&self.path("SchdReuse.setVal"), Value::Bool(reuse));
        }
    }

    /// Re-enables a restored schedule that was stored READY or RUNNING.
    ///
    /// The run epoch is not persisted, so the configuration is validated
    /// again as on enable. A schedule whose start times have all passed
    /// lands in NOT_READY with the diagnostic published.
    pub(crate) fn resume_enabled(&self) {
        let now = self.clock.now_ms();
        let (accepted, changed) = {
            let mut run = self.run.lock();
            *run = RunState::default();
            let outcome = self.activate(&mut run, now);
            if !outcome.0 {
                self.model.update(|tx| {
                    self.publish_time(tx, "NxtStrTm", 0, now);
                    self.publish_time(tx, "ActStrTm", 0, now);
                    self.clear_run_outputs(tx, now);
                });
            }
            outcome
        };

        if changed {
            self.notify_state();
        }
        if !accepted {
            warn!(schedule = %self.reference, "stored schedule no longer valid, left disabled");
        }
        if changed || !accepted {
            self.persist();
        }
    }

    /// Validates and moves to READY, or publishes the diagnostic and moves
    /// to NOT_READY. Returns `(accepted, state_changed)`.
    fn activate(&self, run: &mut RunState, now: u64) -> (bool, bool) {
        match self.validate(now) {
            Ok(mode) => {
                let next = match &mode {
                    TriggerMode::Time => self.find_next_start(now),
                    TriggerMode::Event { sync_input } => {
                        run.edge
                            .arm(self.model.get_bool(sync_input).unwrap_or(false));
                        0
                    }
                };
                run.mode = Some(mode);
                run.next_start = next;
                self.model.update(|tx| {
                    self.publish_enable_error(tx, EnableError::None, now);
                    self.publish_time(tx, "NxtStrTm", next, now);
                });
                (true, self.set_state(ScheduleState::Ready, now))
            }
            Err(err) => {
                self.model
                    .update(|tx| self.publish_enable_error(tx, err, now));
                warn!(schedule = %self.reference, error = %err, "cannot enable schedule");
                (false, self.set_state(ScheduleState::NotReady, now))
            }
        }
    }

    fn validate(&self, now: u64) -> Result<TriggerMode, EnableError> {
        let count = self
            .model
            .get_int(&self.path("NumEntr.setVal"))
            .filter(|n| *n > 0)
            .ok_or(EnableError::MissingValidNumEntr)?;

        self.interval_ms()
            .ok_or(EnableError::MissingValidSchdIntv)?;

        let count = usize::try_from(count).map_err(|_| EnableError::MissingValidNumEntr)?;
        if count > self.capacity() {
            return Err(EnableError::MissingValidNumEntr);
        }

        for index in 1..=count {
            let (attr, kind) = self
                .entry_attribute(index)
                .ok_or(EnableError::MissingValidScheduleValues)?;
            if !self.kind.accepts(kind) {
                return Err(EnableError::InconsistentValuesCdc);
            }
            match self.model.get(&attr) {
                Some(Value::Float(v)) if !v.is_finite() => {
                    return Err(EnableError::MissingValidScheduleValues);
                }
                None => return Err(EnableError::MissingValidScheduleValues),
                Some(_) => {}
            }
        }

        if self.event_triggered() {
            let sync_input = self.sync_input().ok_or(EnableError::Other)?;
            return Ok(TriggerMode::Event { sync_input });
        }

        if self.start_times.is_empty() {
            return Err(EnableError::Other);
        }
        if self.find_next_start(now) == 0 {
            return Err(EnableError::MissingValidStrTm);
        }
        Ok(TriggerMode::Time)
    }

    fn event_triggered(&self) -> bool {
        self.model
            .get_bool(&self.path("EvTrg.setVal"))
            .unwrap_or(false)
    }

    fn trigger_mode(&self) -> Option<TriggerMode> {
        if self.event_triggered() {
            self.sync_input()
                .map(|sync_input| TriggerMode::Event { sync_input })
        } else {
            Some(TriggerMode::Time)
        }
    }

    /// Resolves `InSyn.setSrcRef` to a boolean attribute.
    fn sync_input(&self) -> Option<String> {
        let source = self.model.get_str(&self.path("InSyn.setSrcRef"))?;
        let node = self
            .model
            .resolve(&source)
            .or_else(|| self.model.resolve(&format!("@{source}")))?;

        match node {
            NodeRef::Attribute {
                reference,
                kind: ValueKind::Bool,
            } => Some(reference),
            NodeRef::Object { reference } => {
                let st_val = format!("{reference}.stVal");
                (self.model.kind_of(&st_val) == Some(ValueKind::Bool)).then_some(st_val)
            }
            NodeRef::Attribute { .. } => None,
        }
    }

    fn find_next_start(&self, now: u64) -> u64 {
        trigger::next_start_time(
            now,
            self.start_times
                .iter()
                .filter_map(|slot| self.model.get_time(&slot.attribute)),
        )
    }

    fn tick_ready(&self, run: &mut RunState, now: u64, events: &mut TickEvents) {
        if run.mode.is_none() {
            run.mode = self.trigger_mode();
        }

        match run.mode.clone() {
            Some(TriggerMode::Event { sync_input }) => {
                let level = self.model.get_bool(&sync_input).unwrap_or(false);
                if run.edge.rising(level) {
                    self.start_run(run, now, now, false, events);
                }
            }
            Some(TriggerMode::Time) | None => {
                if run.next_start == 0 {
                    run.next_start = self.find_next_start(now);
                    if run.next_start != 0 {
                        let next = run.next_start;
                        self.model
                            .update(|tx| self.publish_time(tx, "NxtStrTm", next, now));
                    }
                }
                if run.next_start != 0 && now > run.next_start {
                    let start = run.next_start;
                    self.start_run(run, start, now, true, events);
                }
            }
        }
    }

    fn start_run(
        &self,
        run: &mut RunState,
        start: u64,
        now: u64,
        consume_start_time: bool,
        events: &mut TickEvents,
    ) {
        run.start_time = start;
        run.entry_duration_ms = self.interval_ms().unwrap_or(0);
        run.entry_count = usize::try_from(self.configured_entries()).unwrap_or(0);
        run.current_entry = ENTRY_UNASSIGNED;

        let next = if consume_start_time {
            self.model.update(|tx| {
                for slot in &self.start_times {
                    if tx.get(&slot.attribute) == Some(&Value::Time(start)) {
                        tx.set(&slot.attribute, Value::Time(0));
                    }
                }
            });
            self.find_next_start(now)
        } else {
            0
        };
        run.next_start = next;

        self.model.update(|tx| {
            self.publish_time(tx, "ActStrTm", start, now);
            self.publish_time(tx, "NxtStrTm", next, now);
        });

        events.state_changed |= self.set_state(ScheduleState::Running, now);
        info!(
            schedule = %self.reference,
            start,
            entries = run.entry_count,
            duration_ms = run.entry_duration_ms,
            "schedule running"
        );
    }

    fn tick_running(&self, run: &mut RunState, now: u64, events: &mut TickEvents) {
        let Some(idx) =
            interval::entry_index(now, run.start_time, run.entry_duration_ms, run.entry_count)
        else {
            self.end_run(run, now, events);
            return;
        };

        let idx_signed = i64::try_from(idx).unwrap_or(i64::MAX);
        if run.current_entry == idx_signed {
            return;
        }
        run.current_entry = idx_signed;

        let Some(value) = self.entry_value(idx + 1) else {
            warn!(schedule = %self.reference, entry = idx + 1, "entry value unavailable");
            return;
        };

        let mirror = self.path(self.kind.mirror_object());
        let entry_number = i32::try_from(idx + 1).unwrap_or(i32::MAX);
        self.model.update(|tx| {
            tx.set(
                &format!("{mirror}.{}", self.kind.mirror_attribute()),
                value.clone(),
            );
            tx.set_quality(&mirror, Quality::Good);
            tx.set_timestamp(&mirror, now);

            let entry = self.path("SchdEntr");
            tx.set(&format!("{entry}.stVal"), Value::Int(entry_number));
            tx.set_quality(&entry, Quality::Good);
            tx.set_timestamp(&entry, now);
        });

        debug!(schedule = %self.reference, entry = entry_number, %value, "entry active");
        events.value = Some((value, now));
    }

    fn end_run(&self, run: &mut RunState, now: u64, events: &mut TickEvents) {
        let (next_state, next) = match run.mode {
            Some(TriggerMode::Event { .. }) => (ScheduleState::Ready, 0),
            _ => match self.find_next_start(now) {
                0 => (ScheduleState::NotReady, 0),
                next => (ScheduleState::Ready, next),
            },
        };

        run.start_time = 0;
        run.current_entry = ENTRY_UNASSIGNED;
        run.next_start = next;
        if next_state == ScheduleState::NotReady {
            run.mode = None;
        }

        self.model.update(|tx| {
            self.publish_time(tx, "ActStrTm", 0, now);
            self.publish_time(tx, "NxtStrTm", next, now);
            self.clear_run_outputs(tx, now);
        });

        events.state_changed |= self.set_state(next_state, now);
        info!(schedule = %self.reference, next_state = %next_state, next, "schedule run finished");
    }

    /// Publishes the state attribute; returns whether the state changed.
    fn set_state(&self, state: ScheduleState, now: u64) -> bool {
        let previous = self.state.swap(state.code(), Ordering::AcqRel);
        let object = self.path("SchdSt");
        self.model.update(|tx| {
            tx.set(&format!("{object}.stVal"), Value::Int(state.code()));
            tx.set_quality(&object, Quality::Good);
            tx.set_timestamp(&object, now);
        });
        previous != state.code()
    }

    fn publish_time(&self, tx: &mut Transaction<'_>, object: &str, time: u64, now: u64) {
        let object = self.path(object);
        tx.set(&format!("{object}.stVal"), Value::Time(time));
        tx.set_quality(
            &object,
            if time != 0 {
                Quality::Good
            } else {
                Quality::Invalid
            },
        );
        tx.set_timestamp(&object, now);
    }

    fn publish_enable_error(&self, tx: &mut Transaction<'_>, err: EnableError, now: u64) {
        let object = self.path("SchdEnaErr");
        tx.set(&format!("{object}.stVal"), Value::Int(err.code()));
        tx.set_quality(&object, Quality::Good);
        tx.set_timestamp(&object, now);
    }

    fn clear_run_outputs(&self, tx: &mut Transaction<'_>, now: u64) {
        let entry = self.path("SchdEntr");
        tx.set(&format!("{entry}.stVal"), Value::Int(0));
        tx.set_timestamp(&entry, now);

        let mirror = self.path(self.kind.mirror_object());
        tx.set_quality(&mirror, Quality::Invalid);
        tx.set_timestamp(&mirror, now);
    }

    fn publish_initial(&self) {
        let now = self.clock.now_ms();
        self.model.update(|tx| {
            let object = self.path("SchdSt");
            tx.set(
                &format!("{object}.stVal"),
                Value::Int(ScheduleState::NotReady.code()),
            );
            tx.set_quality(&object, Quality::Good);
            tx.set_timestamp(&object, now);

            self.publish_time(tx, "NxtStrTm", 0, now);
            self.publish_time(tx, "ActStrTm", 0, now);
            self.clear_run_outputs(tx, now);
        });
    }

    fn listeners(&self) -> Vec<Arc<dyn ScheduleListener>> {
        self.listeners
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn notify_state(&self) {
        for listener in self.listeners() {
            listener.state_updated(self);
        }
    }

    pub(crate) fn persist(&self) {
        if let Some(backend) = self.storage.backend() {
            if let Err(err) = storage::save_schedule(backend.as_ref(), self) {
                warn!(schedule = %self.reference, error = %err, "failed to persist schedule");
            }
        }
    }

    fn install_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.model.set_write_handler(
            &self.path("SchdPrio.setVal"),
            Arc::new(move |_: &str, value: &Value| {
                weak.upgrade()
                    .ok_or(DataAccessError::ObjectUndefined)?
                    .on_priority_write(value)
            }),
        );

        if self.has_reuse {
            let weak = Arc::downgrade(self);
            self.model.set_write_handler(
                &self.path("SchdReuse.setVal"),
                Arc::new(move |_: &str, value: &Value| {
                    weak.upgrade()
                        .ok_or(DataAccessError::ObjectUndefined)?
                        .on_reuse_write(value)
                }),
            );
        }

        for slot in &self.start_times {
            let weak = Arc::downgrade(self);
            self.model.set_write_handler(
                &slot.attribute,
                Arc::new(move |attr: &str, value: &Value| {
                    weak.upgrade()
                        .ok_or(DataAccessError::ObjectUndefined)?
                        .on_start_time_write(attr, value)
                }),
            );
        }

        for object in ["EnaReq", "DsaReq"] {
            let check = Arc::downgrade(self);
            let operate = Arc::downgrade(self);
            self.model.set_control_handlers(
                &self.path(object),
                Arc::new(move |action: &ControlAction<'_>| match check.upgrade() {
                    Some(schedule) => schedule.check_control(action),
                    None => CheckResult::ObjectUndefined,
                }),
                Arc::new(move |action: &ControlAction<'_>| match operate.upgrade() {
                    Some(schedule) => schedule.operate_control(action),
                    None => ControlResult::Failed,
                }),
            );
        }
    }

    fn on_priority_write(&self, value: &Value) -> Result<(), DataAccessError> {
        if !self.policy.write_allowed(ScheduleParameter::Priority) {
            return Err(DataAccessError::AccessDenied);
        }
        let priority = value.as_int().ok_or(DataAccessError::ValueInvalid)?;
        info!(schedule = %self.reference, priority, "priority write accepted");
        self.set_priority(priority);
        Ok(())
    }

    fn on_reuse_write(&self, value: &Value) -> Result<(), DataAccessError> {
        if !self.policy.write_allowed(ScheduleParameter::Reuse) {
            return Err(DataAccessError::AccessDenied);
        }
        let reuse = value.as_bool().ok_or(DataAccessError::ValueInvalid)?;
        self.set_reuse(reuse);
        Ok(())
    }

    fn on_start_time_write(&self, attr: &str, value: &Value) -> Result<(), DataAccessError> {
        if !self.policy.write_allowed(ScheduleParameter::StartTime) {
            return Err(DataAccessError::AccessDenied);
        }
        let time = value.as_time().ok_or(DataAccessError::ValueInvalid)?;
        let now = self.clock.now_ms();
        if time <= now {
            warn!(schedule = %self.reference, attribute = %attr, time, "start time not in the future");
            return Err(DataAccessError::ValueInvalid);
        }

        self.model.set(attr, Value::Time(time));
        info!(schedule = %self.reference, attribute = %attr, time, "start time accepted");

        {
            let mut run = self.run.lock();
            let time_driven = !matches!(run.mode, Some(TriggerMode::Event { .. }));
            if self.state() == ScheduleState::Ready && time_driven {
                let next = self.find_next_start(now);
                run.next_start = next;
                self.model
                    .update(|tx| self.publish_time(tx, "NxtStrTm", next, now));
            }
        }

        self.persist();
        Ok(())
    }

    fn check_control(&self, action: &ControlAction<'_>) -> CheckResult {
        if action.ctl_val && !action.test && !self.policy.remote_control() {
            return CheckResult::AccessDenied;
        }
        CheckResult::Accepted
    }

    fn operate_control(&self, action: &ControlAction<'_>) -> ControlResult {
        if !action.ctl_val || action.test {
            return ControlResult::Ok;
        }

        if action.object == self.path("EnaReq") {
            if self.enable() {
                ControlResult::Ok
            } else {
                ControlResult::Failed
            }
        } else if action.object == self.path("DsaReq") {
            self.disable();
            ControlResult::Ok
        } else {
            ControlResult::Failed
        }
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedule")
            .field("reference", &self.reference)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish()
    }
}
