//! Mapping between live schedules/controllers and their stored documents.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{StorageBackend, document_key};
use crate::controller::ScheduleController;
use crate::error::{Result, SchedulerError};
use crate::model::{Value, ValueKind};
use crate::schedule::interval::encode_interval;
use crate::schedule::{Schedule, ScheduleState};

/// An entry value as stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StoredValue {
    Bool(bool),
    Float(f32),
    Int(i32),
}

impl StoredValue {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(StoredValue::Bool(*b)),
            Value::Float(f) => Some(StoredValue::Float(*f)),
            Value::Int(i) => Some(StoredValue::Int(*i)),
            _ => None,
        }
    }

    /// Converts into an attribute of `kind`, if representable.
    fn to_value(self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (StoredValue::Bool(b), ValueKind::Bool) => Some(Value::Bool(b)),
            (StoredValue::Float(f), ValueKind::Float) => Some(Value::Float(f)),
            (StoredValue::Int(i), ValueKind::Float) => Some(Value::Float(i as f32)),
            (StoredValue::Int(i), ValueKind::Int) => Some(Value::Int(i)),
            (StoredValue::Float(f), ValueKind::Int) if f.fract() == 0.0 => {
                Some(Value::Int(f as i32))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStartTime {
    pub id: String,
    pub time: u64,
}

/// Persisted configuration of one schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDocument {
    pub obj_ref: String,
    /// State code, see [`ScheduleState::code`].
    pub state: i32,
    #[serde(default)]
    pub reuse: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub num_entr: i32,
    /// Entry interval; 0 when none is configured.
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub values: Vec<StoredValue>,
    #[serde(default)]
    pub start_times: Vec<StoredStartTime>,
}

impl ScheduleDocument {
    /// Captures the live configuration of `schedule`.
    pub fn capture(schedule: &Schedule) -> Self {
        let values = (1..=schedule.capacity())
            .map_while(|index| {
                let (attr, _) = schedule.entry_attribute(index)?;
                schedule.model().get(&attr)
            })
            .filter_map(|value| StoredValue::from_value(&value))
            .collect();

        Self {
            obj_ref: schedule.reference().to_string(),
            state: schedule.state().code(),
            reuse: schedule.reuse(),
            priority: schedule.priority(),
            num_entr: schedule.configured_entries(),
            interval_ms: schedule.interval_ms().unwrap_or(0),
            values,
            start_times: schedule
                .start_times()
                .into_iter()
                .map(|(id, time)| StoredStartTime { id, time })
                .collect(),
        }
    }

    /// Applies the document to `schedule`, state last.
    ///
    /// Fields that do not fit the schedule's model are logged and skipped.
    pub fn apply(&self, schedule: &Schedule) {
        let model = schedule.model();

        schedule.apply_priority(self.priority);
        schedule.apply_reuse(self.reuse);
        model.set(&schedule.path("NumEntr.setVal"), Value::Int(self.num_entr));

        if self.interval_ms > 0 && schedule.interval_ms() != Some(self.interval_ms) {
            self.apply_interval(schedule);
        }

        for (i, stored) in self.values.iter().enumerate() {
            let index = i + 1;
            let converted = schedule
                .entry_attribute(index)
                .and_then(|(attr, kind)| stored.to_value(kind).map(|value| (attr, value)));
            match converted {
                Some((attr, value)) => {
                    model.set(&attr, value);
                }
                None => {
                    warn!(schedule = %schedule.reference(), entry = index, "stored value does not fit entry");
                }
            }
        }

        for start in &self.start_times {
            match schedule.start_time_attribute(&start.id) {
                Some(attr) => {
                    model.set(attr, Value::Time(start.time));
                }
                None => {
                    warn!(schedule = %schedule.reference(), id = %start.id, "unknown start time slot");
                }
            }
        }

        match ScheduleState::from_code(self.state) {
            Some(ScheduleState::Ready | ScheduleState::Running) => schedule.resume_enabled(),
            Some(ScheduleState::NotReady | ScheduleState::StartTimeRequired) => {
                schedule.disable();
            }
            None => {
                warn!(schedule = %schedule.reference(), state = self.state, "unknown stored state");
                schedule.disable();
            }
        }
    }

    fn apply_interval(&self, schedule: &Schedule) {
        let Some((set_val, unit, multiplier)) = encode_interval(self.interval_ms) else {
            warn!(schedule = %schedule.reference(), interval_ms = self.interval_ms, "interval cannot be encoded");
            return;
        };

        let model = schedule.model();
        model.update(|tx| {
            tx.set(&schedule.path("SchdIntv.setVal"), Value::Int(set_val));
            tx.set(&schedule.path("SchdIntv.units.SIUnit"), Value::Int(unit));
            tx.set(
                &schedule.path("SchdIntv.units.multiplier"),
                Value::Int(multiplier),
            );
        });

        if schedule.interval_ms() != Some(self.interval_ms) {
            warn!(
                schedule = %schedule.reference(),
                interval_ms = self.interval_ms,
                "interval units not writable, stored interval not reproduced"
            );
        }
    }
}

/// One controller slot binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBinding {
    pub id: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Persisted configuration of one schedule controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDocument {
    pub obj_ref: String,
    #[serde(default)]
    pub ctl_ent: String,
    #[serde(default)]
    pub schedules: Vec<StoredBinding>,
}

impl ControllerDocument {
    pub fn capture(controller: &ScheduleController) -> Self {
        Self {
            obj_ref: controller.reference().to_string(),
            ctl_ent: controller.controlled_entity().unwrap_or_default(),
            schedules: controller
                .bindings()
                .into_iter()
                .map(|binding| StoredBinding {
                    id: binding.slot,
                    reference: binding.schedule.unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Rebinds through the same checks as remote writes. Rejected entries
    /// are logged and skipped.
    pub fn apply(&self, controller: &ScheduleController) {
        if !self.ctl_ent.is_empty() {
            if let Err(err) = controller.assign_controlled_entity(&self.ctl_ent) {
                warn!(controller = %controller.reference(), target = %self.ctl_ent, error = %err, "stored controlled entity rejected");
            }
        }

        for binding in &self.schedules {
            if let Err(err) = controller.assign(&binding.id, &binding.reference) {
                warn!(
                    controller = %controller.reference(),
                    slot = %binding.id,
                    schedule = %binding.reference,
                    error = %err,
                    "stored binding rejected"
                );
            }
        }
        controller.arbitrate();
    }
}

fn save_document<T: Serialize>(
    backend: &dyn StorageBackend,
    reference: &str,
    document: &T,
) -> Result<()> {
    let key = document_key(reference);
    let value = serde_json::to_value(document).map_err(|source| SchedulerError::Document {
        key: key.clone(),
        source,
    })?;
    backend.save(&key, &value)
}

fn load_document<T: for<'de> Deserialize<'de>>(
    backend: &dyn StorageBackend,
    reference: &str,
) -> Result<Option<T>> {
    let key = document_key(reference);
    match backend.load(&key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| SchedulerError::Document { key, source }),
        None => Ok(None),
    }
}

/// Stores the live configuration of `schedule`.
///
/// # Errors
///
/// Returns the backend's error, or [`SchedulerError::Document`] if the
/// document cannot be encoded.
pub fn save_schedule(backend: &dyn StorageBackend, schedule: &Schedule) -> Result<()> {
    save_document(
        backend,
        schedule.reference(),
        &ScheduleDocument::capture(schedule),
    )
}

pub fn save_controller(backend: &dyn StorageBackend, controller: &ScheduleController) -> Result<()> {
    save_document(
        backend,
        controller.reference(),
        &ControllerDocument::capture(controller),
    )
}

/// Applies the stored document of `schedule`, or stores the current
/// configuration when there is none yet. Failures are logged.
pub fn restore_schedule(backend: &dyn StorageBackend, schedule: &Schedule) {
    match load_document::<ScheduleDocument>(backend, schedule.reference()) {
        Ok(Some(document)) => {
            document.apply(schedule);
            info!(schedule = %schedule.reference(), state = %schedule.state(), "schedule restored");
        }
        Ok(None) => {
            if let Err(err) = save_schedule(backend, schedule) {
                warn!(schedule = %schedule.reference(), error = %err, "failed to store initial schedule document");
            }
        }
        Err(err) => {
            warn!(schedule = %schedule.reference(), error = %err, "failed to load schedule document");
        }
    }
}

pub fn restore_controller(backend: &dyn StorageBackend, controller: &ScheduleController) {
    match load_document::<ControllerDocument>(backend, controller.reference()) {
        Ok(Some(document)) => {
            document.apply(controller);
            info!(controller = %controller.reference(), "controller restored");
        }
        Ok(None) => {
            if let Err(err) = save_controller(backend, controller) {
                warn!(controller = %controller.reference(), error = %err, "failed to store initial controller document");
            }
        }
        Err(err) => {
            warn!(controller = %controller.reference(), error = %err, "failed to load controller document");
        }
    }
}
