//! Schedule controllers: arbitration between bound schedules and
//! propagation of the winner's values to the controlled entity.

use std::ptr;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::model::{
    DataAccessError, DataModel, LogicalDevice, LogicalNode, NodeRef, Quality, Transaction, Value,
    ValueKind,
};
use crate::schedule::{Schedule, ScheduleListener, ScheduleState, TargetKind, is_numbered};
use crate::scheduler::ReferenceIndex;
use crate::storage::{self, SharedStorage};

/// Value attributes a controlled data object may carry, in lookup order.
const ENTITY_VALUE_ATTRIBUTES: [&str; 3] = ["mag.f", "mag.i", "stVal"];

/// A value published to a controlled entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetValueChange {
    /// Full reference of the controller that published the value.
    pub controller: String,
    /// Controlled entity reference as configured, empty if none is set.
    pub target: String,
    pub value: Value,
    pub quality: Quality,
    pub timestamp_ms: u64,
}

/// Callback receiving every target value change.
pub type TargetValueHandler = Arc<dyn Fn(&TargetValueChange) + Send + Sync>;

pub(crate) type TargetHandlerSlot = Arc<RwLock<Option<TargetValueHandler>>>;

/// One binding slot of a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotBinding {
    /// Slot object name, e.g. `Schd01`.
    pub slot: String,
    /// Full reference of the bound schedule.
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub reference: String,
    pub active_schedule: Option<String>,
    pub controlled_entity: Option<String>,
    pub bindings: Vec<SlotBinding>,
}

#[derive(Debug, Clone)]
struct ControlledEntity {
    reference: String,
    value_attr: String,
    kind: ValueKind,
    object: String,
}

#[derive(Default)]
struct ControllerState {
    bindings: Vec<Option<Arc<Schedule>>>,
    active: Option<Arc<Schedule>>,
    entity: Option<ControlledEntity>,
}

/// Arbitrates between the schedules bound to one controller node.
pub struct ScheduleController {
    reference: String,
    node: String,
    mirror: Option<TargetKind>,
    slots: Vec<String>,
    model: Arc<DataModel>,
    clock: Arc<dyn Clock>,
    schedules: Arc<ReferenceIndex<Schedule>>,
    inner: Mutex<ControllerState>,
    target_handler: TargetHandlerSlot,
    storage: SharedStorage,
    this: Weak<ScheduleController>,
}

impl ScheduleController {
    /// Builds a controller for `node`, binds it from the live attribute
    /// values and runs a first arbitration.
    ///
    /// Returns `None` if the node lacks `ActSchdRef` or `CtlEnt`.
    pub(crate) fn create(
        model: &Arc<DataModel>,
        device: &LogicalDevice,
        node: &LogicalNode,
        clock: Arc<dyn Clock>,
        schedules: Arc<ReferenceIndex<Schedule>>,
        target_handler: TargetHandlerSlot,
        storage: SharedStorage,
    ) -> Option<Arc<Self>> {
        let short = format!("{}/{}", device.inst, node.name);
        if !node.has("ActSchdRef") || !node.has("CtlEnt.setSrcRef") {
            warn!(node = %short, "not a schedule controller, ActSchdRef or CtlEnt missing");
            return None;
        }

        let slots: Vec<String> = node
            .objects
            .iter()
            .filter(|o| is_numbered(&o.name, "Schd") && o.attribute("setSrcRef").is_some())
            .map(|o| o.name.clone())
            .collect();

        let controller = Arc::new_cyclic(|this| Self {
            reference: model.object_reference(&short),
            node: short,
            mirror: TargetKind::detect(node),
            inner: Mutex::new(ControllerState {
                bindings: vec![None; slots.len()],
                ..ControllerState::default()
            }),
            slots,
            model: Arc::clone(model),
            clock,
            schedules,
            target_handler,
            storage,
            this: this.clone(),
        });

        controller.install_handlers();
        controller.initialize();

        info!(
            controller = %controller.reference,
            slots = controller.slots.len(),
            "found schedule controller"
        );
        Some(controller)
    }

    /// Full object reference (IED name included).
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Reference without the IED name, `<ld>/<ln>`.
    pub fn short_reference(&self) -> &str {
        &self.node
    }

    /// Slot bindings in slot order.
    pub fn bindings(&self) -> Vec<SlotBinding> {
        let inner = self.inner.lock();
        self.slots
            .iter()
            .zip(&inner.bindings)
            .map(|(slot, bound)| SlotBinding {
                slot: slot.clone(),
                schedule: bound.as_ref().map(|s| s.reference().to_string()),
            })
            .collect()
    }

    /// Controlled entity reference as configured.
    pub fn controlled_entity(&self) -> Option<String> {
        self.inner
            .lock()
            .entity
            .as_ref()
            .map(|e| e.reference.clone())
    }

    pub fn active_schedule(&self) -> Option<Arc<Schedule>> {
        self.inner.lock().active.clone()
    }

    /// Controlled entity reference and its current value.
    pub fn target_value(&self) -> Option<(String, Value)> {
        let entity = self.inner.lock().entity.clone()?;
        let value = self.model.get(&entity.value_attr)?;
        Some((entity.reference, value))
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            reference: self.reference.clone(),
            active_schedule: self.active_schedule().map(|s| s.reference().to_string()),
            controlled_entity: self.controlled_entity(),
            bindings: self.bindings(),
        }
    }

    /// Binds `reference` into slot `slot_id`; an empty reference clears the
    /// slot.
    ///
    /// # Errors
    ///
    /// [`DataAccessError::ObjectUndefined`] for an unknown slot and
    /// [`DataAccessError::ValueInvalid`] if the schedule is unknown or
    /// already bound in another slot.
    pub fn assign(&self, slot_id: &str, reference: &str) -> Result<(), DataAccessError> {
        let slot = self
            .slots
            .iter()
            .position(|s| s == slot_id)
            .ok_or(DataAccessError::ObjectUndefined)?;

        let schedule = if reference.is_empty() {
            None
        } else {
            let schedule = self.schedules.lookup(reference).cloned();
            if schedule.is_none() {
                warn!(controller = %self.reference, slot = %slot_id, schedule = %reference, "unknown schedule");
            }
            Some(schedule.ok_or(DataAccessError::ValueInvalid)?)
        };

        {
            let mut inner = self.inner.lock();
            if let Some(schedule) = &schedule {
                let bound_elsewhere = inner.bindings.iter().enumerate().any(|(i, bound)| {
                    i != slot && bound.as_ref().is_some_and(|b| Arc::ptr_eq(b, schedule))
                });
                if bound_elsewhere {
                    warn!(controller = %self.reference, slot = %slot_id, schedule = %reference, "schedule already bound");
                    return Err(DataAccessError::ValueInvalid);
                }
            }

            let previous = std::mem::replace(&mut inner.bindings[slot], schedule.clone());
            if let Some(previous) = previous {
                let still_bound = inner
                    .bindings
                    .iter()
                    .flatten()
                    .any(|b| Arc::ptr_eq(b, &previous));
                if !still_bound {
                    previous.remove_listener(&self.listener());
                }
            }
            if let Some(schedule) = &schedule {
                schedule.add_listener(self.listener());
            }
        }

        self.model.set(
            &format!("{}.{slot_id}.setSrcRef", self.node),
            Value::Str(reference.to_string()),
        );
        debug!(controller = %self.reference, slot = %slot_id, schedule = %reference, "slot bound");
        self.arbitrate();
        Ok(())
    }

    /// Sets the controlled entity. `reference` must name a data object
    /// with a value attribute, or a value attribute itself.
    ///
    /// # Errors
    ///
    /// [`DataAccessError::ValueInvalid`] if the reference does not resolve
    /// to a value-bearing node.
    pub fn assign_controlled_entity(&self, reference: &str) -> Result<(), DataAccessError> {
        let entity = match self.model.resolve(reference) {
            Some(NodeRef::Object { reference: object }) => {
                let (value_attr, kind) = ENTITY_VALUE_ATTRIBUTES
                    .iter()
                    .find_map(|attr| {
                        let path = format!("{object}.{attr}");
                        self.model.kind_of(&path).map(|kind| (path, kind))
                    })
                    .ok_or(DataAccessError::ValueInvalid)?;
                ControlledEntity {
                    reference: reference.to_string(),
                    value_attr,
                    kind,
                    object,
                }
            }
            Some(NodeRef::Attribute {
                reference: value_attr,
                kind: kind @ (ValueKind::Bool | ValueKind::Int | ValueKind::Float),
            }) => ControlledEntity {
                reference: reference.to_string(),
                object: object_of(&value_attr).to_string(),
                value_attr,
                kind,
            },
            Some(NodeRef::Attribute { .. }) | None => {
                warn!(controller = %self.reference, target = %reference, "not a value-bearing reference");
                return Err(DataAccessError::ValueInvalid);
            }
        };

        debug!(controller = %self.reference, target = %entity.reference, attribute = %entity.value_attr, "controlled entity set");
        self.inner.lock().entity = Some(entity);
        self.model.set(
            &format!("{}.CtlEnt.setSrcRef", self.node),
            Value::Str(reference.to_string()),
        );
        Ok(())
    }

    /// Picks the active schedule among the bound RUNNING ones.
    ///
    /// The strictly highest priority wins; on a tie the earlier slot keeps
    /// it. A change of winner clears the published value until the new
    /// schedule reports one.
    pub(crate) fn arbitrate(&self) {
        let now = self.clock.now_ms();
        let cleared = {
            let mut inner = self.inner.lock();
            let winner = select_active(&inner.bindings);
            let changed = match (&inner.active, &winner) {
                (Some(active), Some(winner)) => !Arc::ptr_eq(active, winner),
                (None, None) => false,
                _ => true,
            };

            self.model.update(|tx| {
                let act = format!("{}.ActSchdRef", self.node);
                match &winner {
                    None => {
                        tx.set(&format!("{act}.stVal"), Value::Str(String::new()));
                        tx.set_quality(&act, Quality::Invalid);
                        tx.set_timestamp(&act, now);
                        self.clear_values(tx, inner.entity.as_ref(), now);
                    }
                    Some(winner) if changed => {
                        tx.set(
                            &format!("{act}.stVal"),
                            Value::Str(winner.reference().to_string()),
                        );
                        tx.set_quality(&act, Quality::Good);
                        tx.set_timestamp(&act, now);
                        self.clear_values(tx, inner.entity.as_ref(), now);
                    }
                    Some(_) => {}
                }
            });

            if !changed {
                return;
            }
            match &winner {
                Some(w) => info!(controller = %self.reference, schedule = %w.reference(), priority = w.priority(), "active schedule changed"),
                None => info!(controller = %self.reference, "no active schedule"),
            }
            inner.active = winner;

            inner.entity.as_ref().and_then(|entity| {
                let value = self.model.get(&entity.value_attr)?;
                Some(TargetValueChange {
                    controller: self.reference.clone(),
                    target: entity.reference.clone(),
                    value,
                    quality: Quality::Invalid,
                    timestamp_ms: now,
                })
            })
        };

        if let Some(change) = cleared {
            self.emit(&change);
        }
    }

    fn clear_values(&self, tx: &mut Transaction<'_>, entity: Option<&ControlledEntity>, now: u64) {
        if let Some(kind) = self.mirror {
            let mirror = format!("{}.{}", self.node, kind.mirror_object());
            tx.set_quality(&mirror, Quality::Invalid);
            tx.set_timestamp(&mirror, now);
        }
        if let Some(entity) = entity {
            tx.set_quality(&entity.object, Quality::Invalid);
            tx.set_timestamp(&entity.object, now);
        }
    }

    fn emit(&self, change: &TargetValueChange) {
        let handler = self.target_handler.read().clone();
        if let Some(handler) = handler {
            handler(change);
        }
    }

    fn listener(&self) -> Weak<dyn ScheduleListener> {
        self.this.clone()
    }

    fn initialize(&self) {
        let ctl_ent = self
            .model
            .get_str(&format!("{}.CtlEnt.setSrcRef", self.node))
            .filter(|r| !r.is_empty());
        if let Some(target) = ctl_ent {
            if let Err(err) = self.assign_controlled_entity(&target) {
                warn!(controller = %self.reference, target = %target, error = %err, "configured controlled entity rejected");
            }
        }

        for slot in &self.slots {
            let bound = self
                .model
                .get_str(&format!("{}.{slot}.setSrcRef", self.node))
                .filter(|r| !r.is_empty());
            if let Some(reference) = bound {
                if let Err(err) = self.assign(slot, &reference) {
                    warn!(controller = %self.reference, slot = %slot, schedule = %reference, error = %err, "configured binding rejected");
                }
            }
        }

        self.arbitrate();
    }

    pub(crate) fn persist(&self) {
        if let Some(backend) = self.storage.backend() {
            if let Err(err) = storage::save_controller(backend.as_ref(), self) {
                warn!(controller = %self.reference, error = %err, "failed to persist controller");
            }
        }
    }

    fn install_handlers(&self) {
        let weak = self.this.clone();
        self.model.set_write_handler(
            &format!("{}.CtlEnt.setSrcRef", self.node),
            Arc::new(move |_: &str, value: &Value| {
                let controller = weak.upgrade().ok_or(DataAccessError::ObjectUndefined)?;
                let reference = value.as_str().ok_or(DataAccessError::ValueInvalid)?;
                controller.assign_controlled_entity(reference)?;
                controller.persist();
                Ok(())
            }),
        );

        for slot in &self.slots {
            let weak = self.this.clone();
            let slot_id = slot.clone();
            self.model.set_write_handler(
                &format!("{}.{slot}.setSrcRef", self.node),
                Arc::new(move |_: &str, value: &Value| {
                    let controller = weak.upgrade().ok_or(DataAccessError::ObjectUndefined)?;
                    let reference = value.as_str().ok_or(DataAccessError::ValueInvalid)?;
                    controller.assign(&slot_id, reference)?;
                    controller.persist();
                    Ok(())
                }),
            );
        }
    }
}

impl ScheduleListener for ScheduleController {
    fn priority_updated(&self, _schedule: &Schedule) {
        self.arbitrate();
    }

    fn state_updated(&self, _schedule: &Schedule) {
        self.arbitrate();
    }

    fn value_updated(&self, schedule: &Schedule, value: &Value, timestamp_ms: u64) {
        let change = {
            let inner = self.inner.lock();
            let is_active = inner
                .active
                .as_ref()
                .is_some_and(|active| ptr::eq(Arc::as_ptr(active), schedule));
            if !is_active {
                trace!(controller = %self.reference, schedule = %schedule.reference(), "value from inactive schedule dropped");
                return;
            }

            // A value the target cannot hold leaves it invalid, not stale.
            let quality = self.model.update(|tx| {
                if let Some(kind) = self.mirror {
                    let mirror = format!("{}.{}", self.node, kind.mirror_object());
                    let q = match value.convert_to(kind.value_kind()) {
                        Some(v) => {
                            tx.set(&format!("{mirror}.{}", kind.mirror_attribute()), v);
                            Quality::Good
                        }
                        None => Quality::Invalid,
                    };
                    tx.set_quality(&mirror, q);
                    tx.set_timestamp(&mirror, timestamp_ms);
                }
                let Some(entity) = &inner.entity else {
                    return Quality::Good;
                };
                let q = match value.convert_to(entity.kind) {
                    Some(v) => {
                        tx.set(&entity.value_attr, v);
                        Quality::Good
                    }
                    None => {
                        warn!(controller = %self.reference, target = %entity.reference, %value, "value does not fit controlled entity");
                        Quality::Invalid
                    }
                };
                tx.set_quality(&entity.object, q);
                tx.set_timestamp(&entity.object, timestamp_ms);
                q
            });

            TargetValueChange {
                controller: self.reference.clone(),
                target: inner
                    .entity
                    .as_ref()
                    .map(|e| e.reference.clone())
                    .unwrap_or_default(),
                value: value.clone(),
                quality,
                timestamp_ms,
            }
        };

        self.emit(&change);
    }
}

impl std::fmt::Debug for ScheduleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleController")
            .field("reference", &self.reference)
            .field("slots", &self.slots)
            .finish()
    }
}

fn select_active(bindings: &[Option<Arc<Schedule>>]) -> Option<Arc<Schedule>> {
    let mut best: Option<&Arc<Schedule>> = None;
    for schedule in bindings
        .iter()
        .flatten()
        .filter(|s| s.state() == ScheduleState::Running)
    {
        if best.is_none_or(|b| schedule.priority() > b.priority()) {
            best = Some(schedule);
        }
    }
    best.cloned()
}

/// `<ld>/<ln>.<do>` part of an attribute reference.
fn object_of(attribute: &str) -> &str {
    let Some(node_end) = attribute.find('.') else {
        return attribute;
    };
    match attribute[node_end + 1..].find('.') {
        Some(offset) => &attribute[..node_end + 1 + offset],
        None => attribute,
    }
}
