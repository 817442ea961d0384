//! In-memory information model and attribute store.
//!
//! The model is a fixed tree of logical devices, logical nodes, data
//! objects and attributes, built once with [`ModelBuilder`]. Attribute
//! values live in a single lock-guarded table so that a group of related
//! updates (value, quality, timestamp) can be published atomically through
//! [`DataModel::update`].
//!
//! References come in two forms:
//! - short: `<ld>/<ln>.<do>[.<attr>]`, used internally as table keys
//! - full: the short form prefixed with the IED name, as seen by clients
//!
//! A leading `@` marks a short reference in places that normally expect a
//! full one.
//!
//! Remote clients go through [`DataModel::write`] and [`DataModel::operate`],
//! which run the registered interceptors before anything is committed.

mod builder;
pub mod template;
mod value;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

pub use builder::{DeviceBuilder, ModelBuilder, NodeBuilder};
pub use value::{Quality, Value, ValueKind};

/// Marker prefix for references given without the IED name.
pub const RELATIVE_MARKER: char = '@';

/// A logical device and its nodes.
#[derive(Debug, Clone)]
pub struct LogicalDevice {
    pub inst: String,
    pub nodes: Vec<LogicalNode>,
}

/// A logical node and its data objects, in declaration order.
#[derive(Debug, Clone)]
pub struct LogicalNode {
    pub name: String,
    pub objects: Vec<DataObject>,
}

impl LogicalNode {
    pub fn object(&self, name: &str) -> Option<&DataObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    /// Returns `true` if `path` names a data object (`DO`) or one of its
    /// attributes (`DO.attr`).
    pub fn has(&self, path: &str) -> bool {
        match path.split_once('.') {
            Some((object, attr)) => self
                .object(object)
                .is_some_and(|o| o.attribute(attr).is_some()),
            None => self.object(path).is_some(),
        }
    }
}

/// A data object with its flattened attribute paths (`mag.f`, `units.SIUnit`).
#[derive(Debug, Clone)]
pub struct DataObject {
    pub name: String,
    pub attributes: Vec<(String, ValueKind)>,
}

impl DataObject {
    pub fn attribute(&self, name: &str) -> Option<ValueKind> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
    }
}

/// Result of resolving a reference against the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// A data object; `reference` is its short form.
    Object { reference: String },
    /// A single attribute; `reference` is its short form.
    Attribute { reference: String, kind: ValueKind },
}

/// Outcome of an intercepted remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DataAccessError {
    #[error("object access denied")]
    AccessDenied,
    #[error("object value invalid")]
    ValueInvalid,
    #[error("object undefined")]
    ObjectUndefined,
    #[error("type inconsistent")]
    TypeMismatch,
}

/// Answer of a control check phase. Must not have side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Accepted,
    AccessDenied,
    ObjectUndefined,
}

/// Answer of a control operate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    Ok,
    Failed,
}

/// Why a remote control operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("control access denied")]
    AccessDenied,
    #[error("control object undefined")]
    ObjectUndefined,
    #[error("control operation failed")]
    Failed,
}

/// A control request as seen by check and operate handlers.
#[derive(Debug, Clone, Copy)]
pub struct ControlAction<'a> {
    /// Short reference of the controlled data object.
    pub object: &'a str,
    pub ctl_val: bool,
    pub test: bool,
}

pub type WriteHandler = Arc<dyn Fn(&str, &Value) -> Result<(), DataAccessError> + Send + Sync>;
pub type CheckHandler = Arc<dyn Fn(&ControlAction<'_>) -> CheckResult + Send + Sync>;
pub type ControlHandler = Arc<dyn Fn(&ControlAction<'_>) -> ControlResult + Send + Sync>;

#[derive(Clone)]
struct ControlHandlers {
    check: CheckHandler,
    operate: ControlHandler,
}

/// The attribute store.
pub struct DataModel {
    ied_name: String,
    devices: Vec<LogicalDevice>,
    objects: HashSet<String>,
    kinds: HashMap<String, ValueKind>,
    values: Mutex<HashMap<String, Value>>,
    write_handlers: RwLock<HashMap<String, WriteHandler>>,
    control_handlers: RwLock<HashMap<String, ControlHandlers>>,
}

impl DataModel {
    pub fn builder(ied_name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(ied_name)
    }

    pub(crate) fn from_parts(
        ied_name: String,
        devices: Vec<LogicalDevice>,
        initial: Vec<(String, Value)>,
    ) -> Self {
        let mut objects = HashSet::new();
        let mut kinds = HashMap::new();
        let mut values = HashMap::new();

        for device in &devices {
            for node in &device.nodes {
                for object in &node.objects {
                    let object_ref = format!("{}/{}.{}", device.inst, node.name, object.name);
                    for (attr, kind) in &object.attributes {
                        let attr_ref = format!("{object_ref}.{attr}");
                        kinds.insert(attr_ref.clone(), *kind);
                        values.insert(attr_ref, Value::default_for(*kind));
                    }
                    objects.insert(object_ref);
                }
            }
        }

        for (reference, value) in initial {
            match kinds.get(&reference) {
                Some(kind) if *kind == value.kind() => {
                    values.insert(reference, value);
                }
                _ => debug!(attribute = %reference, "ignoring initial value of wrong kind"),
            }
        }

        Self {
            ied_name,
            devices,
            objects,
            kinds,
            values: Mutex::new(values),
            write_handlers: RwLock::new(HashMap::new()),
            control_handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn ied_name(&self) -> &str {
        &self.ied_name
    }

    pub fn devices(&self) -> &[LogicalDevice] {
        &self.devices
    }

    /// Prefixes a short reference with the IED name.
    pub fn object_reference(&self, short: &str) -> String {
        format!("{}{short}", self.ied_name)
    }

    /// Strips the IED name (full form) or the relative marker (`@` form).
    ///
    /// Returns `None` when the reference belongs to another IED.
    pub fn short_reference<'a>(&self, reference: &'a str) -> Option<&'a str> {
        match reference.strip_prefix(RELATIVE_MARKER) {
            Some(short) => Some(short),
            None => reference.strip_prefix(self.ied_name.as_str()),
        }
    }

    /// Looks up a full or `@`-relative reference.
    pub fn resolve(&self, reference: &str) -> Option<NodeRef> {
        let short = self.short_reference(reference)?;
        if self.objects.contains(short) {
            return Some(NodeRef::Object {
                reference: short.to_string(),
            });
        }
        self.kinds.get(short).map(|kind| NodeRef::Attribute {
            reference: short.to_string(),
            kind: *kind,
        })
    }

    /// Returns `true` if a data object exists under the short reference.
    pub fn has_object(&self, short: &str) -> bool {
        self.objects.contains(short)
    }

    /// Declared kind of the attribute under the short reference.
    pub fn kind_of(&self, short: &str) -> Option<ValueKind> {
        self.kinds.get(short).copied()
    }

    pub fn get(&self, attr: &str) -> Option<Value> {
        self.values.lock().get(attr).cloned()
    }

    pub fn get_bool(&self, attr: &str) -> Option<bool> {
        self.get(attr).and_then(|v| v.as_bool())
    }

    pub fn get_int(&self, attr: &str) -> Option<i32> {
        self.get(attr).and_then(|v| v.as_int())
    }

    pub fn get_float(&self, attr: &str) -> Option<f32> {
        self.get(attr).and_then(|v| v.as_float())
    }

    pub fn get_time(&self, attr: &str) -> Option<u64> {
        self.get(attr).and_then(|v| v.as_time())
    }

    pub fn get_str(&self, attr: &str) -> Option<String> {
        self.get(attr).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_quality(&self, object: &str) -> Option<Quality> {
        self.get(&format!("{object}.q")).and_then(|v| v.as_quality())
    }

    /// Runs `f` with the attribute table locked, so every update it makes
    /// becomes visible to readers at once.
    pub fn update<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let mut values = self.values.lock();
        let mut tx = Transaction {
            kinds: &self.kinds,
            values: &mut values,
        };
        f(&mut tx)
    }

    /// Local, unintercepted update of a single attribute.
    pub fn set(&self, attr: &str, value: Value) -> bool {
        self.update(|tx| tx.set(attr, value))
    }

    /// Remote write path: runs the attribute's interceptor, then commits.
    pub fn write(&self, attr: &str, value: Value) -> Result<(), DataAccessError> {
        let kind = self
            .kinds
            .get(attr)
            .copied()
            .ok_or(DataAccessError::ObjectUndefined)?;
        if kind != value.kind() {
            return Err(DataAccessError::TypeMismatch);
        }

        let handler = self.write_handlers.read().get(attr).cloned();
        if let Some(handler) = handler {
            handler(attr, &value)?;
        }

        trace!(attribute = %attr, %value, "remote write committed");
        self.set(attr, value);
        Ok(())
    }

    /// Remote control path: check phase, then operate phase.
    pub fn operate(&self, object: &str, ctl_val: bool, test: bool) -> Result<(), ControlError> {
        let handlers = self
            .control_handlers
            .read()
            .get(object)
            .cloned()
            .ok_or(ControlError::ObjectUndefined)?;

        let action = ControlAction {
            object,
            ctl_val,
            test,
        };

        match (handlers.check)(&action) {
            CheckResult::Accepted => {}
            CheckResult::AccessDenied => return Err(ControlError::AccessDenied),
            CheckResult::ObjectUndefined => return Err(ControlError::ObjectUndefined),
        }

        match (handlers.operate)(&action) {
            ControlResult::Ok => Ok(()),
            ControlResult::Failed => Err(ControlError::Failed),
        }
    }

    /// Installs the interceptor for remote writes to `attr`, replacing any
    /// previous one.
    pub fn set_write_handler(&self, attr: &str, handler: WriteHandler) {
        self.write_handlers.write().insert(attr.to_string(), handler);
    }

    /// Installs check and operate handlers for the control object.
    pub fn set_control_handlers(&self, object: &str, check: CheckHandler, operate: ControlHandler) {
        self.control_handlers
            .write()
            .insert(object.to_string(), ControlHandlers { check, operate });
    }
}

/// A locked view of the attribute table.
pub struct Transaction<'a> {
    kinds: &'a HashMap<String, ValueKind>,
    values: &'a mut HashMap<String, Value>,
}

impl Transaction<'_> {
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.values.get(attr)
    }

    /// Stores `value` if the attribute exists and has the same kind.
    pub fn set(&mut self, attr: &str, value: Value) -> bool {
        match self.kinds.get(attr) {
            Some(kind) if *kind == value.kind() => {
                self.values.insert(attr.to_string(), value);
                true
            }
            Some(_) => {
                debug!(attribute = %attr, "dropping update of wrong kind");
                false
            }
            None => false,
        }
    }

    /// Sets `<object>.q` when the object has one.
    pub fn set_quality(&mut self, object: &str, quality: Quality) -> bool {
        self.set(&format!("{object}.q"), Value::Quality(quality))
    }

    /// Sets `<object>.t` when the object has one.
    pub fn set_timestamp(&mut self, object: &str, ms: u64) -> bool {
        self.set(&format!("{object}.t"), Value::Time(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataModel {
        DataModel::builder("IED1")
            .device("LD0", |ld| {
                ld.node("GGIO1", |ln| {
                    ln.object(
                        "AnOut1",
                        &[
                            ("mag.f", ValueKind::Float),
                            ("q", ValueKind::Quality),
                            ("t", ValueKind::Time),
                        ],
                    )
                    .object("Ind1", &[("stVal", ValueKind::Bool)])
                    .value("Ind1.stVal", Value::Bool(true));
                });
            })
            .build()
    }

    #[test]
    fn resolves_full_and_relative_references() {
        let model = sample();
        assert_eq!(
            model.resolve("IED1LD0/GGIO1.AnOut1"),
            Some(NodeRef::Object {
                reference: "LD0/GGIO1.AnOut1".into()
            })
        );
        assert_eq!(
            model.resolve("@LD0/GGIO1.AnOut1.mag.f"),
            Some(NodeRef::Attribute {
                reference: "LD0/GGIO1.AnOut1.mag.f".into(),
                kind: ValueKind::Float
            })
        );
        assert_eq!(model.resolve("OTHERLD0/GGIO1.AnOut1"), None);
        assert_eq!(model.resolve("IED1LD0/GGIO1.Missing"), None);
    }

    #[test]
    fn initial_values_applied() {
        let model = sample();
        assert_eq!(model.get_bool("LD0/GGIO1.Ind1.stVal"), Some(true));
        assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(0.0));
    }

    #[test]
    fn transaction_rejects_wrong_kind() {
        let model = sample();
        let stored = model.update(|tx| {
            let a = tx.set("LD0/GGIO1.AnOut1.mag.f", Value::Int(1));
            let b = tx.set_quality("LD0/GGIO1.AnOut1", Quality::Invalid);
            (a, b)
        });
        assert_eq!(stored, (false, true));
        assert_eq!(
            model.get_quality("LD0/GGIO1.AnOut1"),
            Some(Quality::Invalid)
        );
    }

    #[test]
    fn write_runs_interceptor() {
        let model = sample();
        model.set_write_handler(
            "LD0/GGIO1.AnOut1.mag.f",
            Arc::new(|_: &str, value: &Value| match value.as_float() {
                Some(v) if v >= 0.0 => Ok(()),
                _ => Err(DataAccessError::ValueInvalid),
            }),
        );

        assert_eq!(
            model.write("LD0/GGIO1.AnOut1.mag.f", Value::Float(-1.0)),
            Err(DataAccessError::ValueInvalid)
        );
        assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(0.0));

        assert!(model.write("LD0/GGIO1.AnOut1.mag.f", Value::Float(2.5)).is_ok());
        assert_eq!(model.get_float("LD0/GGIO1.AnOut1.mag.f"), Some(2.5));
    }

    #[test]
    fn write_checks_existence_and_kind() {
        let model = sample();
        assert_eq!(
            model.write("LD0/GGIO1.Nope.stVal", Value::Bool(true)),
            Err(DataAccessError::ObjectUndefined)
        );
        assert_eq!(
            model.write("LD0/GGIO1.Ind1.stVal", Value::Int(1)),
            Err(DataAccessError::TypeMismatch)
        );
    }

    #[test]
    fn operate_runs_check_before_operate() {
        let model = sample();
        model.set_control_handlers(
            "LD0/GGIO1.Ind1",
            Arc::new(|action: &ControlAction<'_>| {
                if action.ctl_val {
                    CheckResult::Accepted
                } else {
                    CheckResult::AccessDenied
                }
            }),
            Arc::new(|_: &ControlAction<'_>| ControlResult::Ok),
        );

        assert_eq!(model.operate("LD0/GGIO1.Ind1", true, false), Ok(()));
        assert_eq!(
            model.operate("LD0/GGIO1.Ind1", false, false),
            Err(ControlError::AccessDenied)
        );
        assert_eq!(
            model.operate("LD0/GGIO1.AnOut1", true, false),
            Err(ControlError::ObjectUndefined)
        );
    }
}
