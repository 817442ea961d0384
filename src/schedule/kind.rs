use serde::Serialize;

use crate::model::{LogicalNode, Value, ValueKind};

/// Shape of the value a schedule produces.
///
/// Resolved once from the schedule node's mirror object and carried for the
/// schedule's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Analogue setpoint mirrored in `ValMV.mag.f`.
    AnalogValue,
    /// Integer status mirrored in `ValINS.stVal`.
    IntegerStatus,
    /// Binary status mirrored in `ValSPS.stVal`.
    BinaryStatus,
    /// Enumerated status mirrored in `ValENS.stVal`.
    EnumStatus,
}

impl TargetKind {
    pub const ALL: [TargetKind; 4] = [
        TargetKind::AnalogValue,
        TargetKind::IntegerStatus,
        TargetKind::BinaryStatus,
        TargetKind::EnumStatus,
    ];

    /// Finds the kind from the mirror object the node declares. When several
    /// are present the last in [`TargetKind::ALL`] order wins.
    pub fn detect(node: &LogicalNode) -> Option<Self> {
        Self::ALL
            .into_iter()
            .rev()
            .find(|kind| node.object(kind.mirror_object()).is_some())
    }

    /// Name of the data object that mirrors the current value.
    pub fn mirror_object(self) -> &'static str {
        match self {
            TargetKind::AnalogValue => "ValMV",
            TargetKind::IntegerStatus => "ValINS",
            TargetKind::BinaryStatus => "ValSPS",
            TargetKind::EnumStatus => "ValENS",
        }
    }

    /// Value attribute inside the mirror object.
    pub fn mirror_attribute(self) -> &'static str {
        match self {
            TargetKind::AnalogValue => "mag.f",
            _ => "stVal",
        }
    }

    /// Name prefix of the numbered entry objects.
    pub fn entry_prefix(self) -> &'static str {
        match self {
            TargetKind::AnalogValue => "ValASG",
            TargetKind::IntegerStatus => "ValING",
            TargetKind::BinaryStatus => "ValSPG",
            TargetKind::EnumStatus => "ValENG",
        }
    }

    /// Candidate value attributes inside an entry object, in lookup order.
    pub fn entry_attributes(self) -> &'static [&'static str] {
        match self {
            TargetKind::AnalogValue => &["setMag.f", "setMag.i"],
            _ => &["setVal"],
        }
    }

    /// Kind of the published value.
    pub fn value_kind(self) -> ValueKind {
        match self {
            TargetKind::AnalogValue => ValueKind::Float,
            TargetKind::BinaryStatus => ValueKind::Bool,
            TargetKind::IntegerStatus | TargetKind::EnumStatus => ValueKind::Int,
        }
    }

    /// Whether an entry attribute of `kind` can feed this target.
    pub fn accepts(self, kind: ValueKind) -> bool {
        match self {
            TargetKind::AnalogValue => matches!(kind, ValueKind::Float | ValueKind::Int),
            _ => kind == self.value_kind(),
        }
    }

    /// Converts a stored entry value into the published shape.
    pub fn normalize(self, value: Value) -> Option<Value> {
        match (self, value) {
            (TargetKind::AnalogValue, Value::Float(v)) => Some(Value::Float(v)),
            (TargetKind::AnalogValue, Value::Int(v)) => Some(Value::Float(v as f32)),
            (TargetKind::BinaryStatus, Value::Bool(b)) => Some(Value::Bool(b)),
            (TargetKind::IntegerStatus | TargetKind::EnumStatus, Value::Int(i)) => {
                Some(Value::Int(i))
            }
            _ => None,
        }
    }
}

/// Returns `true` if `name` is `prefix` followed by one or more digits.
pub fn is_numbered(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Object names an entry index may be declared under (`%i`, `%02i`,
/// `%03i`, `%04i`).
pub fn numbered_names(prefix: &str, index: usize) -> [String; 4] {
    [
        format!("{prefix}{index}"),
        format!("{prefix}{index:02}"),
        format!("{prefix}{index:03}"),
        format!("{prefix}{index:04}"),
    ]
}
