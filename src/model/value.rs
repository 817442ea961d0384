//! Typed attribute values and quality flags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Validity part of an attribute's quality descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Good,
    Invalid,
    Questionable,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quality::Good => "good",
            Quality::Invalid => "invalid",
            Quality::Questionable => "questionable",
        };
        f.write_str(name)
    }
}

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
    /// UTC time in milliseconds.
    Time,
    Quality,
}

/// A live attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Time(u64),
    Quality(Quality),
}

impl Value {
    /// The zero value an attribute of `kind` starts with.
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Str => Value::Str(String::new()),
            ValueKind::Time => Value::Time(0),
            ValueKind::Quality => Value::Quality(Quality::Good),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Time(_) => ValueKind::Time,
            Value::Quality(_) => ValueKind::Quality,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<u64> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_quality(&self) -> Option<Quality> {
        match self {
            Value::Quality(q) => Some(*q),
            _ => None,
        }
    }

    /// Converts into an attribute of `kind`. Integers widen to floats,
    /// finite floats round to integers and booleans map to 0/1.
    pub fn convert_to(&self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (value, kind) if value.kind() == kind => Some(value.clone()),
            (Value::Int(i), ValueKind::Float) => Some(Value::Float(*i as f32)),
            (Value::Float(v), ValueKind::Int) if v.is_finite() => {
                Some(Value::Int(v.round() as i32))
            }
            (Value::Bool(b), ValueKind::Int) => Some(Value::Int(i32::from(*b))),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Time(t) => write!(f, "{t}"),
            Value::Quality(q) => write!(f, "{q}"),
        }
    }
}
