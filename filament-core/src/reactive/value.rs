//! Dynamic Values
//!
//! [`Value`] is the unit of state the engine moves around. It is cheap to
//! clone: strings are reference-counted and cloning a container yields
//! another handle to the same shared state.
//!
//! The `Raw` variant is the explicit skip-observation marker — an opaque
//! payload the engine never walks, tracks, or converts.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::observe::{ObservedList, ObservedMap};

/// A dynamic reactive value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A reactive sequence.
    List(ObservedList),
    /// A reactive keyed container.
    Map(ObservedMap),
    /// Opaque payload excluded from observation.
    Raw(Arc<serde_json::Value>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn raw(payload: serde_json::Value) -> Self {
        Value::Raw(Arc::new(payload))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservedList> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert to plain JSON. Containers are snapshotted without
    /// registering dependencies; `Raw` payloads pass through unchanged.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => (*b).into(),
            Value::Int(i) => (*i).into(),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(list) => serde_json::Value::Array(
                list.items_untracked().iter().map(Value::to_json).collect(),
            ),
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for key in map.keys_untracked() {
                    if let Some(value) = map.get_untracked(&key) {
                        object.insert(key, value.to_json());
                    }
                }
                serde_json::Value::Object(object)
            }
            Value::Raw(raw) => (**raw).clone(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::List(ObservedList::from_values(
                    items.into_iter().map(Value::from).collect(),
                ))
            }
            serde_json::Value::Object(entries) => Value::Map(ObservedMap::from_entries(
                entries.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(list) => f
                .debug_struct("List")
                .field("len", &list.len_untracked())
                .finish(),
            Value::Map(map) => f
                .debug_struct("Map")
                .field("len", &map.len_untracked())
                .finish(),
            Value::Raw(raw) => f.debug_tuple("Raw").field(raw).finish(),
        }
    }
}

/// Loose equality.
///
/// Integers and floats compare numerically across variants, and `NaN` is
/// loosely equal to `NaN` (writing NaN over NaN is a no-op). Containers
/// compare by handle identity first, then structurally on untracked
/// snapshots. Cross-kind comparisons are unequal.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.ptr_eq(y) || {
                let xs = x.items_untracked();
                let ys = y.items_untracked();
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(u, v)| loose_eq(u, v))
            }
        }
        (Value::Map(x), Value::Map(y)) => {
            x.ptr_eq(y) || {
                let keys = x.keys_untracked();
                keys.len() == y.len_untracked()
                    && keys.iter().all(|key| {
                        match (x.get_untracked(key), y.get_untracked(key)) {
                            (Some(u), Some(v)) => loose_eq(&u, &v),
                            _ => false,
                        }
                    })
            }
        }
        (Value::Raw(x), Value::Raw(y)) => Arc::ptr_eq(x, y) || x == y,
        _ => false,
    }
}
