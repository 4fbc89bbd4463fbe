//! The tagged value tree.
//!
//! Application data enters the reactive boundary as a `Value`: a small sum
//! type over scalars, sequences, mappings, and opaque host values. The
//! containers are cheap-clone `Arc` handles, so assigning a nested mapping
//! into two fields shares one underlying container — the identity semantics
//! the change-detection rules below rely on.
//!
//! # Equality
//!
//! Write suppression uses strict equality with one exception: two NaN
//! numbers count as equal (otherwise a NaN field could never settle).
//! `0.0` and `-0.0` compare equal under strict equality and are therefore
//! treated as an unchanged write; the suppression test pins this behavior.
//! Containers and externals compare by identity, never by contents.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::map::Map;
use super::observer::Observer;
use super::seq::Seq;

/// A reactive-capable value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    Seq(Seq),
    Map(Map),
    /// Opaque host value (e.g. a virtual render node). Never instrumented.
    External(External),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::External(_) => "external",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for the instrumentable container variants.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Seq(_) | Value::Map(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&Seq> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// The container's instrumentation record, if it has been observed.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        match self {
            Value::Map(m) => m.observer(),
            Value::Seq(s) => s.observer(),
            _ => None,
        }
    }

    /// Strict equality: scalars by value (NaN is unequal to itself,
    /// `0.0 == -0.0`), containers and externals by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::External(a), Value::External(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Snapshot the value as plain JSON. Untracked; externals become null.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The unchanged-write rule: strict equality, except that a NaN written
/// over a NaN is also unchanged.
pub(crate) fn unchanged_write(old: &Value, new: &Value) -> bool {
    if new.strict_eq(old) {
        return true;
    }
    matches!(
        (old, new),
        (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan()
    )
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Seq(s) => s.fmt(f),
            Value::Map(m) => m.fmt(f),
            Value::External(e) => e.fmt(f),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value.into())
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl From<Seq> for Value {
    fn from(value: Seq) -> Self {
        Value::Seq(value)
    }
}

impl From<External> for Value {
    fn from(value: External) -> Self {
        Value::External(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            // Integers outside f64 range degrade like they would in the
            // original runtime's number model.
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.into()),
            serde_json::Value::Array(items) => {
                Value::Seq(Seq::from_vec(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(entries) => Value::Map(Map::from_entries(
                entries.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Seq(seq) => {
                let items = seq.snapshot_untracked();
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            Value::Map(map) => {
                let entries = map.entries_untracked();
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::External(_) => serializer.serialize_unit(),
        }
    }
}

/// Opaque host value carried through the tree without instrumentation.
#[derive(Clone)]
pub struct External {
    inner: Arc<dyn Any + Send + Sync>,
}

impl External {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &External) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("External(..)")
    }
}
