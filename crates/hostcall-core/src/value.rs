//! Opaque values exchanged between remote clients and the host.
//!
//! Values are plain data except for `Value::Ref`, which names an object held
//! in the connection's object table. Objects themselves never cross the wire:
//! on the host side a reference is resolved to `Value::Remote`, and results
//! carrying `Value::Remote` are boxed back into references before they are
//! sent.

use crate::callable::Callable;
use crate::object::HostObject;
use crate::table::Remote;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Reference to an object boxed in a connection's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An opaque value as seen by the bridge.
///
/// Serialized as `{"kind": "int", "value": 42}`; `None` has no `value`.
/// Non-finite floats are written as the strings `"inf"`, `"-inf"` and `"nan"`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Ref(ObjectId),
    /// A host object or bound method, live on the host side only.
    #[serde(skip)]
    Remote(Remote),
}

impl Value {
    /// Name of the value's type, used in `TypeError` messages.
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Ref(_) => "object",
            Value::Remote(remote) => remote.type_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<ObjectId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&Remote> {
        match self {
            Value::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<HostObject>> {
        match self {
            Value::Remote(Remote::Object(object)) => Some(object),
            _ => None,
        }
    }

    /// Python-flavoured representation, used by the `repr`/`str` operations.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_nan() => "nan".to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Str(s) => format!("{:?}", s),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Dict(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{:?}: {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Ref(id) => format!("<ref {}>", id),
            Value::Remote(remote) => remote.repr(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Remote(a), Value::Remote(b)) => a.identity() == b.identity(),
            _ => false,
        }
    }
}

mod float_repr {
    use serde::de::{self, Deserialize, Deserializer};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if *value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"inf\", \"-inf\" or \"nan\"",
                )),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Ref(id)
    }
}

impl From<Remote> for Value {
    fn from(remote: Remote) -> Self {
        Value::Remote(remote)
    }
}

impl From<Arc<HostObject>> for Value {
    fn from(object: Arc<HostObject>) -> Self {
        Value::Remote(Remote::Object(object))
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Remote(Remote::Callable(callable))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::None)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(Value::Int(42)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "int", "value": 42}));

        let json = serde_json::to_value(Value::None).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "none"}));

        let json = serde_json::to_value(Value::Ref(ObjectId(7))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "ref", "value": 7}));
    }

    #[test]
    fn test_nested_values_parse() {
        let parsed: Value = serde_json::from_value(serde_json::json!({
            "kind": "list",
            "value": [{"kind": "str", "value": "a"}, {"kind": "bool", "value": true}]
        }))
        .unwrap();
        assert_eq!(parsed, Value::from(vec![Value::from("a"), Value::from(true)]));
    }

    #[test]
    fn test_repr() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Value::Int(1));
        assert_eq!(Value::Dict(map).repr(), "{\"x\": 1}");
        assert_eq!(Value::None.repr(), "None");
        assert_eq!(Value::from(vec![1i64, 2]).repr(), "[1, 2]");
    }

    #[test]
    fn test_non_finite_floats_survive_the_wire() {
        let json = serde_json::to_value(Value::Float(f64::INFINITY)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "float", "value": "inf"}));

        for f in [f64::INFINITY, f64::NEG_INFINITY, 1e308, -0.5] {
            let json = serde_json::to_value(Value::Float(f)).unwrap();
            let back: Value = serde_json::from_value(json).unwrap();
            assert_eq!(back, Value::Float(f));
        }

        let json = serde_json::to_string(&Value::Float(f64::NAN)).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert!(back.as_float().unwrap().is_nan());
        assert_eq!(back.repr(), "nan");

        let bad = serde_json::json!({"kind": "float", "value": "infinity"});
        assert!(serde_json::from_value::<Value>(bad).is_err());
    }

    #[test]
    fn test_float_accepts_integer_literal() {
        let parsed: Value =
            serde_json::from_value(serde_json::json!({"kind": "float", "value": 2})).unwrap();
        assert_eq!(parsed, Value::Float(2.0));
    }

    #[test]
    fn test_remote_values_stay_host_side() {
        let object = HostObject::builder("Thing").build();
        let value = Value::from(object.clone());
        assert_eq!(value.type_name(), "Thing");
        assert_eq!(value, Value::from(object));
        assert_ne!(value, Value::from(HostObject::builder("Thing").build()));
        assert!(value.as_object().is_some());

        // Unboxed host objects cannot be serialized.
        assert!(serde_json::to_value(&value).is_err());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::Bool(true).as_int(), Some(1));
        assert_eq!(Value::from("x").as_int(), None);
        assert_eq!(Value::from(None::<i64>), Value::None);
    }
}
