//! Host objects exposed to remote clients.

use crate::callable::{CallArgs, Callable, Fault};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// An attribute of a host object.
#[derive(Clone)]
pub enum Member {
    /// A method; calling it is what the trampolines marshal.
    Method(Callable),
    /// Plain data, returned by value.
    Value(Value),
    /// A nested object, handed out by reference.
    Object(Arc<HostObject>),
}

impl Member {
    pub fn type_name(&self) -> &str {
        match self {
            Member::Method(_) => "method",
            Member::Value(value) => value.type_name(),
            Member::Object(object) => object.type_name(),
        }
    }

    /// The callable behind this member, if it can be called.
    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Member::Method(callable) => Some(callable),
            Member::Object(object) => object.callable(),
            Member::Value(_) => None,
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Method(callable) => write!(f, "Method({})", callable.name()),
            Member::Value(value) => write!(f, "Value({:?})", value),
            Member::Object(object) => write!(f, "Object({})", object.type_name()),
        }
    }
}

/// A node of the host object graph.
///
/// The attribute table is thread-safe metadata; it is read by the session's
/// introspection operations on network threads. Host state proper lives
/// behind the callables.
pub struct HostObject {
    type_name: String,
    members: RwLock<BTreeMap<String, Member>>,
    call: Option<Callable>,
    repr: Option<String>,
}

impl HostObject {
    pub fn builder(type_name: impl Into<String>) -> HostObjectBuilder {
        HostObjectBuilder {
            type_name: type_name.into(),
            members: BTreeMap::new(),
            call: None,
            repr: None,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<Member> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Bind or rebind an attribute. Returns the previous binding.
    pub fn set(&self, name: impl Into<String>, member: Member) -> Option<Member> {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), member)
    }

    pub fn remove(&self, name: &str) -> Option<Member> {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Attribute names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The object's own call slot, for callable objects.
    pub fn callable(&self) -> Option<&Callable> {
        self.call.as_ref()
    }

    pub fn repr(&self) -> String {
        self.repr
            .clone()
            .unwrap_or_else(|| format!("<{} object>", self.type_name))
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("type_name", &self.type_name)
            .field("members", &self.names())
            .finish()
    }
}

/// Builder for [`HostObject`].
pub struct HostObjectBuilder {
    type_name: String,
    members: BTreeMap<String, Member>,
    call: Option<Callable>,
    repr: Option<String>,
}

impl HostObjectBuilder {
    pub fn method<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        let callable = Callable::new(format!("{}.{}", self.type_name, name), func);
        self.members.insert(name.to_string(), Member::Method(callable));
        self
    }

    pub fn value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.members
            .insert(name.to_string(), Member::Value(value.into()));
        self
    }

    pub fn object(mut self, name: &str, object: Arc<HostObject>) -> Self {
        self.members.insert(name.to_string(), Member::Object(object));
        self
    }

    /// Make the object itself callable.
    pub fn call<F>(mut self, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.call = Some(Callable::new(self.type_name.clone(), func));
        self
    }

    pub fn repr(mut self, repr: impl Into<String>) -> Self {
        self.repr = Some(repr.into());
        self
    }

    pub fn build(self) -> Arc<HostObject> {
        Arc::new(HostObject {
            type_name: self.type_name,
            members: RwLock::new(self.members),
            call: self.call,
            repr: self.repr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<HostObject> {
        HostObject::builder("Sample")
            .value("answer", 42i64)
            .method("double", |args| Ok(Value::Int(args.int(0, "x")? * 2)))
            .object("child", HostObject::builder("Child").build())
            .build()
    }

    #[test]
    fn test_members_resolve() {
        let obj = sample();
        assert_eq!(obj.names(), vec!["answer", "child", "double"]);

        match obj.get("answer") {
            Some(Member::Value(v)) => assert_eq!(v, Value::Int(42)),
            other => panic!("Expected value, got: {:?}", other),
        }

        let double = obj.get("double").unwrap();
        let callable = double.as_callable().expect("method is callable");
        assert_eq!(callable.name(), "Sample.double");
        assert_eq!(callable.call(&CallArgs::new().arg(4i64)).unwrap(), Value::Int(8));

        assert_eq!(obj.get("child").unwrap().type_name(), "Child");
        assert!(obj.get("missing").is_none());
    }

    #[test]
    fn test_set_and_remove() {
        let obj = sample();
        assert!(obj.set("extra", Member::Value(Value::from("x"))).is_none());
        assert!(obj.remove("extra").is_some());
        assert!(obj.remove("extra").is_none());
    }

    #[test]
    fn test_callable_object_and_repr() {
        let obj = HostObject::builder("Adder")
            .call(|args| Ok(Value::Int(args.int(0, "a")? + args.int(1, "b")?)))
            .build();
        let call = obj.callable().unwrap();
        assert_eq!(call.call(&CallArgs::new().arg(1i64).arg(2i64)).unwrap(), Value::Int(3));
        assert_eq!(obj.repr(), "<Adder object>");
        assert!(sample().callable().is_none());
    }
}
