//! Callables, their arguments, and the faults they raise.

use crate::object::HostObject;
use crate::table::Remote;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An exception raised by host code.
///
/// `kind` is the exception class name (`ValueError`, `TypeError`, ...) and is
/// carried to the remote caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: String,
    pub message: String,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new("KeyError", message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

/// Positional and keyword arguments of a call request.
///
/// Object references sent by the client arrive as `Value::Remote`, already
/// resolved against the caller's connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Add a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Look up an argument by position, falling back to its keyword name.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }

    /// Required argument; a missing one is a `TypeError`, as in Python.
    pub fn require(&self, index: usize, name: &str) -> Result<&Value, Fault> {
        self.get(index, name)
            .ok_or_else(|| Fault::type_error(format!("missing required argument: '{}'", name)))
    }

    pub fn int(&self, index: usize, name: &str) -> Result<i64, Fault> {
        let value = self.require(index, name)?;
        value.as_int().ok_or_else(|| {
            Fault::type_error(format!(
                "argument '{}' must be int, not {}",
                name,
                value.type_name()
            ))
        })
    }

    pub fn str(&self, index: usize, name: &str) -> Result<&str, Fault> {
        let value = self.require(index, name)?;
        value.as_str().ok_or_else(|| {
            Fault::type_error(format!(
                "argument '{}' must be str, not {}",
                name,
                value.type_name()
            ))
        })
    }

    /// Argument that must be a host object or bound method.
    pub fn remote(&self, index: usize, name: &str) -> Result<&Remote, Fault> {
        let value = self.require(index, name)?;
        value.as_remote().ok_or_else(|| {
            Fault::type_error(format!(
                "argument '{}' must be an object, not {}",
                name,
                value.type_name()
            ))
        })
    }

    pub fn object(&self, index: usize, name: &str) -> Result<&Arc<HostObject>, Fault> {
        match self.remote(index, name)? {
            Remote::Object(object) => Ok(object),
            Remote::Callable(_) => Err(Fault::type_error(format!(
                "argument '{}' must be an object, not method",
                name
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

type CallFn = dyn Fn(&CallArgs) -> Result<Value, Fault> + Send + Sync;

/// A named host function.
///
/// Callables are cheap to clone and carry no host state themselves; state
/// they touch lives behind whatever the host closes over (typically a
/// [`ThreadBound`](crate::affinity::ThreadBound)).
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    func: Arc<CallFn>,
}

impl Callable {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.func) as *const () as usize
    }

    /// Run the function on the current thread.
    pub fn call(&self, args: &CallArgs) -> Result<Value, Fault> {
        (self.func)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish()
    }
}
