//! Per-connection table of objects handed out by reference.
//!
//! Objects never cross the wire; clients hold `ObjectId`s that index this
//! table. Entries are reference counted so that the same object or method
//! boxed twice keeps one id, and a `del` from the client releases one
//! reference.

use crate::callable::Callable;
use crate::error::{BridgeError, Result};
use crate::object::{HostObject, Member};
use crate::value::{ObjectId, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something a client can hold a reference to.
#[derive(Clone, Debug)]
pub enum Remote {
    Object(Arc<HostObject>),
    /// A bound method obtained through `getattr`.
    Callable(Callable),
}

impl Remote {
    pub fn type_name(&self) -> &str {
        match self {
            Remote::Object(object) => object.type_name(),
            Remote::Callable(_) => "method",
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Remote::Object(object) => object.callable(),
            Remote::Callable(callable) => Some(callable),
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Remote::Object(object) => object.repr(),
            Remote::Callable(callable) => format!("<bound method {}>", callable.name()),
        }
    }

    /// Address of the shared allocation behind the remote.
    pub(crate) fn identity(&self) -> usize {
        match self {
            Remote::Object(object) => Arc::as_ptr(object) as usize,
            Remote::Callable(callable) => callable.identity(),
        }
    }
}

struct Slot {
    remote: Remote,
    refcount: usize,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    slots: HashMap<ObjectId, Slot>,
    // Repeated lookups of the same remote share an id.
    by_identity: HashMap<usize, ObjectId>,
}

/// Reference-counted object table owned by one connection.
#[derive(Default)]
pub struct ObjectTable {
    inner: Mutex<Inner>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Box a remote and return its id, adding one reference.
    pub fn insert(&self, remote: Remote) -> ObjectId {
        let mut inner = self.lock();

        let key = remote.identity();
        if let Some(&id) = inner.by_identity.get(&key) {
            if let Some(slot) = inner.slots.get_mut(&id) {
                slot.refcount += 1;
                return id;
            }
        }

        inner.next_id += 1;
        let id = ObjectId(inner.next_id);
        inner.slots.insert(id, Slot { remote, refcount: 1 });
        inner.by_identity.insert(key, id);
        id
    }

    /// Turn an attribute into a wire value: data inline, everything else by reference.
    pub fn box_member(&self, member: Member) -> Value {
        match member {
            Member::Value(value) => self.box_value(value),
            Member::Object(object) => Value::Ref(self.insert(Remote::Object(object))),
            Member::Method(callable) => Value::Ref(self.insert(Remote::Callable(callable))),
        }
    }

    /// Replace every `Value::Remote` in `value`, however deeply nested, with
    /// a reference into this table.
    pub fn box_value(&self, value: Value) -> Value {
        match value {
            Value::Remote(remote) => Value::Ref(self.insert(remote)),
            Value::List(items) => {
                Value::List(items.into_iter().map(|item| self.box_value(item)).collect())
            }
            Value::Dict(map) => Value::Dict(
                map.into_iter()
                    .map(|(key, item)| (key, self.box_value(item)))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Inverse of [`box_value`](Self::box_value): every `Value::Ref` becomes
    /// the remote it names. Unknown ids fail the whole value.
    pub fn resolve_value(&self, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Ref(id) => Value::Remote(self.get(id)?),
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.resolve_value(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Dict(map) => Value::Dict(
                map.into_iter()
                    .map(|(key, item)| Ok((key, self.resolve_value(item)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
            other => other,
        })
    }

    pub fn get(&self, id: ObjectId) -> Result<Remote> {
        self.lock()
            .slots
            .get(&id)
            .map(|slot| slot.remote.clone())
            .ok_or(BridgeError::UnknownObject(id))
    }

    /// Drop one reference. Returns `true` when the entry was removed.
    pub fn release(&self, id: ObjectId) -> Result<bool> {
        let mut inner = self.lock();
        let slot = inner
            .slots
            .get_mut(&id)
            .ok_or(BridgeError::UnknownObject(id))?;

        slot.refcount -= 1;
        if slot.refcount > 0 {
            return Ok(false);
        }

        if let Some(slot) = inner.slots.remove(&id) {
            inner.by_identity.remove(&slot.remote.identity());
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        inner.by_identity.clear();
    }
}
