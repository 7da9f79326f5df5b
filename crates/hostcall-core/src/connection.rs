//! One client's RPC session.
//!
//! A connection owns its object table and its dispatch table. The dispatch
//! table is assembled in a [`ConnectionSetup`] while the service's
//! `on_connect` hook runs, then moved into the connection, after which it is
//! only reachable immutably.

use crate::callable::{CallArgs, Callable};
use crate::config::AccessPolicy;
use crate::dispatch::DispatchTable;
use crate::error::{BridgeError, Result};
use crate::object::{HostObject, Member};
use crate::protocol::OpCode;
use crate::service::Service;
use crate::table::{ObjectTable, Remote};
use crate::value::{ObjectId, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub type ConnectionId = u64;

/// Connection state while `on_connect` runs.
pub struct ConnectionSetup {
    id: ConnectionId,
    root: Arc<HostObject>,
    policy: AccessPolicy,
    handlers: DispatchTable,
}

impl ConnectionSetup {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn root(&self) -> &Arc<HostObject> {
        &self.root
    }

    pub fn set_root(&mut self, root: Arc<HostObject>) {
        self.root = root;
    }

    pub fn policy_mut(&mut self) -> &mut AccessPolicy {
        &mut self.policy
    }

    pub fn handlers(&self) -> &DispatchTable {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut DispatchTable {
        &mut self.handlers
    }
}

/// An open RPC session.
pub struct Connection {
    id: ConnectionId,
    root: Arc<HostObject>,
    policy: AccessPolicy,
    objects: ObjectTable,
    handlers: DispatchTable,
    closed: AtomicBool,
    requests: AtomicU64,
}

impl Connection {
    /// Open a connection, running the service's `on_connect` hook before it
    /// can serve anything.
    pub fn open(id: ConnectionId, service: &dyn Service) -> Arc<Self> {
        let mut setup = ConnectionSetup {
            id,
            root: service.root(),
            policy: service.policy(),
            handlers: DispatchTable::with_defaults(),
        };
        service.on_connect(&mut setup);

        debug!("Connection {} handlers: {:?}", id, setup.handlers);
        info!("Connection {} opened", id);

        Arc::new(Self {
            id,
            root: setup.root,
            policy: setup.policy,
            objects: ObjectTable::new(),
            handlers: setup.handlers,
            closed: AtomicBool::new(false),
            requests: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn root(&self) -> &Arc<HostObject> {
        &self.root
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn handlers(&self) -> &DispatchTable {
        &self.handlers
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests dispatched so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Mark the connection closed and drop every reference it handed out.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.objects.clear();
            info!("Connection {} closed", self.id);
        }
    }

    /// Route one request through the dispatch table.
    pub fn dispatch(&self, method: &str, params: &serde_json::Value) -> Result<Value> {
        if self.is_closed() {
            return Err(BridgeError::ConnectionClosed(self.id));
        }

        let op = OpCode::from_method(method)
            .ok_or_else(|| BridgeError::MethodNotFound(method.to_string()))?;
        let handler = self
            .handlers
            .get(op)
            .ok_or_else(|| BridgeError::UnsupportedOpcode(op.to_string()))?;

        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!("Connection {}: {}({})", self.id, op, params);
        handler(self, params)
    }

    /// Visibility check applied to every attribute name.
    pub fn check_attribute_access(&self, name: &str) -> Result<()> {
        if name.starts_with('_') && !self.policy.allow_private_attrs {
            return Err(BridgeError::AccessDenied {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve `name` on a referenced object, applying the access policy.
    pub fn resolve_attribute(&self, target: ObjectId, name: &str) -> Result<Member> {
        self.check_attribute_access(name)?;

        let remote = self.objects.get(target)?;
        let not_found = || BridgeError::AttributeNotFound {
            type_name: remote.type_name().to_string(),
            name: name.to_string(),
        };
        match &remote {
            Remote::Object(object) => object.get(name).ok_or_else(not_found),
            Remote::Callable(_) => Err(not_found()),
        }
    }

    /// The object behind a reference; bound methods are rejected.
    pub fn resolve_object(&self, target: ObjectId) -> Result<Arc<HostObject>> {
        match self.objects.get(target)? {
            Remote::Object(object) => Ok(object),
            Remote::Callable(callable) => Err(BridgeError::AttributeNotFound {
                type_name: "method".to_string(),
                name: callable.name().to_string(),
            }),
        }
    }

    /// The callable behind a reference.
    pub fn resolve_callable(&self, target: ObjectId) -> Result<Callable> {
        let remote = self.objects.get(target)?;
        remote
            .as_callable()
            .cloned()
            .ok_or_else(|| BridgeError::NotCallable {
                type_name: remote.type_name().to_string(),
            })
    }

    /// Swap the object references in a call's arguments for the objects they
    /// name, so the target receives live host objects.
    pub fn resolve_args(&self, args: CallArgs) -> Result<CallArgs> {
        Ok(CallArgs {
            args: args
                .args
                .into_iter()
                .map(|value| self.objects.resolve_value(value))
                .collect::<Result<_>>()?,
            kwargs: args
                .kwargs
                .into_iter()
                .map(|(name, value)| Ok((name, self.objects.resolve_value(value)?)))
                .collect::<Result<_>>()?,
        })
    }

    /// Box any host objects in a call result as references for the client.
    pub fn export(&self, value: Value) -> Value {
        self.objects.box_value(value)
    }

    /// The callable behind a resolved attribute.
    pub fn member_callable(member: &Member) -> Result<Callable> {
        member
            .as_callable()
            .cloned()
            .ok_or_else(|| BridgeError::NotCallable {
                type_name: member.type_name().to_string(),
            })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
