//! Services decide what a connection exposes and how it dispatches.
//!
//! [`SlaveService`] is the stock service: it exposes one root object and
//! keeps the default handler for every operation, so calls run on whichever
//! thread serves the connection. [`MainThreadService`] wraps another service
//! and, once that service has set the connection up, swaps `call` and
//! `callattr` for trampolines into the host's main thread.

use crate::config::AccessPolicy;
use crate::connection::{Connection, ConnectionSetup};
use crate::executor::MainThreadExecutor;
use crate::object::HostObject;
use crate::trampoline;
use std::sync::Arc;
use tracing::{debug, info};

/// Connection lifecycle hooks and the object graph a connection exposes.
pub trait Service: Send + Sync {
    /// Root object handed to `getroot`.
    fn root(&self) -> Arc<HostObject>;

    fn policy(&self) -> AccessPolicy {
        AccessPolicy::default()
    }

    /// Runs once per connection before its first request.
    fn on_connect(&self, _setup: &mut ConnectionSetup) {}

    /// Runs once per connection after its last request.
    fn on_disconnect(&self, _conn: &Connection) {}
}

impl<S: Service + ?Sized> Service for Arc<S> {
    fn root(&self) -> Arc<HostObject> {
        (**self).root()
    }

    fn policy(&self) -> AccessPolicy {
        (**self).policy()
    }

    fn on_connect(&self, setup: &mut ConnectionSetup) {
        (**self).on_connect(setup)
    }

    fn on_disconnect(&self, conn: &Connection) {
        (**self).on_disconnect(conn)
    }
}

/// Exposes a root object with the default dispatch table.
#[derive(Debug, Clone)]
pub struct SlaveService {
    root: Arc<HostObject>,
    policy: AccessPolicy,
}

impl SlaveService {
    pub fn new(root: Arc<HostObject>) -> Self {
        Self {
            root,
            policy: AccessPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Service for SlaveService {
    fn root(&self) -> Arc<HostObject> {
        self.root.clone()
    }

    fn policy(&self) -> AccessPolicy {
        self.policy.clone()
    }

    fn on_connect(&self, setup: &mut ConnectionSetup) {
        debug!("Connection {} exposing {}", setup.id(), self.root.repr());
    }

    fn on_disconnect(&self, conn: &Connection) {
        debug!(
            "Connection {} served {} requests",
            conn.id(),
            conn.request_count()
        );
    }
}

/// Runs every remote call on the host's main thread.
///
/// The wrapped service's hooks run first, so anything it binds for `call` or
/// `callattr` is overridden. Nothing needs undoing on disconnect because the
/// patched table belongs to the connection.
pub struct MainThreadService<S = SlaveService> {
    base: S,
    executor: Arc<dyn MainThreadExecutor>,
}

impl<S: Service> MainThreadService<S> {
    pub fn new(base: S, executor: Arc<dyn MainThreadExecutor>) -> Self {
        Self { base, executor }
    }

    pub fn base(&self) -> &S {
        &self.base
    }

    pub fn executor(&self) -> &Arc<dyn MainThreadExecutor> {
        &self.executor
    }
}

impl<S: Service> Service for MainThreadService<S> {
    fn root(&self) -> Arc<HostObject> {
        self.base.root()
    }

    fn policy(&self) -> AccessPolicy {
        self.base.policy()
    }

    fn on_connect(&self, setup: &mut ConnectionSetup) {
        self.base.on_connect(setup);
        trampoline::install(setup.handlers_mut(), self.executor.clone());
        info!("Connection {} calls routed to the main thread", setup.id());
    }

    fn on_disconnect(&self, conn: &Connection) {
        self.base.on_disconnect(conn);
    }
}
