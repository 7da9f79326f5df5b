//! Call trampolines: run remote calls on the host's main thread.
//!
//! A network thread that receives `call` or `callattr` must not run the
//! target itself. The trampoline wraps the call in a zero-argument job,
//! hands it to the [`MainThreadExecutor`], blocks until the main thread has
//! run it, and returns the result the job left in a [`ResultSlot`].
//!
//! [`install`] binds the two trampolines into a connection's dispatch table.
//! Every other operation keeps its default handler.

use crate::callable::{CallArgs, Callable, Fault};
use crate::connection::Connection;
use crate::dispatch::DispatchTable;
use crate::error::{BridgeError, Result};
use crate::executor::{ExecMode, ExecutorError, MainThreadExecutor};
use crate::protocol::{parse_params, CallAttrParams, CallParams, OpCode};
use crate::value::{ObjectId, Value};
use std::sync::{Arc, OnceLock};
use tracing::{trace, warn};

/// Write-once cell carrying one job's result back to its submitter.
///
/// One clone travels with the job, the other stays with the invocation that
/// created it. It is filled at most once and read after the executor reports
/// completion.
pub struct ResultSlot<T> {
    cell: Arc<OnceLock<T>>,
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// Store the result. Returns `false` if the slot was already filled.
    pub fn fill(&self, value: T) -> bool {
        self.cell.set(value).is_ok()
    }

    pub fn is_filled(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: Clone> ResultSlot<T> {
    /// Consume this handle and return the stored result, if any.
    pub fn take(self) -> Option<T> {
        match Arc::try_unwrap(self.cell) {
            Ok(cell) => cell.into_inner(),
            // The job still holds its clone (e.g. after a timed-out wait).
            Err(shared) => shared.get().cloned(),
        }
    }
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `target(*args, **kwargs)` on the main thread and return its result.
///
/// Blocks the calling thread for the whole main-thread execution. A fault
/// raised by the target comes back unchanged; a panic comes back as a
/// `Panic` fault. Executor failures are returned as per-call errors.
pub fn invoke(executor: &dyn MainThreadExecutor, target: &Callable, args: CallArgs) -> Result<Value> {
    let slot: ResultSlot<std::result::Result<Value, Fault>> = ResultSlot::new();
    let writer = slot.clone();
    let callable = target.clone();

    trace!("Marshaling {} onto the main thread", target.name());
    let submitted = executor.execute_sync(
        ExecMode::Write,
        Box::new(move || {
            writer.fill(callable.call(&args));
        }),
    );

    match submitted {
        Ok(()) => {}
        Err(ExecutorError::Panicked(message)) => {
            return Err(BridgeError::Fault(Fault::new("Panic", message)));
        }
        Err(e) => {
            warn!("Call to {} did not reach the main thread: {}", target.name(), e);
            return Err(e.into());
        }
    }

    match slot.take() {
        Some(Ok(value)) => Ok(value),
        Some(Err(fault)) => Err(BridgeError::Fault(fault)),
        None => Err(ExecutorError::Abandoned.into()),
    }
}

/// Resolve `name` on `target` through the session, then [`invoke`] it.
///
/// Object references in `args` are resolved against `conn` before the call,
/// and host objects in the result are boxed back into references. Resolution
/// errors (missing attribute, access denied, unknown object) are returned as
/// the session reports them.
pub fn invoke_attr(
    conn: &Connection,
    executor: &dyn MainThreadExecutor,
    target: ObjectId,
    name: &str,
    args: CallArgs,
) -> Result<Value> {
    let member = conn.resolve_attribute(target, name)?;
    let callable = Connection::member_callable(&member)?;
    let args = conn.resolve_args(args)?;
    Ok(conn.export(invoke(executor, &callable, args)?))
}

/// Route a connection's `call` and `callattr` through the main thread.
///
/// Call once per connection, from the service's `on_connect`.
pub fn install(table: &mut DispatchTable, executor: Arc<dyn MainThreadExecutor>) {
    let call_executor = executor.clone();
    table.bind(OpCode::Call, move |conn, params| {
        let p: CallParams = parse_params(OpCode::Call, params)?;
        let callable = conn.resolve_callable(p.target)?;
        let args = conn.resolve_args(CallArgs {
            args: p.args,
            kwargs: p.kwargs,
        })?;
        Ok(conn.export(invoke(call_executor.as_ref(), &callable, args)?))
    });

    table.bind(OpCode::CallAttr, move |conn, params| {
        let p: CallAttrParams = parse_params(OpCode::CallAttr, params)?;
        invoke_attr(
            conn,
            executor.as_ref(),
            p.target,
            &p.name,
            CallArgs {
                args: p.args,
                kwargs: p.kwargs,
            },
        )
    });
}
