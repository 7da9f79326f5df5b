//! Per-connection dispatch table and the session's default handlers.
//!
//! Every connection gets its own table, built fresh from
//! [`DispatchTable::with_defaults`] and adjusted by the service's
//! `on_connect` hook before the connection serves its first request. There
//! is no process-wide table to patch.
//!
//! The default handlers run on whatever thread dispatches the request. For
//! `call` and `callattr` that means the network thread, which is exactly what
//! the main-thread service replaces.

use crate::callable::CallArgs;
use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::object::Member;
use crate::protocol::{
    parse_params, AttrParams, CallAttrParams, CallParams, OpCode, SetAttrParams, TargetParams,
};
use crate::table::Remote;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A request handler bound to one operation code.
pub type Handler = Arc<dyn Fn(&Connection, &serde_json::Value) -> Result<Value> + Send + Sync>;

/// Mapping from operation code to handler.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<OpCode, Handler>,
}

impl DispatchTable {
    /// A table with no handlers at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table with the session's default handler for every operation.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.bind(OpCode::Ping, handle_ping);
        table.bind(OpCode::Close, handle_close);
        table.bind(OpCode::GetRoot, handle_getroot);
        table.bind(OpCode::GetAttr, handle_getattr);
        table.bind(OpCode::SetAttr, handle_setattr);
        table.bind(OpCode::DelAttr, handle_delattr);
        table.bind(OpCode::Call, handle_call);
        table.bind(OpCode::CallAttr, handle_callattr);
        table.bind(OpCode::Repr, handle_repr);
        table.bind(OpCode::Str, handle_str);
        table.bind(OpCode::Dir, handle_dir);
        table.bind(OpCode::Del, handle_del);
        table.bind(OpCode::Inspect, handle_inspect);
        table
    }

    /// Bind `handler` to `op`, returning the handler it replaces.
    pub fn bind<F>(&mut self, op: OpCode, handler: F) -> Option<Handler>
    where
        F: Fn(&Connection, &serde_json::Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(op, Arc::new(handler))
    }

    pub fn unbind(&mut self, op: OpCode) -> Option<Handler> {
        self.handlers.remove(&op)
    }

    pub fn get(&self, op: OpCode) -> Option<&Handler> {
        self.handlers.get(&op)
    }

    pub fn contains(&self, op: OpCode) -> bool {
        self.handlers.contains_key(&op)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<&str> = self.handlers.keys().map(OpCode::as_str).collect();
        ops.sort_unstable();
        f.debug_struct("DispatchTable").field("ops", &ops).finish()
    }
}

// ============================================================================
// Default handlers
// ============================================================================

fn handle_ping(_conn: &Connection, _params: &serde_json::Value) -> Result<Value> {
    Ok(Value::from("pong"))
}

fn handle_close(conn: &Connection, _params: &serde_json::Value) -> Result<Value> {
    conn.close();
    Ok(Value::None)
}

fn handle_getroot(conn: &Connection, _params: &serde_json::Value) -> Result<Value> {
    Ok(conn.objects().box_member(Member::Object(conn.root().clone())))
}

fn handle_getattr(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: AttrParams = parse_params(OpCode::GetAttr, params)?;
    let member = conn.resolve_attribute(p.target, &p.name)?;
    Ok(conn.objects().box_member(member))
}

fn handle_setattr(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: SetAttrParams = parse_params(OpCode::SetAttr, params)?;
    conn.check_attribute_access(&p.name)?;
    if !conn.policy().allow_setattr {
        return Err(BridgeError::AccessDenied { name: p.name });
    }

    let object = conn.resolve_object(p.target)?;
    let member = match conn.objects().resolve_value(p.value)? {
        Value::Remote(Remote::Object(object)) => Member::Object(object),
        Value::Remote(Remote::Callable(callable)) => Member::Method(callable),
        value => Member::Value(value),
    };
    object.set(p.name, member);
    Ok(Value::None)
}

fn handle_delattr(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: AttrParams = parse_params(OpCode::DelAttr, params)?;
    conn.check_attribute_access(&p.name)?;
    if !conn.policy().allow_delattr {
        return Err(BridgeError::AccessDenied { name: p.name });
    }

    let object = conn.resolve_object(p.target)?;
    match object.remove(&p.name) {
        Some(_) => Ok(Value::None),
        None => Err(BridgeError::AttributeNotFound {
            type_name: object.type_name().to_string(),
            name: p.name,
        }),
    }
}

/// Runs the target on the dispatching thread.
fn handle_call(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: CallParams = parse_params(OpCode::Call, params)?;
    let callable = conn.resolve_callable(p.target)?;
    let args = conn.resolve_args(CallArgs {
        args: p.args,
        kwargs: p.kwargs,
    })?;
    Ok(conn.export(callable.call(&args)?))
}

/// Resolves and runs the target on the dispatching thread.
fn handle_callattr(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: CallAttrParams = parse_params(OpCode::CallAttr, params)?;
    let member = conn.resolve_attribute(p.target, &p.name)?;
    let callable = Connection::member_callable(&member)?;
    let args = conn.resolve_args(CallArgs {
        args: p.args,
        kwargs: p.kwargs,
    })?;
    Ok(conn.export(callable.call(&args)?))
}

fn handle_repr(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: TargetParams = parse_params(OpCode::Repr, params)?;
    Ok(Value::Str(conn.objects().get(p.target)?.repr()))
}

fn handle_str(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: TargetParams = parse_params(OpCode::Str, params)?;
    let remote = conn.objects().get(p.target)?;
    Ok(Value::Str(match remote {
        Remote::Object(object) => object.repr(),
        Remote::Callable(callable) => callable.name().to_string(),
    }))
}

fn handle_dir(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: TargetParams = parse_params(OpCode::Dir, params)?;
    let names = match conn.objects().get(p.target)? {
        Remote::Object(object) => object.names(),
        Remote::Callable(_) => Vec::new(),
    };
    Ok(Value::List(
        names
            .into_iter()
            .filter(|name| conn.check_attribute_access(name).is_ok())
            .map(Value::Str)
            .collect(),
    ))
}

fn handle_del(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: TargetParams = parse_params(OpCode::Del, params)?;
    Ok(Value::Bool(conn.objects().release(p.target)?))
}

fn handle_inspect(conn: &Connection, params: &serde_json::Value) -> Result<Value> {
    let p: TargetParams = parse_params(OpCode::Inspect, params)?;
    let remote = conn.objects().get(p.target)?;

    let mut members = BTreeMap::new();
    if let Remote::Object(object) = &remote {
        for name in object.names() {
            if conn.check_attribute_access(&name).is_err() {
                continue;
            }
            if let Some(member) = object.get(&name) {
                members.insert(name, Value::from(member.type_name()));
            }
        }
    }

    let mut info = BTreeMap::new();
    info.insert("type".to_string(), Value::from(remote.type_name()));
    info.insert(
        "callable".to_string(),
        Value::Bool(remote.as_callable().is_some()),
    );
    info.insert("members".to_string(), Value::Dict(members));
    Ok(Value::Dict(info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_opcode() {
        let table = DispatchTable::with_defaults();
        for op in OpCode::ALL {
            assert!(table.contains(op), "missing default handler for {}", op);
        }
        assert_eq!(table.len(), OpCode::ALL.len());
    }

    #[test]
    fn test_bind_returns_previous() {
        let mut table = DispatchTable::with_defaults();
        let previous = table.bind(OpCode::Ping, |_, _| Ok(Value::from("custom")));
        assert!(previous.is_some());

        let mut empty = DispatchTable::empty();
        assert!(empty.bind(OpCode::Ping, |_, _| Ok(Value::None)).is_none());
        assert!(empty.unbind(OpCode::Ping).is_some());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_tables_are_independent() {
        let mut patched = DispatchTable::with_defaults();
        let pristine = DispatchTable::with_defaults();
        patched.unbind(OpCode::Call);
        assert!(!patched.contains(OpCode::Call));
        assert!(pristine.contains(OpCode::Call));
    }
}
