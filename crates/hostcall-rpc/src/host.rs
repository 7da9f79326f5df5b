//! Demo host application served by the binary.
//!
//! Stands in for a single-threaded host: a small database of names and
//! comments keyed by address, a counter, and an event log. All of it lives in
//! a [`ThreadBound`] owned by the thread that builds the root, so any access
//! from a network thread fails with a `ThreadAffinityError` fault.

use hostcall_core::{CallArgs, Fault, HostObject, ThreadBound, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
pub struct HostState {
    names: BTreeMap<i64, String>,
    comments: BTreeMap<i64, String>,
    counter: i64,
    events: Vec<String>,
}

impl HostState {
    fn record(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }
}

type State = Arc<ThreadBound<HostState>>;

/// Build the root object. Must run on the host's main thread.
pub fn demo_root() -> Arc<HostObject> {
    let state: State = Arc::new(ThreadBound::new(HostState::default()));
    let main_thread = state.owner();

    HostObject::builder("HostApp")
        .repr("<HostApp>")
        .value("name", "hostcall demo")
        .method("add", add)
        .method("echo", |args| Ok(args.require(0, "value")?.clone()))
        .method("type_of", |args| {
            Ok(Value::from(args.require(0, "value")?.type_name()))
        })
        .method("fail", |args| {
            let message = match args.get(0, "message") {
                Some(value) => value.as_str().unwrap_or("bad").to_string(),
                None => "bad".to_string(),
            };
            Err(Fault::value_error(message))
        })
        .method("on_main_thread", move |_| {
            Ok(Value::Bool(thread::current().id() == main_thread))
        })
        .method("sleep_ms", {
            let state = state.clone();
            move |args| {
                let ms = args.int(0, "ms")?;
                if ms < 0 {
                    return Err(Fault::value_error("sleep length must be non-negative"));
                }
                state.with(|s| {
                    thread::sleep(Duration::from_millis(ms as u64));
                    s.record(format!("slept {}ms", ms));
                    Value::None
                })
            }
        })
        .method("events", {
            let state = state.clone();
            move |_| state.with(|s| Value::from(s.events.clone()))
        })
        .object("counter", counter(state.clone()))
        .object("db", database(state))
        .build()
}

fn add(args: &CallArgs) -> Result<Value, Fault> {
    let a = args.require(0, "a")?;
    let b = args.require(1, "b")?;
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| Fault::new("OverflowError", "integer addition overflowed")),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        _ => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => Err(Fault::type_error(format!(
                "unsupported operand types for +: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn counter(state: State) -> Arc<HostObject> {
    let inc = state.clone();
    let value = state.clone();
    HostObject::builder("Counter")
        .method("increment", move |args| {
            let step = match args.get(0, "step") {
                Some(_) => args.int(0, "step")?,
                None => 1,
            };
            inc.with(|s| {
                s.counter = s
                    .counter
                    .checked_add(step)
                    .ok_or_else(|| Fault::new("OverflowError", "counter overflowed"))?;
                s.record(format!("counter -> {}", s.counter));
                debug!("Counter incremented to {}", s.counter);
                Ok::<_, Fault>(Value::Int(s.counter))
            })?
        })
        .method("value", move |_| value.with(|s| Value::Int(s.counter)))
        .method("reset", move |_| {
            state.with(|s| {
                s.counter = 0;
                s.record("counter reset");
                Value::None
            })
        })
        .build()
}

fn database(state: State) -> Arc<HostObject> {
    let set_name = state.clone();
    let get_name = state.clone();
    let set_comment = state.clone();
    let get_comment = state.clone();

    HostObject::builder("Database")
        .method("set_name", move |args| {
            let address = args.int(0, "address")?;
            let name = args.str(1, "name")?.to_string();
            if name.is_empty() {
                return Err(Fault::value_error("name must not be empty"));
            }
            set_name.with(|s| {
                s.record(format!("name {:#x} = {}", address, name));
                s.names.insert(address, name);
                Value::Bool(true)
            })
        })
        .method("get_name", move |args| {
            let address = args.int(0, "address")?;
            get_name.with(|s| Value::from(s.names.get(&address).cloned()))
        })
        .method("set_comment", move |args| {
            let address = args.int(0, "address")?;
            let comment = args.str(1, "comment")?.to_string();
            set_comment.with(|s| {
                if comment.is_empty() {
                    s.comments.remove(&address);
                } else {
                    s.comments.insert(address, comment);
                }
                Value::None
            })
        })
        .method("get_comment", move |args| {
            let address = args.int(0, "address")?;
            get_comment.with(|s| Value::from(s.comments.get(&address).cloned()))
        })
        .method("names", move |_| {
            state.with(|s| {
                Value::List(
                    s.names
                        .iter()
                        .map(|(address, name)| {
                            Value::List(vec![Value::Int(*address), Value::Str(name.clone())])
                        })
                        .collect(),
                )
            })
        })
        .build()
}
