//! Hostcall Core - run remote calls on a single-threaded host's main thread.
//!
//! A host application exposes an object graph over RPC. Requests arrive on
//! network threads, but the host's state may only be touched from its main
//! thread. This crate serves the object graph and, through
//! [`MainThreadService`], marshals every remote `call` and `callattr` onto
//! the main thread, waits for it to finish, and hands the result back.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostcall_core::{channel, HostObject, MainThreadService, RpcServer, ServerConfig, SlaveService, Value};
//! use std::sync::Arc;
//!
//! let (queue, mut main_loop) = channel();
//! let root = HostObject::builder("App")
//!     .method("add", |args| Ok(Value::Int(args.int(0, "a")? + args.int(1, "b")?)))
//!     .build();
//! let service = Arc::new(MainThreadService::new(SlaveService::new(root), Arc::new(queue)));
//!
//! std::thread::spawn(move || {
//!     tokio::runtime::Runtime::new().unwrap().block_on(async {
//!         let _server = RpcServer::start(service, &ServerConfig::default()).await.unwrap();
//!         tokio::signal::ctrl_c().await.unwrap();
//!     });
//! });
//!
//! // The host's own thread drives the queue.
//! main_loop.run();
//! ```

pub mod affinity;
pub mod callable;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod object;
pub mod protocol;
pub mod rpc;
pub mod service;
pub mod shutdown;
pub mod table;
pub mod trampoline;
pub mod value;

#[cfg(test)]
mod testing;

pub use affinity::ThreadBound;
pub use callable::{CallArgs, Callable, Fault};
pub use config::{AccessPolicy, RpcConfig, ServerConfig};
pub use connection::{Connection, ConnectionId, ConnectionSetup};
pub use dispatch::{DispatchTable, Handler};
pub use error::{BridgeError, Result};
pub use executor::{
    channel, ExecMode, ExecutorError, MainLoop, MainLoopStats, MainThreadExecutor,
    MainThreadQueue,
};
pub use object::{HostObject, HostObjectBuilder, Member};
pub use protocol::OpCode;
pub use rpc::{RpcClient, RpcServer, RpcServerHandle};
pub use service::{MainThreadService, Service, SlaveService};
pub use shutdown::ShutdownToken;
pub use table::{ObjectTable, Remote};
pub use trampoline::{invoke, invoke_attr, ResultSlot};
pub use value::{ObjectId, Value};
