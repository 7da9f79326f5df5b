//! TCP transport for connections.
//!
//! Length-prefixed JSON-RPC 2.0 over TCP. Each accepted socket becomes one
//! [`Connection`](crate::connection::Connection).
//!
//! - **Server**: accepts sockets, opens a connection per socket, dispatches requests
//! - **Client**: async client with one helper per operation
//! - **Protocol**: framing and JSON-RPC types shared by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::{RpcErrorObject, RpcRequest, RpcResponse};
pub use server::{RpcServer, RpcServerHandle};
