//! Async client for a hostcall server.
//!
//! [`RpcClient::call`] sends one raw request. The typed helpers wrap each
//! operation and decode the result into a [`Value`]. Errors the server
//! reports come back as [`BridgeError`]s; host faults keep their kind and
//! message.
//!
//! # Thread Safety
//!
//! The stream sits behind a tokio `Mutex`, so one client can be shared
//! between tasks. Requests from those tasks are serialized.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::callable::CallArgs;
use crate::config::RpcConfig;
use crate::error::{BridgeError, Result};
use crate::protocol::{AttrParams, CallAttrParams, CallParams, SetAttrParams, TargetParams};
use crate::value::{ObjectId, Value};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct RpcClient {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Connect within `RpcConfig::CONNECT_TIMEOUT`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(RpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| BridgeError::Io {
                message: format!("Timed out connecting to {}", addr),
                source: None,
            })?
            .map_err(|e| BridgeError::Io {
                message: format!("Failed to connect to {}: {}", addr, e),
                source: Some(e),
            })?;

        debug!("Client connected to {}", addr);

        Ok(Self {
            stream: Mutex::new(stream),
            addr,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let request_bytes = serde_json::to_vec(&request)?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes).await?;
        let response_bytes = read_frame(&mut reader).await?.ok_or_else(|| BridgeError::Io {
            message: format!("Server at {} closed the connection", self.addr),
            source: None,
        })?;

        let response: RpcResponse =
            serde_json::from_slice(&response_bytes).map_err(|e| BridgeError::Json {
                message: format!("Failed to parse response: {}", e),
                source: Some(e),
            })?;

        // A null id is only legal on an error the server could not attribute.
        let matches = match &response.id {
            None | Some(serde_json::Value::Null) => response.error.is_some(),
            Some(other) => *other == serde_json::Value::from(id),
        };
        if !matches {
            return Err(BridgeError::Protocol {
                message: format!(
                    "response id {} does not match request id {}",
                    response.id.unwrap_or(serde_json::Value::Null),
                    id
                ),
            });
        }

        if let Some(err) = response.error {
            return Err(err.into_error());
        }
        response.result.ok_or_else(|| BridgeError::Protocol {
            message: "response missing result".to_string(),
        })
    }

    async fn request<P: Serialize>(&self, method: &str, params: &P) -> Result<Value> {
        let raw = self.call(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(raw)?)
    }

    pub async fn ping(&self) -> Result<()> {
        self.call("ping", serde_json::json!({})).await.map(|_| ())
    }

    /// Reference to the service's root object.
    pub async fn root(&self) -> Result<ObjectId> {
        let raw = self.call("getroot", serde_json::json!({})).await?;
        let value: Value = serde_json::from_value(raw)?;
        value.as_ref_id().ok_or_else(|| BridgeError::Protocol {
            message: format!("getroot returned {} instead of a reference", value.type_name()),
        })
    }

    pub async fn getattr(&self, target: ObjectId, name: &str) -> Result<Value> {
        let params = AttrParams {
            target,
            name: name.to_string(),
        };
        self.request("getattr", &params).await
    }

    pub async fn setattr(&self, target: ObjectId, name: &str, value: impl Into<Value>) -> Result<()> {
        let params = SetAttrParams {
            target,
            name: name.to_string(),
            value: value.into(),
        };
        self.request("setattr", &params).await.map(|_| ())
    }

    pub async fn delattr(&self, target: ObjectId, name: &str) -> Result<()> {
        let params = AttrParams {
            target,
            name: name.to_string(),
        };
        self.request("delattr", &params).await.map(|_| ())
    }

    /// Call a referenced callable.
    pub async fn call_ref(&self, target: ObjectId, args: CallArgs) -> Result<Value> {
        let params = CallParams {
            target,
            args: args.args,
            kwargs: args.kwargs,
        };
        self.request("call", &params).await
    }

    /// Call attribute `name` of a referenced object.
    pub async fn callattr(&self, target: ObjectId, name: &str, args: CallArgs) -> Result<Value> {
        let params = CallAttrParams {
            target,
            name: name.to_string(),
            args: args.args,
            kwargs: args.kwargs,
        };
        self.request("callattr", &params).await
    }

    pub async fn repr(&self, target: ObjectId) -> Result<String> {
        self.string_op("repr", target).await
    }

    pub async fn str(&self, target: ObjectId) -> Result<String> {
        self.string_op("str", target).await
    }

    pub async fn dir(&self, target: ObjectId) -> Result<Vec<String>> {
        match self.request("dir", &TargetParams { target }).await? {
            Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(name) => Ok(name),
                    other => Err(unexpected("dir", &other)),
                })
                .collect(),
            other => Err(unexpected("dir", &other)),
        }
    }

    /// Release a reference. Returns whether it was the last one.
    pub async fn del(&self, target: ObjectId) -> Result<bool> {
        match self.request("del", &TargetParams { target }).await? {
            Value::Bool(released) => Ok(released),
            other => Err(unexpected("del", &other)),
        }
    }

    /// Type, callability and visible members of a referenced object.
    pub async fn inspect(&self, target: ObjectId) -> Result<Value> {
        self.request("inspect", &TargetParams { target }).await
    }

    /// Ask the server to end this session.
    pub async fn close(&self) -> Result<()> {
        self.call("close", serde_json::json!({})).await.map(|_| ())
    }

    async fn string_op(&self, method: &str, target: ObjectId) -> Result<String> {
        match self.request(method, &TargetParams { target }).await? {
            Value::Str(s) => Ok(s),
            other => Err(unexpected(method, &other)),
        }
    }
}

fn unexpected(method: &str, value: &Value) -> BridgeError {
    BridgeError::Protocol {
        message: format!("{} returned unexpected {}", method, value.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::Fault;
    use crate::config::ServerConfig;
    use crate::object::HostObject;
    use crate::rpc::server::{RpcServer, RpcServerHandle};
    use crate::service::{MainThreadService, Service, SlaveService};
    use crate::testing::MainThread;
    use std::sync::Arc;

    fn root() -> Arc<HostObject> {
        HostObject::builder("Root")
            .value("version", "1.0")
            .method("add", |args| Ok(Value::Int(args.int(0, "a")? + args.int(1, "b")?)))
            .method("fail", |_| Err(Fault::value_error("bad")))
            .object("child", HostObject::builder("Child").repr("<child>").build())
            .build()
    }

    async fn serve(service: Arc<dyn Service>) -> (RpcServerHandle, RpcClient) {
        let config = ServerConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let handle = RpcServer::start(service, &config).await.unwrap();
        let client = RpcClient::connect(handle.addr()).await.unwrap();
        (handle, client)
    }

    #[tokio::test]
    async fn test_callattr_and_call_ref() {
        let (mut handle, client) = serve(Arc::new(SlaveService::new(root()))).await;
        let root = client.root().await.unwrap();

        let sum = client
            .callattr(root, "add", CallArgs::new().arg(41i64).arg(1i64))
            .await
            .unwrap();
        assert_eq!(sum, Value::Int(42));

        let add = client.getattr(root, "add").await.unwrap().as_ref_id().unwrap();
        let sum = client
            .call_ref(add, CallArgs::new().arg(2i64).kwarg("b", 3i64))
            .await
            .unwrap();
        assert_eq!(sum, Value::Int(5));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_remote_fault_rebuilt() {
        let (mut handle, client) = serve(Arc::new(SlaveService::new(root()))).await;
        let root = client.root().await.unwrap();

        let err = client.callattr(root, "fail", CallArgs::new()).await.unwrap_err();
        let fault = err.fault().unwrap();
        assert_eq!(fault.kind, "ValueError");
        assert_eq!(fault.message, "bad");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_introspection_helpers() {
        let (mut handle, client) = serve(Arc::new(SlaveService::new(root()))).await;
        let root = client.root().await.unwrap();

        assert_eq!(client.dir(root).await.unwrap(), vec!["add", "child", "fail", "version"]);
        let child = client.getattr(root, "child").await.unwrap().as_ref_id().unwrap();
        assert_eq!(client.repr(child).await.unwrap(), "<child>");
        assert_eq!(client.str(child).await.unwrap(), "<child>");

        client.setattr(root, "limit", 5i64).await.unwrap();
        assert_eq!(client.getattr(root, "limit").await.unwrap(), Value::Int(5));
        client.delattr(root, "limit").await.unwrap();
        assert!(client.getattr(root, "limit").await.is_err());

        assert!(client.del(child).await.unwrap());
        assert!(matches!(
            client.repr(child).await,
            Err(BridgeError::Remote { code: -32004, .. })
        ));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_private_attribute_denied() {
        let (mut handle, client) = serve(Arc::new(SlaveService::new(root()))).await;
        let root = client.root().await.unwrap();

        let err = client.getattr(root, "__class__").await.unwrap_err();
        assert!(matches!(err, BridgeError::Remote { code: -32002, .. }));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_calls_through_main_thread_service() {
        let main = MainThread::spawn();
        let main_id = main.queue.main_thread_id();
        let root = HostObject::builder("Root")
            .method("on_main_thread", move |_| {
                Ok(Value::Bool(std::thread::current().id() == main_id))
            })
            .build();
        let service = MainThreadService::new(SlaveService::new(root), Arc::new(main.queue.clone()));
        let (mut handle, client) = serve(Arc::new(service)).await;

        let root = client.root().await.unwrap();
        let on_main = client.callattr(root, "on_main_thread", CallArgs::new()).await.unwrap();
        assert_eq!(on_main, Value::Bool(true));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_close_then_call_fails() {
        let (mut handle, client) = serve(Arc::new(SlaveService::new(root()))).await;
        client.ping().await.unwrap();
        client.close().await.unwrap();
        assert!(client.ping().await.is_err());
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_mismatched_response_id_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut socket).await.unwrap().unwrap();
            let request: RpcRequest = serde_json::from_slice(&request).unwrap();
            assert_eq!(request.id, Some(serde_json::json!(1)));

            let stale = RpcResponse::success(
                Some(serde_json::json!(99)),
                serde_json::json!({"kind": "str", "value": "pong"}),
            );
            write_frame(&mut socket, &serde_json::to_vec(&stale).unwrap())
                .await
                .unwrap();
        });

        let client = RpcClient::connect(addr).await.unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol { .. }), "got {:?}", err);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_to_dead_server() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let result = RpcClient::connect(addr).await;
        assert!(matches!(result, Err(BridgeError::Io { .. })));
    }
}
