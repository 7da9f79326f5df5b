//! TCP server exposing a [`Service`] over framed JSON-RPC.
//!
//! # Threading
//!
//! The accept loop and socket I/O run on the tokio runtime, one task per
//! connection. Requests on a connection are handled in order, and each
//! dispatch runs on a blocking worker (`spawn_blocking`) because handlers
//! may block for as long as the host's main thread takes to get to them.
//! That worker is the network thread the main-thread service marshals away
//! from.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::{RpcConfig, ServerConfig};
use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::service::Service;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running server. Dropping shuts it down.
pub struct RpcServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    active_connections: Arc<AtomicUsize>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Stop accepting and tell every connection to finish.
    ///
    /// A request already being dispatched runs to completion.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub struct RpcServer;

impl RpcServer {
    /// Bind to the configured address and start serving in background tasks.
    pub async fn start(service: Arc<dyn Service>, config: &ServerConfig) -> Result<RpcServerHandle> {
        let bind_address = config.bind_address();
        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(|e| BridgeError::Io {
                message: format!("Failed to bind {}: {}", bind_address, e),
                source: Some(e),
            })?;
        let addr = listener.local_addr()?;

        info!("Server is listening at {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            service,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections.clone(),
        ));

        Ok(RpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            active_connections,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        service: Arc<dyn Service>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        let next_id = AtomicU64::new(1);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::SeqCst);
                            if current >= RpcConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    RpcConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::SeqCst);
                            let id = next_id.fetch_add(1, Ordering::Relaxed);
                            let service = service.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection {} from {}", id, peer_addr);
                                let conn = Connection::open(id, service.as_ref());
                                if let Err(e) =
                                    Self::handle_connection(stream, &conn, &mut conn_shutdown).await
                                {
                                    debug!("Connection {} ended: {}", id, e);
                                }
                                service.on_disconnect(&conn);
                                conn.close();
                                conns.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        conn: &Arc<Connection>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();

        while !conn.is_closed() {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            let response = Self::process_request(conn, &frame).await;
            let response_bytes = serde_json::to_vec(&response)?;
            write_frame(&mut writer, &response_bytes).await?;
        }
        Ok(())
    }

    async fn process_request(conn: &Arc<Connection>, frame: &[u8]) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_slice(frame) {
            Ok(req) => req,
            Err(e) => {
                return RpcResponse::error(None, -32700, format!("Parse error: {}", e));
            }
        };

        if request.jsonrpc != "2.0" {
            return RpcResponse::error(
                request.id,
                -32600,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            );
        }

        let params = request
            .params
            .unwrap_or(serde_json::Value::Object(Default::default()));
        let method = request.method;
        let worker_conn = conn.clone();

        let outcome =
            tokio::task::spawn_blocking(move || worker_conn.dispatch(&method, &params)).await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => Err(BridgeError::Other(format!("Dispatch worker failed: {}", e))),
        };
        match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
            Ok(value) => RpcResponse::success(request.id, value),
            Err(e) => {
                debug!("Connection {} request failed: {}", conn.id(), e);
                RpcResponse::from_error(request.id, &e)
            }
        }
    }
}
