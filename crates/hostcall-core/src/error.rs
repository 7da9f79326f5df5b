//! Error types for the hostcall bridge.
//!
//! `BridgeError` covers everything a single remote request can fail with:
//! faults raised by host code, attribute resolution failures reported by the
//! session, executor failures on the main-thread hop, and transport errors.
//! Each variant maps onto a JSON-RPC error code for the wire.

use crate::callable::Fault;
use crate::executor::ExecutorError;
use crate::value::ObjectId;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Host-side errors
    #[error("Remote fault: {0}")]
    Fault(Fault),

    #[error("'{type_name}' object has no attribute '{name}'")]
    AttributeNotFound { type_name: String, name: String },

    #[error("Access denied to attribute '{name}'")]
    AccessDenied { name: String },

    #[error("'{type_name}' object is not callable")]
    NotCallable { type_name: String },

    #[error("Unknown object reference: {0}")]
    UnknownObject(ObjectId),

    // Main-thread executor errors
    #[error("Main-thread executor error: {0}")]
    Executor(#[from] ExecutorError),

    // Session errors
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Operation not supported on this connection: {0}")]
    UnsupportedOpcode(String),

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),

    // Transport errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<Fault> for BridgeError {
    fn from(fault: Fault) -> Self {
        BridgeError::Fault(fault)
    }
}

impl BridgeError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes (-32000 to -32099):
    /// - -32000: Fault raised by host code
    /// - -32001: Attribute not found
    /// - -32002: Access denied
    /// - -32003: Not callable
    /// - -32004: Unknown object reference
    /// - -32005: Main-thread executor failure
    /// - -32006: Unsupported operation
    /// - -32007: Connection closed
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BridgeError::Fault(_) => -32000,
            BridgeError::AttributeNotFound { .. } => -32001,
            BridgeError::AccessDenied { .. } => -32002,
            BridgeError::NotCallable { .. } => -32003,
            BridgeError::UnknownObject(_) => -32004,
            BridgeError::Executor(_) => -32005,
            BridgeError::UnsupportedOpcode(_) => -32006,
            BridgeError::ConnectionClosed(_) => -32007,
            BridgeError::MethodNotFound(_) => -32601,
            BridgeError::InvalidParams { .. } => -32602,
            BridgeError::Json { .. } => -32700,
            BridgeError::Remote { code, .. } => *code,
            _ => -32603,
        }
    }

    /// Structured error payload carried in the JSON-RPC `error.data` field.
    ///
    /// Host faults carry their kind and message so the client can rebuild
    /// the remote exception instead of parsing the display string.
    pub fn to_rpc_error_data(&self) -> Option<serde_json::Value> {
        match self {
            BridgeError::Fault(fault) => Some(serde_json::json!({
                "kind": fault.kind,
                "message": fault.message,
            })),
            _ => None,
        }
    }

    /// Rebuild an error from a JSON-RPC error object received over the wire.
    pub fn from_rpc(code: i32, message: String, data: Option<&serde_json::Value>) -> Self {
        if code == -32000 {
            if let Some(data) = data {
                let kind = data.get("kind").and_then(|v| v.as_str());
                let msg = data.get("message").and_then(|v| v.as_str());
                if let (Some(kind), Some(msg)) = (kind, msg) {
                    return BridgeError::Fault(Fault::new(kind, msg));
                }
            }
        }
        BridgeError::Remote { code, message }
    }

    /// The host fault carried by this error, if any.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            BridgeError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_error_code_and_data() {
        let err = BridgeError::Fault(Fault::new("ValueError", "bad"));
        assert_eq!(err.to_rpc_error_code(), -32000);

        let data = err.to_rpc_error_data().unwrap();
        assert_eq!(data["kind"], "ValueError");
        assert_eq!(data["message"], "bad");
    }

    #[test]
    fn test_fault_rebuilt_from_rpc() {
        let data = serde_json::json!({"kind": "ValueError", "message": "bad"});
        let err = BridgeError::from_rpc(-32000, "Remote fault: ValueError: bad".into(), Some(&data));
        let fault = err.fault().expect("should rebuild the fault");
        assert_eq!(fault.kind, "ValueError");
        assert_eq!(fault.message, "bad");
    }

    #[test]
    fn test_other_codes_rebuild_as_remote() {
        let err = BridgeError::from_rpc(-32001, "missing".into(), None);
        assert!(matches!(err, BridgeError::Remote { code: -32001, .. }));
        assert_eq!(err.to_rpc_error_code(), -32001);
    }

    #[test]
    fn test_executor_error_code() {
        let err: BridgeError = ExecutorError::Unavailable.into();
        assert_eq!(err.to_rpc_error_code(), -32005);
        assert!(err.to_rpc_error_data().is_none());
    }

    #[test]
    fn test_attribute_error_display() {
        let err = BridgeError::AttributeNotFound {
            type_name: "Counter".into(),
            name: "missing".into(),
        };
        assert_eq!(err.to_string(), "'Counter' object has no attribute 'missing'");
    }
}
