//! Session operation codes and their request parameters.
//!
//! Each JSON-RPC `method` names one operation code; its `params` object
//! deserializes into the matching `*Params` struct.

use crate::error::{BridgeError, Result};
use crate::value::{ObjectId, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operations a client can request on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Ping,
    Close,
    GetRoot,
    GetAttr,
    SetAttr,
    DelAttr,
    Call,
    CallAttr,
    Repr,
    Str,
    Dir,
    Del,
    Inspect,
}

impl OpCode {
    pub const ALL: [OpCode; 13] = [
        OpCode::Ping,
        OpCode::Close,
        OpCode::GetRoot,
        OpCode::GetAttr,
        OpCode::SetAttr,
        OpCode::DelAttr,
        OpCode::Call,
        OpCode::CallAttr,
        OpCode::Repr,
        OpCode::Str,
        OpCode::Dir,
        OpCode::Del,
        OpCode::Inspect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::Ping => "ping",
            OpCode::Close => "close",
            OpCode::GetRoot => "getroot",
            OpCode::GetAttr => "getattr",
            OpCode::SetAttr => "setattr",
            OpCode::DelAttr => "delattr",
            OpCode::Call => "call",
            OpCode::CallAttr => "callattr",
            OpCode::Repr => "repr",
            OpCode::Str => "str",
            OpCode::Dir => "dir",
            OpCode::Del => "del",
            OpCode::Inspect => "inspect",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == method)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `call`: invoke a referenced callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    pub target: ObjectId,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

/// `callattr`: resolve `name` on `target`, then invoke it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAttrParams {
    pub target: ObjectId,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

/// `getattr` / `delattr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrParams {
    pub target: ObjectId,
    pub name: String,
}

/// `setattr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAttrParams {
    pub target: ObjectId,
    pub name: String,
    pub value: Value,
}

/// `repr`, `str`, `dir`, `del`, `inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetParams {
    pub target: ObjectId,
}

/// Deserialize a handler's params, reporting failures as invalid params.
pub fn parse_params<T: DeserializeOwned>(op: OpCode, params: &serde_json::Value) -> Result<T> {
    T::deserialize(params).map_err(|e| BridgeError::InvalidParams {
        message: format!("{}: {}", op, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_roundtrip() {
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_method(op.as_str()), Some(op));
        }
        assert_eq!(OpCode::from_method("exec"), None);
    }

    #[test]
    fn test_call_params_defaults() {
        let params: CallParams =
            parse_params(OpCode::Call, &serde_json::json!({"target": 3})).unwrap();
        assert_eq!(params.target, ObjectId(3));
        assert!(params.args.is_empty());
        assert!(params.kwargs.is_empty());
    }

    #[test]
    fn test_callattr_params_with_args() {
        let params: CallAttrParams = parse_params(
            OpCode::CallAttr,
            &serde_json::json!({
                "target": 1,
                "name": "add",
                "args": [{"kind": "int", "value": 41}],
                "kwargs": {"b": {"kind": "int", "value": 1}}
            }),
        )
        .unwrap();
        assert_eq!(params.name, "add");
        assert_eq!(params.args, vec![Value::Int(41)]);
        assert_eq!(params.kwargs.get("b"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_missing_params_are_invalid() {
        let err = parse_params::<AttrParams>(OpCode::GetAttr, &serde_json::json!({"target": 1}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams { .. }));
        assert_eq!(err.to_rpc_error_code(), -32602);
    }
}
