//! JSON-RPC wire types as spoken by bchd and BCHN.
//!
//! Both nodes use the 1.0 dialect: responses carry `result`, `error` and
//! `id`, with `error: null` on success and usually no `jsonrpc` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nameindex_core::error::IndexerError;

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "1.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl From<JsonRpcError> for IndexerError {
    fn from(e: JsonRpcError) -> Self {
        IndexerError::Node {
            code: e.code,
            message: e.message,
        }
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error object as [`IndexerError::Node`].
    pub fn into_result(self) -> Result<Value, IndexerError> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A server-pushed notification (websocket only): a request without `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "getblockhash", vec![Value::from(563_720u64)]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"jsonrpc":"1.0","method":"getblockhash","params":[563720],"id":7}"#
        );
    }

    #[test]
    fn success_response_without_jsonrpc_field() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"result":600000,"error":null,"id":1}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::from(600_000u64));
    }

    #[test]
    fn error_response_maps_to_node_error() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":1}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, IndexerError::Node { code: -8, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn notification_params() {
        let note: JsonRpcNotification = serde_json::from_str(
            r#"{"jsonrpc":"1.0","method":"filteredblockconnected","params":[563721,"00ff",[]]}"#,
        )
        .unwrap();
        assert_eq!(note.method, "filteredblockconnected");
        assert_eq!(note.params[0].as_u64(), Some(563_721));
    }
}
