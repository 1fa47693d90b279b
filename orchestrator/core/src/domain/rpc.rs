// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! JSON-RPC 2.0 wire types (§6 "Wire: JSON-RPC 2.0").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard JSON-RPC codes plus the reserved domain range used by this
/// broker.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Reserved domain-error range (§6, §7).
    pub const POLICY_DENIED: i64 = -32001;
    pub const VAULT_LOCKED: i64 = -32002;
    pub const CHANNEL_RESTRICTED: i64 = -32003;
    pub const DEADLINE_EXCEEDED: i64 = -32004;
    pub const RESOURCE_LIMIT: i64 = -32005;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Builds a request with `jsonrpc: "2.0"` filled in, for the client side
    /// of the wire (the broker itself only ever deserializes these).
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(error_codes::PARSE_ERROR, "parse error")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message.into())
    }

    pub fn policy_denied(reason: impl Into<String>) -> Self {
        Self::new(error_codes::POLICY_DENIED, reason.into())
    }

    pub fn vault_locked() -> Self {
        Self::new(error_codes::VAULT_LOCKED, "vault is locked")
    }

    pub fn channel_restricted(method: &str) -> Self {
        Self::new(
            error_codes::CHANNEL_RESTRICTED,
            format!("operation not allowed over HTTP fallback: {}", method),
        )
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(error_codes::DEADLINE_EXCEEDED, "request deadline exceeded")
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(error_codes::RESOURCE_LIMIT, message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_omits_error_field() {
        let resp = JsonRpcResponse::success(Value::from(1), serde_json::json!({"ok": true}));
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("result").is_some());
    }

    #[test]
    fn failure_response_omits_result_field() {
        let resp = JsonRpcResponse::failure(Value::from(1), JsonRpcError::vault_locked());
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], error_codes::VAULT_LOCKED);
    }
}
