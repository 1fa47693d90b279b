// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain error taxonomy (§7 "Error handling design").

use thiserror::Error;

use super::rpc::{error_codes, JsonRpcError};

/// Errors raised by domain/application components, mapped onto the wire
/// error taxonomy by the dispatcher.
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("malformed request: {0}")]
    ClientMalformed(String),

    #[error("denied by policy{}", .policy_id.as_ref().map(|p| format!(" ({p})")).unwrap_or_default())]
    PolicyDenied { policy_id: Option<String> },

    #[error("operation not allowed over HTTP fallback: {0}")]
    ChannelRestricted(String),

    #[error("vault is locked")]
    VaultLocked,

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("handler failure: {0}")]
    HandlerFailure(String),

    #[error("infrastructure error: {0}")]
    InfrastructureFatal(String),
}

impl ShieldError {
    /// Converts a domain error into the wire-level JSON-RPC error object.
    /// Infrastructure faults are sanitised before they leave the process
    /// (§7 "Infrastructure fatal" — "externally surfaced as a generic
    /// internal error").
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            ShieldError::ClientMalformed(m) => JsonRpcError::invalid_params(m.clone()),
            ShieldError::PolicyDenied { .. } => JsonRpcError::policy_denied(self.to_string()),
            ShieldError::ChannelRestricted(method) => JsonRpcError::channel_restricted(method),
            ShieldError::VaultLocked => JsonRpcError::vault_locked(),
            ShieldError::ResourceLimit(m) => JsonRpcError::resource_limit(m.clone()),
            ShieldError::DeadlineExceeded => JsonRpcError::deadline_exceeded(),
            ShieldError::HandlerFailure(m) => JsonRpcError::new(error_codes::INTERNAL_ERROR, m.clone()),
            ShieldError::InfrastructureFatal(_) => {
                JsonRpcError::internal_error("internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_fatal_is_sanitised_on_the_wire() {
        let err = ShieldError::InfrastructureFatal("sqlite file /secret/path/shield.db corrupt".into());
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.message, "internal error");
        assert!(!rpc.message.contains("/secret/path"));
    }

    #[test]
    fn policy_denied_carries_policy_id_in_message() {
        let err = ShieldError::PolicyDenied {
            policy_id: Some("p-1".into()),
        };
        assert!(err.to_string().contains("p-1"));
    }
}
