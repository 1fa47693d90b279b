// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `secret_inject` handler (§4.6, §3 "Secret"): returns a secret's plaintext
//! directly to the caller, gated on the matched policy actually linking to
//! that secret. Reserved socket-only (§4.2) — never reachable through the
//! HTTP fallback, so a secret value never transits the loopback surface
//! meant for unauthenticated read-only tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::application::vault::{VaultError, VaultHandle};
use crate::domain::handler::{HandlerContext, HandlerOutcome, HandlerSuccess, MethodHandler, SandboxHints};
use crate::domain::rpc::JsonRpcError;

#[derive(Debug, Deserialize)]
struct SecretInjectParams {
    name: String,
}

pub struct SecretInjectHandler {
    pub vault: Arc<dyn VaultHandle>,
}

#[async_trait]
impl MethodHandler for SecretInjectHandler {
    async fn handle(&self, ctx: &HandlerContext, params: serde_json::Value, _hints: &SandboxHints) -> HandlerOutcome {
        let params: SecretInjectParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        let metadata = self
            .vault
            .list_metadata()
            .await
            .map_err(map_vault_error)?
            .into_iter()
            .find(|s| s.name == params.name)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("unknown secret: {}", params.name)))?;

        let matched_policy_id = ctx
            .matched_policy_id
            .as_deref()
            .ok_or_else(|| JsonRpcError::policy_denied("no policy matched this request"))?;
        if metadata.is_dormant() || !metadata.linked_policy_ids.iter().any(|id| id == matched_policy_id) {
            return Err(JsonRpcError::policy_denied(format!(
                "secret `{}` is not linked to the matched policy",
                params.name
            )));
        }

        let value = self
            .vault
            .get_by_name(&params.name, &ctx.scope)
            .await
            .map_err(map_vault_error)?
            .ok_or_else(|| JsonRpcError::invalid_params(format!("unknown secret: {}", params.name)))?;

        Ok(HandlerSuccess::new(json!({
            "value": String::from_utf8_lossy(&value),
        })))
    }
}

fn map_vault_error(err: VaultError) -> JsonRpcError {
    match err {
        VaultError::Locked => JsonRpcError::vault_locked(),
        other => JsonRpcError::internal_error(other.to_string()),
    }
}
