// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `http_request` handler (§4.6): outbound HTTP on the caller's behalf, with
//! secret injection, a capped streamed body read, and a bounded redirect
//! policy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::application::vault::VaultHandle;
use crate::domain::handler::{HandlerContext, HandlerOutcome, HandlerSuccess, MethodHandler, SandboxHints};
use crate::domain::rpc::JsonRpcError;

#[derive(Debug, Deserialize)]
struct HttpRequestParams {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct HttpRequestHandler {
    pub client: reqwest::Client,
    pub max_response_bytes: u64,
    pub vault: Arc<dyn VaultHandle>,
}

#[async_trait]
impl MethodHandler for HttpRequestHandler {
    async fn handle(&self, ctx: &HandlerContext, params: serde_json::Value, _hints: &SandboxHints) -> HandlerOutcome {
        let params: HttpRequestParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        let method = reqwest::Method::from_bytes(params.method.as_bytes())
            .map_err(|_| JsonRpcError::invalid_params(format!("invalid HTTP method: {}", params.method)))?;
        let mut builder = self.client.request(method, &params.url);
        for (name, value) in &params.headers {
            builder = builder.header(name, value);
        }
        if let Some(policy_id) = &ctx.matched_policy_id {
            match self.vault.resolve_injections(policy_id).await {
                Ok(injections) => {
                    for (header_name, value) in injections {
                        builder = builder.header(&header_name, String::from_utf8_lossy(&value).into_owned());
                    }
                }
                Err(crate::application::vault::VaultError::Locked) => {} // §4.6: injection is best-effort, not a hard gate on the request itself
                Err(_) => return Err(JsonRpcError::internal_error("failed to resolve secret injections")),
            }
        }
        if let Some(body) = &params.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| JsonRpcError::invalid_params(format!("request failed: {e}")))?;
        let status = response.status().as_u16();

        let mut collected = Vec::new();
        let mut truncated = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| JsonRpcError::invalid_params(format!("error reading response body: {e}")))?;
            if collected.len() as u64 + chunk.len() as u64 > self.max_response_bytes {
                let remaining = self.max_response_bytes.saturating_sub(collected.len() as u64) as usize;
                collected.extend_from_slice(&chunk[..remaining.min(chunk.len())]);
                truncated = true;
                break;
            }
            collected.extend_from_slice(&chunk);
        }

        let success = HandlerSuccess::new(json!({
            "status": status,
            "body": String::from_utf8_lossy(&collected),
            "truncated": truncated,
        }));
        Ok(if truncated {
            success.with_note("response body truncated to max_body_bytes")
        } else {
            success
        })
    }
}
