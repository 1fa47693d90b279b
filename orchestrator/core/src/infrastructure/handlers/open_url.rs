// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `open_url` handler (§4.6): a GET-only variant of `http_request` for
//! agents that only need to fetch a page, not issue arbitrary methods.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::domain::handler::{HandlerContext, HandlerOutcome, HandlerSuccess, MethodHandler, SandboxHints};
use crate::domain::rpc::JsonRpcError;

#[derive(Debug, Deserialize)]
struct OpenUrlParams {
    url: String,
}

pub struct OpenUrlHandler {
    pub client: reqwest::Client,
    pub max_response_bytes: u64,
}

#[async_trait]
impl MethodHandler for OpenUrlHandler {
    async fn handle(&self, _ctx: &HandlerContext, params: serde_json::Value, _hints: &SandboxHints) -> HandlerOutcome {
        let params: OpenUrlParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        let response = self
            .client
            .get(&params.url)
            .send()
            .await
            .map_err(|e| JsonRpcError::invalid_params(format!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();

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
            "final_url": final_url,
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
