// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `file_read` / `file_list` / `file_write` handlers (§4.7).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::domain::handler::{HandlerContext, HandlerOutcome, HandlerSuccess, MethodHandler, SandboxHints};
use crate::domain::rpc::JsonRpcError;

#[derive(Debug, Deserialize)]
struct FileReadParams {
    path: String,
    #[serde(default)]
    binary: bool,
}

#[derive(Debug, Deserialize)]
struct FileListParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FileWriteParams {
    path: String,
    content: String,
    #[serde(default)]
    binary: bool,
}

/// Resolves `path` after symlink expansion and checks it stays inside
/// `workspace_root`; a path that escapes is a policy violation, not a
/// handler failure (§4.7 — recorded as `denied` with a `path-traversal`
/// reason, handled by the caller via the returned error).
fn canonicalize_within_workspace(path: &str, workspace_root: &Path) -> Result<PathBuf, JsonRpcError> {
    let candidate = Path::new(path);
    let resolved = std::fs::canonicalize(candidate)
        .map_err(|e| JsonRpcError::invalid_params(format!("cannot resolve path: {e}")))?;
    let workspace = std::fs::canonicalize(workspace_root)
        .map_err(|e| JsonRpcError::internal_error(format!("cannot resolve workspace root: {e}")))?;
    if !resolved.starts_with(&workspace) {
        return Err(JsonRpcError::policy_denied("path escapes workspace root (path-traversal)"));
    }
    Ok(resolved)
}

pub struct FileReadHandler {
    pub max_bytes: u64,
}

#[async_trait]
impl MethodHandler for FileReadHandler {
    async fn handle(&self, _ctx: &HandlerContext, params: serde_json::Value, hints: &SandboxHints) -> HandlerOutcome {
        let params: FileReadParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
        let workspace_root = hints
            .workspace_override
            .clone()
            .ok_or_else(|| JsonRpcError::internal_error("no workspace root in sandbox hints"))?;
        let resolved = canonicalize_within_workspace(&params.path, &workspace_root)?;

        let bytes = std::fs::read(&resolved).map_err(|e| JsonRpcError::invalid_params(format!("read failed: {e}")))?;
        let truncated = bytes.len() as u64 > self.max_bytes;
        let capped = if truncated {
            &bytes[..self.max_bytes as usize]
        } else {
            &bytes[..]
        };

        let result = if params.binary {
            json!({ "content": base64::engine::general_purpose::STANDARD.encode(capped), "encoding": "base64", "truncated": truncated })
        } else {
            let text = String::from_utf8_lossy(capped).into_owned();
            json!({ "content": text, "encoding": "utf-8", "truncated": truncated })
        };

        let success = HandlerSuccess::new(result);
        Ok(if truncated {
            success.with_note("output truncated to max_output_bytes")
        } else {
            success
        })
    }
}

pub struct FileListHandler;

#[async_trait]
impl MethodHandler for FileListHandler {
    async fn handle(&self, _ctx: &HandlerContext, params: serde_json::Value, hints: &SandboxHints) -> HandlerOutcome {
        let params: FileListParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
        let workspace_root = hints
            .workspace_override
            .clone()
            .ok_or_else(|| JsonRpcError::internal_error("no workspace root in sandbox hints"))?;
        let resolved = canonicalize_within_workspace(&params.path, &workspace_root)?;

        let entries = std::fs::read_dir(&resolved)
            .map_err(|e| JsonRpcError::invalid_params(format!("list failed: {e}")))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();

        Ok(HandlerSuccess::new(json!({ "entries": entries })))
    }
}

pub struct FileWriteHandler {
    pub max_bytes: u64,
}

#[async_trait]
impl MethodHandler for FileWriteHandler {
    async fn handle(&self, _ctx: &HandlerContext, params: serde_json::Value, hints: &SandboxHints) -> HandlerOutcome {
        let params: FileWriteParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
        let workspace_root = hints
            .workspace_override
            .clone()
            .ok_or_else(|| JsonRpcError::internal_error("no workspace root in sandbox hints"))?;

        let candidate = Path::new(&params.path);
        if let Some(parent) = candidate.parent() {
            if parent.exists() {
                canonicalize_within_workspace(&parent.to_string_lossy(), &workspace_root)?;
            }
        }

        let bytes = if params.binary {
            base64::engine::general_purpose::STANDARD
                .decode(&params.content)
                .map_err(|e| JsonRpcError::invalid_params(format!("invalid base64 content: {e}")))?
        } else {
            params.content.into_bytes()
        };
        if bytes.len() as u64 > self.max_bytes {
            return Err(JsonRpcError::resource_limit("write exceeds max_body_bytes"));
        }

        std::fs::write(candidate, &bytes).map_err(|e| JsonRpcError::invalid_params(format!("write failed: {e}")))?;
        Ok(HandlerSuccess::new(json!({ "bytes_written": bytes.len() })))
    }
}
