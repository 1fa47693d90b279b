// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `exec` handler (§4.5, SPEC_FULL.md §4.5 expanded): PATH resolution, sandbox
//! profile lookup, launch via the host sandbox-launcher, output capping.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::application::sandbox_profile_manager::SandboxProfileManager;
use crate::domain::handler::{HandlerContext, HandlerOutcome, HandlerSuccess, MethodHandler, SandboxHints};
use crate::domain::policy::EgressMode;
use crate::domain::rpc::JsonRpcError;
use crate::domain::sandbox::SandboxProfileInputs;

/// Variables passed to the child regardless of the matched allow rule's
/// `env` whitelist (§4.5 item 4).
const STATIC_ENV_SAFE_LIST: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

#[derive(Debug, Deserialize)]
struct ExecParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

pub struct ExecHandler {
    pub path_dirs: Vec<PathBuf>,
    pub sandbox_launcher_path: PathBuf,
    pub profile_manager: SandboxProfileManager,
    pub socket_path: PathBuf,
    pub max_output_bytes: u64,
}

impl ExecHandler {
    /// Resolves `name` against the configured PATH list (not the broker's
    /// own process `PATH`), refusing a match outside those directories or
    /// through a setuid/symlink escape.
    fn resolve_binary(&self, name: &str) -> Result<PathBuf, JsonRpcError> {
        if name.contains('/') {
            return Err(JsonRpcError::invalid_params("command must be a bare name, not a path"));
        }
        for dir in &self.path_dirs {
            let candidate = dir.join(name);
            let resolved = match std::fs::canonicalize(&candidate) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if !resolved.starts_with(dir) && !self.path_dirs.iter().any(|d| resolved.starts_with(d)) {
                continue;
            }
            let metadata = match std::fs::metadata(&resolved) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if is_setuid(&metadata) {
                continue;
            }
            return Ok(resolved);
        }
        Err(JsonRpcError::invalid_params(format!("command not found on configured PATH: {name}")))
    }
}

#[cfg(unix)]
fn is_setuid(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o4000 != 0
}

#[cfg(not(unix))]
fn is_setuid(_metadata: &std::fs::Metadata) -> bool {
    false
}

fn build_env(hints: &SandboxHints) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for name in STATIC_ENV_SAFE_LIST {
        if let Ok(value) = std::env::var(name) {
            env.push((name.to_string(), value));
        }
    }
    if let Some(extra) = &hints.env_allowlist {
        for name in extra {
            if STATIC_ENV_SAFE_LIST.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = std::env::var(name) {
                env.push((name.clone(), value));
            }
        }
    }
    env
}

#[async_trait]
impl MethodHandler for ExecHandler {
    async fn handle(&self, _ctx: &HandlerContext, params: serde_json::Value, hints: &SandboxHints) -> HandlerOutcome {
        let params: ExecParams =
            serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
        let binary = self.resolve_binary(&params.command)?;

        let workspace_root = hints.workspace_override.clone().unwrap_or_else(|| PathBuf::from("/"));
        let profile_inputs = SandboxProfileInputs {
            workspace_root: workspace_root.clone(),
            socket_path: self.socket_path.clone(),
            egress_mode: hints.egress_mode.unwrap_or(EgressMode::None),
            proxy_address: None,
            read_allow: hints.read_allow.clone(),
            write_allow: hints.write_allow.clone(),
            extra_deny: Vec::new(),
        };
        let profile_path = self
            .profile_manager
            .profile_for(&profile_inputs)
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;

        let mut command = Command::new(&self.sandbox_launcher_path);
        command
            .arg(&profile_path)
            .arg(&binary)
            .args(&params.args)
            .env_clear()
            .envs(build_env(hints))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| JsonRpcError::internal_error(format!("failed to launch sandboxed process: {e}")))?;

        let mut stdout = Vec::new();
        if let Some(mut pipe) = child.stdout.take() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        let mut stderr = Vec::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| JsonRpcError::internal_error(format!("failed to wait for sandboxed process: {e}")))?;

        let truncated = stdout.len() as u64 > self.max_output_bytes;
        if truncated {
            stdout.truncate(self.max_output_bytes as usize);
        }

        let success = HandlerSuccess::new(json!({
            "exit_code": status.code(),
            "stdout": String::from_utf8_lossy(&stdout),
            "stdout_truncated": truncated,
        }))
        .with_note(String::from_utf8_lossy(&stderr).into_owned());
        Ok(success)
    }
}
