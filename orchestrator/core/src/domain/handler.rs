// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Handler contract shared by the two RPC front ends (§4.1 item 1, §4.5–4.7).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::audit::Channel;
use super::policy::{EgressMode, FsOp};
use super::rpc::JsonRpcError;

/// The closed set of RPC methods this broker dispatches (§4.1 "Dispatch",
/// §9 "Duck-typed request/response records" — every RPC parameter object is
/// a tagged variant selected by method name; unknown fields are rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    HttpRequest,
    FileRead,
    FileList,
    FileWrite,
    Exec,
    OpenUrl,
    SecretInject,
    Ping,
}

impl Method {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "http_request" => Method::HttpRequest,
            "file_read" => Method::FileRead,
            "file_list" => Method::FileList,
            "file_write" => Method::FileWrite,
            "exec" => Method::Exec,
            "open_url" => Method::OpenUrl,
            "secret_inject" => Method::SecretInject,
            "ping" => Method::Ping,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::HttpRequest => "http_request",
            Method::FileRead => "file_read",
            Method::FileList => "file_list",
            Method::FileWrite => "file_write",
            Method::Exec => "exec",
            Method::OpenUrl => "open_url",
            Method::SecretInject => "secret_inject",
            Method::Ping => "ping",
        }
    }

    /// Methods reachable over the loopback HTTP fallback (§4.2).
    pub fn allowed_over_http(&self) -> bool {
        matches!(
            self,
            Method::HttpRequest | Method::FileRead | Method::FileList | Method::OpenUrl | Method::Ping
        )
    }

    pub fn target_type(&self) -> super::policy::TargetType {
        use super::policy::TargetType;
        match self {
            Method::HttpRequest | Method::OpenUrl => TargetType::Url,
            Method::FileRead | Method::FileList | Method::FileWrite => TargetType::Filesystem,
            Method::Exec => TargetType::Command,
            Method::SecretInject | Method::Ping => TargetType::Skill,
        }
    }
}

/// Per-request context constructed before dispatch (§4.1 item 1).
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub request_id: Value,
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    pub scope: super::scope::ScopeTriple,
    /// The policy id that produced the Allow decision admitting this
    /// request, if any (`Ping` and any future policy-exempt method carry
    /// `None`). Consulted by handlers that inject linked secrets (§4.6).
    pub matched_policy_id: Option<String>,
}

/// Sandbox hints an allow decision carries through to the `exec` handler
/// (§4.3 "Sandbox hints").
#[derive(Debug, Clone, Default)]
pub struct SandboxHints {
    pub egress_mode: Option<EgressMode>,
    pub fs_ops: Option<std::collections::HashSet<FsOp>>,
    pub read_allow: Vec<std::path::PathBuf>,
    pub write_allow: Vec<std::path::PathBuf>,
    pub workspace_override: Option<std::path::PathBuf>,
    pub env_allowlist: Option<Vec<String>>,
}

/// What a handler returns to the dispatcher (§4.1 item 3).
pub type HandlerOutcome = Result<HandlerSuccess, JsonRpcError>;

#[derive(Debug, Clone)]
pub struct HandlerSuccess {
    pub result: Value,
    /// True when the handler truncated output or otherwise needs to annotate
    /// the audit entry beyond the plain success/error split.
    pub audit_note: Option<String>,
}

impl HandlerSuccess {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            audit_note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.audit_note = Some(note.into());
        self
    }
}

/// Implemented once per method by `infrastructure::handlers`; the
/// dispatcher looks one up by `Method` and invokes it after a policy allow
/// (§4.1 item 3).
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, params: Value, hints: &SandboxHints) -> HandlerOutcome;
}
