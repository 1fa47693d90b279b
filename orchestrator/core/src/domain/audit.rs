// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit event entity (§3 "Audit event").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Ingress path a request arrived on — governs method availability (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Socket,
    Http,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Socket => "socket",
            Channel::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Error,
    Denied,
}

/// An immutable, append-only record of one completed RPC (§3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic identifier assigned at enqueue (§5 "Ordering guarantees").
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub channel: Channel,
    pub allowed: bool,
    pub matched_policy_id: Option<String>,
    pub target: String,
    pub result: AuditResult,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    pub redacted_metadata: HashMap<String, Value>,
}

/// Fields needed to submit an event before the log assigns it an id
/// (§4.10: "Writers submit an event-by-value; the component enqueues it").
#[derive(Debug, Clone)]
pub struct AuditEventDraft {
    pub operation: String,
    pub channel: Channel,
    pub allowed: bool,
    pub matched_policy_id: Option<String>,
    pub target: String,
    pub result: AuditResult,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    pub redacted_metadata: HashMap<String, Value>,
}

impl AuditEventDraft {
    pub fn into_event(self, id: i64, timestamp: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            id,
            timestamp,
            operation: self.operation,
            channel: self.channel,
            allowed: self.allowed,
            matched_policy_id: self.matched_policy_id,
            target: self.target,
            result: self.result,
            error_message: self.error_message,
            elapsed_ms: self.elapsed_ms,
            redacted_metadata: self.redacted_metadata,
        }
    }
}

/// Pagination/filter parameters for audit queries (§4.10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub target_or_profile_id: Option<String>,
    pub kind: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cursor: Option<i64>,
    pub limit: Option<u32>,
}
