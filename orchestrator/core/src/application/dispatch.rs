// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Request dispatcher: the one evaluate → handle → audit pipeline shared by
//! both RPC front ends (§4.1 item 1-3, SPEC_FULL.md §4.1/4.2 expanded).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info_span, warn, Instrument};

use crate::domain::audit::{AuditEventDraft, AuditResult, Channel};
use crate::domain::handler::{HandlerContext, Method, MethodHandler};
use crate::domain::policy::FsOp;
use crate::domain::repository::PolicyRepository;
use crate::domain::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::domain::scope::ScopeTriple;

use super::audit_log::AuditLog;
use super::policy_engine::{Decision, PolicyEngine};

/// Extracts the match target and, for filesystem methods, the operation
/// being requested, from the already-parsed `params` object. Handlers
/// re-parse `params` into their own typed request record; the dispatcher
/// only needs enough of it to evaluate policy.
fn extract_target(method: Method, params: &Value) -> Result<(String, Option<FsOp>), JsonRpcError> {
    let field = |name: &str| -> Result<String, JsonRpcError> {
        params
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("missing required field `{name}`")))
    };
    match method {
        Method::HttpRequest | Method::OpenUrl => Ok((field("url")?, None)),
        Method::FileRead | Method::FileList => Ok((field("path")?, Some(FsOp::Read))),
        Method::FileWrite => Ok((field("path")?, Some(FsOp::Write))),
        Method::Exec => Ok((field("command")?, None)),
        Method::SecretInject => Ok((field("name")?, None)),
        Method::Ping => Ok((String::new(), None)),
    }
}

/// Ties the policy engine, the typed per-method handlers, and the audit log
/// together. One instance is shared by the socket front end, the HTTP
/// fallback front end, and (for `secret_inject`-adjacent operations) the
/// control API.
pub struct Dispatcher<R: PolicyRepository> {
    policy_engine: Arc<PolicyEngine<R>>,
    handlers: HashMap<Method, Arc<dyn MethodHandler>>,
    audit_log: Arc<AuditLog>,
    request_timeout: Duration,
}

impl<R: PolicyRepository + 'static> Dispatcher<R> {
    pub fn new(
        policy_engine: Arc<PolicyEngine<R>>,
        handlers: HashMap<Method, Arc<dyn MethodHandler>>,
        audit_log: Arc<AuditLog>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            policy_engine,
            handlers,
            audit_log,
            request_timeout,
        }
    }

    /// Dispatches one already-deserialised JSON-RPC request and returns the
    /// response to write back on the wire. Never returns `Err` — failures at
    /// every stage are folded into a `JsonRpcResponse::failure`.
    pub async fn dispatch(&self, request: JsonRpcRequest, channel: Channel, scope: ScopeTriple) -> JsonRpcResponse {
        let started = Instant::now();
        let span = info_span!("dispatch", channel = channel.as_str(), method = %request.method, request_id = %request.id);
        self.dispatch_inner(request, channel, scope, started)
            .instrument(span)
            .await
    }

    async fn dispatch_inner(
        &self,
        request: JsonRpcRequest,
        channel: Channel,
        scope: ScopeTriple,
        started: Instant,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        let method = match Method::from_str(&request.method) {
            Some(m) => m,
            None => {
                let error = JsonRpcError::method_not_found(&request.method);
                self.record(&request.method, channel, false, None, "", AuditResult::Error, Some(error.message.clone()), None, started)
                    .await;
                return JsonRpcResponse::failure(id, error);
            }
        };

        if channel == Channel::Http && !method.allowed_over_http() {
            let error = JsonRpcError::channel_restricted(method.as_str());
            self.record(method.as_str(), channel, false, None, "", AuditResult::Error, Some(error.message.clone()), None, started)
                .await;
            return JsonRpcResponse::failure(id, error);
        }

        let (target, fs_op) = match extract_target(method, &request.params) {
            Ok(t) => t,
            Err(error) => {
                self.record(method.as_str(), channel, false, None, "", AuditResult::Error, Some(error.message.clone()), None, started)
                    .await;
                return JsonRpcResponse::failure(id, error);
            }
        };

        let outcome = tokio::time::timeout(self.request_timeout, self.evaluate_and_handle(method, &target, fs_op, &scope, channel, &request.params)).await;

        let (response, audit_result, matched_policy_id, error_message, audit_note) = match outcome {
            Err(_) => {
                let error = JsonRpcError::deadline_exceeded();
                (
                    JsonRpcResponse::failure(id.clone(), error.clone()),
                    AuditResult::Error,
                    None,
                    Some(error.message),
                    None,
                )
            }
            Ok(Err((error, policy_id))) => (
                JsonRpcResponse::failure(id.clone(), error.clone()),
                if error.code == crate::domain::rpc::error_codes::POLICY_DENIED {
                    AuditResult::Denied
                } else {
                    AuditResult::Error
                },
                policy_id,
                Some(error.message),
                None,
            ),
            Ok(Ok((result, policy_id, audit_note))) => (
                JsonRpcResponse::success(id.clone(), result),
                AuditResult::Success,
                policy_id,
                None,
                audit_note,
            ),
        };

        let allowed = matches!(audit_result, AuditResult::Success);
        self.record(
            method.as_str(),
            channel,
            allowed,
            matched_policy_id,
            &target,
            audit_result,
            error_message,
            audit_note,
            started,
        )
        .await;

        response
    }

    /// Runs policy evaluation followed by the matched handler, returning the
    /// matched policy id and the handler's audit note (truncation markers,
    /// captured stderr — §4.5 item 4) alongside the outcome so the caller can
    /// attach both to the audit entry without re-deriving them.
    #[allow(clippy::type_complexity)]
    async fn evaluate_and_handle(
        &self,
        method: Method,
        target: &str,
        fs_op: Option<FsOp>,
        scope: &ScopeTriple,
        channel: Channel,
        params: &Value,
    ) -> Result<(Value, Option<String>, Option<String>), (JsonRpcError, Option<String>)> {
        if method == Method::Ping {
            return Ok((serde_json::json!({"pong": true}), None, None));
        }

        let decision = self
            .policy_engine
            .evaluate(method.target_type(), target, scope, fs_op)
            .await
            .map_err(|e| (JsonRpcError::internal_error(e.to_string()), None))?;

        let hints = match &decision {
            Decision::Allow { hints, .. } => hints.clone(),
            Decision::Deny { policy_id } => {
                return Err((JsonRpcError::policy_denied("denied by policy"), policy_id.clone()));
            }
        };

        let handler = self
            .handlers
            .get(&method)
            .ok_or_else(|| (JsonRpcError::method_not_found(method.as_str()), None))?;

        let policy_id = decision.matched_policy_id().map(str::to_string);
        let ctx = HandlerContext {
            request_id: Value::Null,
            channel,
            timestamp: chrono::Utc::now(),
            scope: scope.clone(),
            matched_policy_id: policy_id.clone(),
        };

        match handler.handle(&ctx, params.clone(), &hints).await {
            Ok(success) => Ok((success.result, policy_id, success.audit_note)),
            Err(e) => {
                warn!(error = %e.message, "handler returned an error");
                Err((e, policy_id))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        operation: &str,
        channel: Channel,
        allowed: bool,
        matched_policy_id: Option<String>,
        target: &str,
        result: AuditResult,
        error_message: Option<String>,
        audit_note: Option<String>,
        started: Instant,
    ) {
        let mut redacted_metadata = HashMap::new();
        if let Some(note) = audit_note {
            redacted_metadata.insert("note".to_string(), Value::String(note));
        }
        self.audit_log.submit(AuditEventDraft {
            operation: operation.to_string(),
            channel,
            allowed,
            matched_policy_id,
            target: target.to_string(),
            result,
            error_message,
            elapsed_ms: started.elapsed().as_millis() as u64,
            redacted_metadata,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::handler::{HandlerOutcome, HandlerSuccess, SandboxHints};
    use crate::domain::policy::{Policy, PolicyAction, TargetType};
    use crate::domain::repository::RepositoryError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakePolicyRepo {
        policies: Vec<Policy>,
    }

    #[async_trait]
    impl PolicyRepository for FakePolicyRepo {
        async fn list_for_scope(&self, _scope: &ScopeTriple) -> Result<Vec<Policy>, RepositoryError> {
            Ok(self.policies.clone())
        }
        async fn upsert(&self, _policy: Policy) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn revision(&self) -> Result<i64, RepositoryError> {
            Ok(0)
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, _ctx: &HandlerContext, params: Value, _hints: &SandboxHints) -> HandlerOutcome {
            Ok(HandlerSuccess::new(params))
        }
    }

    fn allow_url_policy() -> Policy {
        Policy {
            id: "allow-example".into(),
            name: "allow-example".into(),
            action: PolicyAction::Allow,
            target: TargetType::Url,
            patterns: vec!["example.com/**".into()],
            enabled: true,
            priority: 0,
            scope_restriction: None,
            scope_level: crate::domain::scope::ScopeLevel::Base,
            fs_ops: None,
            egress_mode: None,
            workspace_override: None,
            env_allowlist: None,
        }
    }

    async fn build_dispatcher(policies: Vec<Policy>) -> (Dispatcher<FakePolicyRepo>, Arc<FakeAuditRepo>) {
        let policy_engine = Arc::new(PolicyEngine::new(
            Arc::new(FakePolicyRepo { policies }),
            Duration::from_secs(60),
        ));
        let audit_repo = Arc::new(FakeAuditRepo {
            rows: Mutex::new(vec![]),
        });
        let (audit_log, _writer, _retention) = AuditLog::spawn(
            Arc::clone(&audit_repo),
            Duration::from_millis(10),
            8,
            1000,
            90,
            Duration::from_secs(60),
        );
        let mut handlers: HashMap<Method, Arc<dyn MethodHandler>> = HashMap::new();
        handlers.insert(Method::OpenUrl, Arc::new(EchoHandler));
        let dispatcher = Dispatcher::new(policy_engine, handlers, Arc::new(audit_log), Duration::from_secs(5));
        (dispatcher, audit_repo)
    }

    struct FakeAuditRepo {
        rows: Mutex<Vec<crate::domain::audit::AuditEvent>>,
    }

    #[async_trait]
    impl crate::domain::repository::AuditRepository for FakeAuditRepo {
        async fn append(&self, draft: AuditEventDraft) -> Result<crate::domain::audit::AuditEvent, RepositoryError> {
            let event = draft.into_event(self.rows.lock().unwrap().len() as i64, chrono::Utc::now());
            self.rows.lock().unwrap().push(event.clone());
            Ok(event)
        }
        async fn query(&self, _query: crate::domain::audit::AuditQuery) -> Result<Vec<crate::domain::audit::AuditEvent>, RepositoryError> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn trim(&self, _max_count: u64, _max_age_days: u64) -> Result<u64, RepositoryError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn unknown_method_is_rejected_without_touching_policy_engine() {
        let (dispatcher, _audit) = build_dispatcher(vec![]).await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Value::from(1),
            method: "not_a_real_method".into(),
            params: Value::Null,
        };
        let response = dispatcher.dispatch(request, Channel::Socket, ScopeTriple::base()).await;
        assert!(response.error.is_some());
        assert_eq!(response.error.unwrap().code, crate::domain::rpc::error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn exec_is_restricted_over_http_channel() {
        let (dispatcher, _audit) = build_dispatcher(vec![]).await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Value::from(1),
            method: "exec".into(),
            params: serde_json::json!({"command": "echo"}),
        };
        let response = dispatcher.dispatch(request, Channel::Http, ScopeTriple::base()).await;
        assert_eq!(
            response.error.unwrap().code,
            crate::domain::rpc::error_codes::CHANNEL_RESTRICTED
        );
    }

    #[tokio::test]
    async fn default_deny_produces_policy_denied_error() {
        let (dispatcher, _audit) = build_dispatcher(vec![]).await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Value::from(1),
            method: "open_url".into(),
            params: serde_json::json!({"url": "example.com"}),
        };
        let response = dispatcher.dispatch(request, Channel::Socket, ScopeTriple::base()).await;
        assert_eq!(response.error.unwrap().code, crate::domain::rpc::error_codes::POLICY_DENIED);
    }

    #[tokio::test]
    async fn allowed_request_reaches_the_handler() {
        let (dispatcher, _audit) = build_dispatcher(vec![allow_url_policy()]).await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Value::from(1),
            method: "open_url".into(),
            params: serde_json::json!({"url": "example.com/page"}),
        };
        let response = dispatcher.dispatch(request, Channel::Socket, ScopeTriple::base()).await;
        assert!(response.error.is_none());
        assert!(response.result.is_some());
    }

    #[tokio::test]
    async fn ping_bypasses_policy_evaluation() {
        let (dispatcher, _audit) = build_dispatcher(vec![]).await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Value::from(1),
            method: "ping".into(),
            params: Value::Null,
        };
        let response = dispatcher.dispatch(request, Channel::Http, ScopeTriple::base()).await;
        assert_eq!(response.result.unwrap()["pong"], true);
    }
}
