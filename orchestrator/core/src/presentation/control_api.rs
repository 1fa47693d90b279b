// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control API router (§4.11): configuration, policy, secret-metadata and
//! vault lifecycle management, plus the audit query and SSE event stream,
//! for the operator UI. Bound separately from the loopback RPC fallback so
//! the two surfaces can carry distinct auth and exposure policies.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::application::session_manager::SessionManager;
use crate::application::vault::VaultHandle;
use crate::domain::audit::{AuditEvent, AuditQuery};
use crate::domain::config::ShieldConfig;
use crate::domain::policy::Policy;
use crate::domain::repository::{AuditRepository, ConfigRepository, PolicyRepository};
use crate::domain::scope::{ScopeLevel, ScopeTriple};
use crate::domain::secret::SecretScope;
use crate::domain::session::PermissionClass;

#[derive(Clone)]
pub struct ControlApiState {
    pub config_repo: Arc<dyn ConfigRepository>,
    pub policy_repo: Arc<dyn PolicyRepository>,
    pub vault: Arc<dyn VaultHandle>,
    pub audit_repo: Arc<dyn AuditRepository>,
    pub sessions: Arc<SessionManager>,
    pub events: broadcast::Sender<AuditEvent>,
    pub anonymous_read_only: bool,
}

pub fn router(state: ControlApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).put(put_config))
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/:id", put(update_policy).delete(delete_policy))
        .route("/secrets", get(list_secrets).post(create_secret))
        .route("/secrets/:name", axum::routing::delete(delete_secret))
        .route("/secrets/:name/value", get(get_secret_value))
        .route("/vault/unlock", post(vault_unlock))
        .route("/vault/lock", post(vault_lock))
        .route("/vault/set-passcode", post(vault_set_passcode))
        .route("/vault/change-passcode", post(vault_change_passcode))
        .route("/events", get(events_sse))
        .route("/audit", get(query_audit))
        .with_state(state)
}

/// What a request failed on, folded into one JSON error body + status code
/// for every route (mirrors `JsonRpcError`'s code/message shape for the RPC
/// front ends, without reusing the JSON-RPC envelope itself).
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

impl From<crate::domain::repository::RepositoryError> for ApiError {
    fn from(err: crate::domain::repository::RepositoryError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<crate::application::vault::VaultError> for ApiError {
    fn from(err: crate::application::vault::VaultError) -> Self {
        use crate::application::vault::VaultError;
        match err {
            VaultError::Locked => ApiError {
                status: StatusCode::LOCKED,
                message: "vault is locked".to_string(),
            },
            VaultError::NoPasscode | VaultError::IncorrectPasscode => ApiError::unauthorized(err.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

fn bearer_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Every write route (and, unless `anonymous_read_only` is set, every read
/// route) requires a still-valid bearer issued by `POST /vault/unlock`
/// (§4.11, §3 "Session token").
fn authorize(state: &ControlApiState, headers: &HeaderMap, require_write: bool) -> Result<(), ApiError> {
    match bearer_from(headers) {
        Some(bearer) => {
            let session = state
                .sessions
                .verify(bearer)
                .map_err(|e| ApiError::unauthorized(e.to_string()))?;
            if require_write && !session.can_write() {
                return Err(ApiError::forbidden("session is read-only"));
            }
            Ok(())
        }
        None => {
            if !require_write && state.anonymous_read_only {
                Ok(())
            } else {
                Err(ApiError::unauthorized("missing bearer token"))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    target: Option<String>,
    user: Option<String>,
}

impl ScopeQuery {
    fn triple(&self) -> ScopeTriple {
        match (&self.target, &self.user) {
            (None, _) => ScopeTriple::base(),
            (Some(t), None) => ScopeTriple::target_only(t.clone()),
            (Some(t), Some(u)) => ScopeTriple::target_and_user(t.clone(), u.clone()),
        }
    }

    fn level(&self) -> ScopeLevel {
        match (&self.target, &self.user) {
            (None, _) => ScopeLevel::Base,
            (Some(t), None) => ScopeLevel::Target(t.clone()),
            (Some(t), Some(u)) => ScopeLevel::TargetUser(t.clone(), u.clone()),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct ConfigFieldQuery {
    field: String,
    #[serde(flatten)]
    scope: ScopeQuery,
}

async fn get_config(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Query(query): Query<ConfigFieldQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers, false)?;
    let value = state.config_repo.get_field(&query.field, &query.scope.triple()).await?;
    Ok(Json(json!({"field": query.field, "value": value})))
}

#[derive(Debug, Deserialize)]
struct PutConfigBody {
    field: String,
    value: Value,
    #[serde(flatten)]
    scope: ScopeQuery,
}

async fn put_config(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Json(body): Json<PutConfigBody>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    state
        .config_repo
        .set_field(&body.field, &body.scope.level(), body.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_policies(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Query(scope): Query<ScopeQuery>,
) -> Result<Json<Vec<Policy>>, ApiError> {
    authorize(&state, &headers, false)?;
    Ok(Json(state.policy_repo.list_for_scope(&scope.triple()).await?))
}

async fn create_policy(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Query(scope): Query<ScopeQuery>,
    Json(mut policy): Json<Policy>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    policy.scope_level = scope.level();
    policy.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    state.policy_repo.upsert(policy).await?;
    Ok(StatusCode::CREATED)
}

async fn update_policy(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    Query(scope): Query<ScopeQuery>,
    Json(mut policy): Json<Policy>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    policy.id = id;
    policy.scope_level = scope.level();
    policy.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    state.policy_repo.upsert(policy).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_policy(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    state.policy_repo.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Metadata only — `ciphertext`/`nonce` are never serialised here, and
/// plaintext never leaves [`get_secret_value`] (§4.11).
#[derive(Debug, Serialize)]
struct SecretMetadata {
    name: String,
    scope: SecretScope,
    linked_policy_ids: Vec<String>,
    header_name: Option<String>,
    dormant: bool,
}

async fn list_secrets(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SecretMetadata>>, ApiError> {
    authorize(&state, &headers, false)?;
    let secrets = state.vault.list_metadata().await?;
    Ok(Json(
        secrets
            .into_iter()
            .map(|s| SecretMetadata {
                name: s.name,
                scope: s.effective_scope(),
                linked_policy_ids: s.linked_policy_ids,
                header_name: s.header_name,
                dormant: s.is_dormant(),
            })
            .collect(),
    ))
}

async fn get_secret_value(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
    Query(scope): Query<ScopeQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers, false)?;
    let value = state
        .vault
        .get_by_name(&name, &scope.triple())
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unknown secret: {name}")))?;
    Ok(Json(json!({"value": String::from_utf8_lossy(&value)})))
}

#[derive(Debug, Deserialize)]
struct CreateSecretBody {
    name: String,
    value: String,
    #[serde(default = "default_secret_scope")]
    scope: SecretScope,
    #[serde(default)]
    linked_policy_ids: Vec<String>,
    #[serde(default)]
    header_name: Option<String>,
    #[serde(flatten)]
    scope_level: ScopeQuery,
}

fn default_secret_scope() -> SecretScope {
    SecretScope::Standalone
}

async fn create_secret(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateSecretBody>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    state
        .vault
        .put(
            &body.name,
            body.value.as_bytes(),
            body.scope,
            body.scope_level.level(),
            body.linked_policy_ids,
            body.header_name,
        )
        .await?;
    Ok(StatusCode::CREATED)
}

async fn delete_secret(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
    Query(scope): Query<ScopeQuery>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    state.vault.delete(&name, &scope.level()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PasscodeBody {
    passcode: String,
    #[serde(default)]
    pbkdf2_iterations: Option<u32>,
}

async fn vault_unlock(
    State(state): State<ControlApiState>,
    Json(body): Json<PasscodeBody>,
) -> Result<Json<Value>, ApiError> {
    state.vault.unlock(&body.passcode).await?;
    let token = state.sessions.issue(PermissionClass::Authenticated);
    Ok(Json(json!({"token": token.token, "expiry": token.expiry})))
}

async fn vault_lock(State(state): State<ControlApiState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    state.vault.lock();
    state.sessions.revoke_all();
    Ok(StatusCode::NO_CONTENT)
}

async fn vault_set_passcode(
    State(state): State<ControlApiState>,
    Json(body): Json<PasscodeBody>,
) -> Result<Json<Value>, ApiError> {
    if state.vault.has_passcode().await? {
        return Err(ApiError::forbidden("vault already has a passcode; use change-passcode"));
    }
    state
        .vault
        .set_passcode(&body.passcode, body.pbkdf2_iterations.unwrap_or(100_000))
        .await?;
    let token = state.sessions.issue(PermissionClass::Authenticated);
    Ok(Json(json!({"token": token.token, "expiry": token.expiry})))
}

#[derive(Debug, Deserialize)]
struct ChangePasscodeBody {
    old_passcode: String,
    new_passcode: String,
}

async fn vault_change_passcode(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Json(body): Json<ChangePasscodeBody>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, true)?;
    state.vault.change_passcode(&body.old_passcode, &body.new_passcode).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resumes a reconnecting client from `Last-Event-ID` by filtering the
/// broadcast stream to events with a cursor strictly after it — lagged
/// receivers are skipped rather than terminating the stream, since a slow
/// client missing a few events is preferable to dropping the connection
/// (§4.11 "resume with `Last-Event-ID`").
async fn events_sse(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    authorize(&state, &headers, false)?;
    let last_event_id: Option<i64> = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(move |item| {
            let last_event_id = last_event_id;
            async move {
                match item {
                    Ok(event) if last_event_id.map(|id| event.id > id).unwrap_or(true) => {
                        let data = serde_json::to_string(&event).ok()?;
                        Some(Ok(Event::default().id(event.id.to_string()).data(data)))
                    }
                    Ok(_) => None,
                    Err(_) => None,
                }
            }
        });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct AuditQueryParams {
    target: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
    until: Option<chrono::DateTime<chrono::Utc>>,
    cursor: Option<i64>,
    limit: Option<u32>,
}

async fn query_audit(
    State(state): State<ControlApiState>,
    headers: HeaderMap,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    authorize(&state, &headers, false)?;
    let events = state
        .audit_repo
        .query(AuditQuery {
            target_or_profile_id: params.target,
            kind: None,
            since: params.since,
            until: params.until,
            cursor: params.cursor,
            limit: params.limit,
        })
        .await?;
    Ok(Json(events))
}
