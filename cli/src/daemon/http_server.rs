// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP fallback front end (§4.2): a loopback-only, reduced-capability
//! ingress sharing the same `Dispatcher` pipeline as the socket front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use agenshield_core::application::dispatch::Dispatcher;
use agenshield_core::domain::audit::Channel;
use agenshield_core::domain::repository::PolicyRepository;
use agenshield_core::domain::rpc::{JsonRpcRequest, JsonRpcResponse};
use agenshield_core::domain::scope::ScopeTriple;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
struct HttpState<R: PolicyRepository> {
    dispatcher: Arc<Dispatcher<R>>,
    started_at: Instant,
}

pub async fn serve<R>(
    host: &str,
    port: u16,
    max_body_bytes: u64,
    dispatcher: Arc<Dispatcher<R>>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()>
where
    R: PolicyRepository + 'static,
{
    let state = HttpState {
        dispatcher,
        started_at: Instant::now(),
    };

    let router = Router::new()
        .route("/health", get(health))
        .route("/rpc", post(rpc::<R>))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes as usize))
        .with_state(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP fallback front end listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health<R: PolicyRepository>(State(state): State<HttpState<R>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Rejects any caller whose remote address is not loopback (§4.2
/// "Any request whose remote address is not loopback is rejected with
/// forbidden").
async fn rpc<R: PolicyRepository + 'static>(
    State(state): State<HttpState<R>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if !remote.ip().is_loopback() {
        return (StatusCode::FORBIDDEN, Json(serde_json::json!({"error": "forbidden: non-loopback caller"})))
            .into_response();
    }

    let response: JsonRpcResponse = state
        .dispatcher
        .dispatch(request, Channel::Http, ScopeTriple::base())
        .await;
    Json(response).into_response()
}
