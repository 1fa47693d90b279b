// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon composition root: wires the scoped store, policy engine, sandbox
//! profile manager, secret vault, audit log and session manager into the
//! shared `Dispatcher`, then runs the three concurrent front ends described
//! in SPEC_FULL.md §1-2 — local socket (§4.1), HTTP fallback (§4.2) and the
//! control API (§4.11) — under one graceful-shutdown supervisor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use agenshield_core::application::audit_log::AuditLog;
use agenshield_core::application::dispatch::Dispatcher;
use agenshield_core::application::policy_engine::PolicyEngine;
use agenshield_core::application::sandbox_profile_manager::SandboxProfileManager;
use agenshield_core::application::session_manager::SessionManager;
use agenshield_core::application::vault::{SecretVault, VaultHandle};
use agenshield_core::domain::audit::{AuditEvent, AuditEventDraft};
use agenshield_core::domain::config::ShieldConfig;
use agenshield_core::domain::handler::{Method, MethodHandler};
use agenshield_core::domain::repository::{AuditRepository, ConfigRepository, PolicyRepository, RepositoryError};
use agenshield_core::infrastructure::crypto::ScryptConfig;
use agenshield_core::infrastructure::handlers::{
    exec::ExecHandler, file_ops::{FileListHandler, FileReadHandler, FileWriteHandler},
    http_request::HttpRequestHandler, open_url::OpenUrlHandler, secret_inject::SecretInjectHandler,
};
use agenshield_core::infrastructure::{audit_store, store};
use agenshield_core::presentation::control_api::{self, ControlApiState};

use super::{http_server, socket_server, write_pid_file};

const SESSION_TTL: Duration = Duration::from_secs(60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const AUDIT_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn start_daemon(config_path: Option<PathBuf>) -> Result<()> {
    let pid = std::process::id();
    write_pid_file(pid)?;
    let _pid_guard = PidFileGuard;

    info!(pid, "AgenShield broker starting");

    let config = ShieldConfig::load_or_default(config_path.as_deref()).context("failed to load configuration")?;

    if let Some(parent) = config.policies_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    if let Some(parent) = config.audit_log_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let primary_pool = store::open_primary_store(&config.policies_path)
        .await
        .context("failed to open primary store")?;
    let audit_pool = audit_store::open_audit_store(&config.audit_log_path)
        .await
        .context("failed to open audit store")?;

    let config_repo = Arc::new(store::SqliteConfigRepository::new(primary_pool.clone()));
    let policy_repo = Arc::new(store::SqlitePolicyRepository::new(primary_pool.clone()));
    let secret_repo = Arc::new(store::SqliteSecretRepository::new(primary_pool.clone()));
    let credential_store = Arc::new(store::SqliteVaultCredentialStore::new(primary_pool.clone()));
    let audit_repo_reads = Arc::new(audit_store::SqliteAuditRepository::new(audit_pool.clone()));
    let audit_repo_writes = audit_store::SqliteAuditRepository::new(audit_pool);

    let (event_tx, _) = broadcast::channel::<AuditEvent>(1024);
    let broadcasting_audit_repo = BroadcastingAuditRepository {
        inner: audit_repo_writes,
        events: event_tx.clone(),
    };

    let policy_engine = Arc::new(PolicyEngine::new(
        Arc::clone(&policy_repo),
        Duration::from_millis(config.reload_cooldown_ms),
    ));
    let _reload_handle = policy_engine.spawn_reload_task();

    let scrypt = ScryptConfig::from_n(config.scrypt_n, config.scrypt_r, config.scrypt_p)
        .context("invalid scrypt parameters in configuration")?;
    let vault: Arc<dyn VaultHandle> = Arc::new(SecretVault::new(
        Arc::clone(&secret_repo),
        Arc::clone(&credential_store),
        scrypt,
    ));

    let sandbox_profile_manager = SandboxProfileManager::new(config.sandbox_profile_dir.clone());

    let (audit_log, _writer_handle, _retention_handle) = AuditLog::spawn(
        Arc::new(broadcasting_audit_repo),
        Duration::from_millis(config.audit_flush_interval_ms),
        config.audit_batch_size as usize,
        config.retention_count,
        config.retention_days,
        AUDIT_RETENTION_SWEEP_INTERVAL,
    );
    let audit_log = Arc::new(audit_log);

    let sessions = Arc::new(SessionManager::new(SESSION_TTL));
    spawn_session_sweep(Arc::clone(&sessions));

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(config.follow_redirects as usize))
        .build()
        .context("failed to build outbound HTTP client")?;

    let mut handlers: HashMap<Method, Arc<dyn MethodHandler>> = HashMap::new();
    handlers.insert(
        Method::HttpRequest,
        Arc::new(HttpRequestHandler {
            client: http_client.clone(),
            max_response_bytes: config.max_output_bytes,
            vault: Arc::clone(&vault),
        }),
    );
    handlers.insert(
        Method::OpenUrl,
        Arc::new(OpenUrlHandler {
            client: http_client,
            max_response_bytes: config.max_output_bytes,
        }),
    );
    handlers.insert(Method::FileRead, Arc::new(FileReadHandler { max_bytes: config.max_output_bytes }));
    handlers.insert(Method::FileList, Arc::new(FileListHandler));
    handlers.insert(
        Method::FileWrite,
        Arc::new(FileWriteHandler { max_bytes: config.max_output_bytes }),
    );
    handlers.insert(
        Method::Exec,
        Arc::new(ExecHandler {
            path_dirs: config.exec_path_dirs.clone(),
            sandbox_launcher_path: config.sandbox_launcher_path.clone(),
            profile_manager: sandbox_profile_manager,
            socket_path: config.socket_path.clone(),
            max_output_bytes: config.max_output_bytes,
        }),
    );
    handlers.insert(Method::SecretInject, Arc::new(SecretInjectHandler { vault: Arc::clone(&vault) }));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&policy_engine),
        handlers,
        Arc::clone(&audit_log),
        Duration::from_millis(config.request_timeout_ms),
    ));

    let config_repo: Arc<dyn ConfigRepository> = config_repo;
    let control_policy_repo: Arc<dyn PolicyRepository> = policy_repo;
    let audit_repo_reads: Arc<dyn AuditRepository> = audit_repo_reads;

    let control_state = ControlApiState {
        config_repo,
        policy_repo: control_policy_repo,
        vault,
        audit_repo: audit_repo_reads,
        sessions,
        events: event_tx,
        anonymous_read_only: config.anonymous_read_only,
    };
    let control_router = control_api::router(control_state);

    let shutdown = CancellationToken::new();

    let socket_task: JoinHandle<Result<()>> = {
        let socket_path = config.socket_path.clone();
        let dispatcher = Arc::clone(&dispatcher);
        let max_connections = config.max_connections;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = socket_server::serve(&socket_path, dispatcher, max_connections) => result,
                _ = shutdown.cancelled() => Ok(()),
            }
        })
    };

    let http_task: JoinHandle<Result<()>> = {
        let host = config.http_host.clone();
        let port = config.http_port;
        let max_body_bytes = config.max_body_bytes;
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            http_server::serve(&host, port, max_body_bytes, dispatcher, shutdown.cancelled_owned()).await
        })
    };

    let control_task: JoinHandle<Result<()>> = {
        let host = config.control_host.clone();
        let port = config.control_port;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "control API listening");
            axum::serve(listener, control_router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
            Ok(())
        })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping front ends");
    shutdown.cancel();

    for (name, task) in [("socket", socket_task), ("http", http_task), ("control", control_task)] {
        if let Err(e) = task.await.context("front-end task panicked")? {
            tracing::error!(front_end = name, error = %e, "front end exited with an error");
        }
    }

    info!("AgenShield broker shut down");
    Ok(())
}

/// Wraps the audit repository the writer uses so every appended event is
/// also published on the control API's SSE broadcast channel (§4.11
/// "events"), without the audit log itself needing to know about SSE.
struct BroadcastingAuditRepository<T: AuditRepository> {
    inner: T,
    events: broadcast::Sender<AuditEvent>,
}

#[async_trait]
impl<T: AuditRepository> AuditRepository for BroadcastingAuditRepository<T> {
    async fn append(&self, draft: AuditEventDraft) -> Result<AuditEvent, RepositoryError> {
        let event = self.inner.append(draft).await?;
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    async fn query(
        &self,
        query: agenshield_core::domain::audit::AuditQuery,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        self.inner.query(query).await
    }

    async fn trim(&self, max_count: u64, max_age_days: u64) -> Result<u64, RepositoryError> {
        self.inner.trim(max_count, max_age_days).await
    }
}

fn spawn_session_sweep(sessions: Arc<SessionManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sessions.sweep_expired();
        }
    })
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = super::remove_pid_file();
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
