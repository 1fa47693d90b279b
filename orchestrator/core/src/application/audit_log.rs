// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit log application service: append-only event ingestion and retention
//! (§3 "Audit event", §4.10).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::domain::audit::{AuditEvent, AuditEventDraft, AuditQuery};
use crate::domain::repository::{AuditRepository, RepositoryError};

/// Submits events over an unbounded channel so callers never block on disk
/// I/O; a single background task owns the writer side and flushes on
/// whichever of (interval elapsed, batch full, channel closed) comes first
/// (§4.10 expanded).
pub struct AuditLog {
    sender: mpsc::UnboundedSender<AuditEventDraft>,
}

impl AuditLog {
    /// Spawns the batch writer and retention sweep tasks and returns a handle
    /// for submitting events. Both tasks run until the returned join handles
    /// are aborted by the daemon's shutdown supervisor.
    pub fn spawn<R: AuditRepository + 'static>(
        repository: Arc<R>,
        flush_interval: Duration,
        batch_size: usize,
        retention_count: u64,
        retention_days: u64,
        retention_sweep_interval: Duration,
    ) -> (Self, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer_repo = Arc::clone(&repository);
        let writer = tokio::spawn(async move {
            Self::run_writer(writer_repo, receiver, flush_interval, batch_size).await;
        });
        let retention = tokio::spawn(async move {
            Self::run_retention(repository, retention_count, retention_days, retention_sweep_interval).await;
        });
        (Self { sender }, writer, retention)
    }

    /// Enqueues an event and returns immediately; the caller never observes
    /// the assigned `id` (§4.10: "writers submit an event-by-value").
    pub fn submit(&self, draft: AuditEventDraft) {
        if self.sender.send(draft).is_err() {
            error!("audit log writer task has stopped; dropping event");
        }
    }

    async fn run_writer<R: AuditRepository>(
        repository: Arc<R>,
        mut receiver: mpsc::UnboundedReceiver<AuditEventDraft>,
        flush_interval: Duration,
        batch_size: usize,
    ) {
        let mut pending = Vec::with_capacity(batch_size);
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            tokio::select! {
                biased;
                maybe_draft = receiver.recv() => {
                    match maybe_draft {
                        Some(draft) => {
                            pending.push(draft);
                            if pending.len() >= batch_size {
                                Self::flush(&repository, &mut pending).await;
                            }
                        }
                        None => {
                            Self::flush(&repository, &mut pending).await;
                            info!("audit log channel closed, writer task exiting");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        Self::flush(&repository, &mut pending).await;
                    }
                }
            }
        }
    }

    async fn flush<R: AuditRepository>(repository: &Arc<R>, pending: &mut Vec<AuditEventDraft>) {
        for draft in pending.drain(..) {
            if let Err(e) = repository.append(draft).await {
                warn!(error = %e, "failed to append audit event");
            }
        }
    }

    async fn run_retention<R: AuditRepository>(
        repository: Arc<R>,
        retention_count: u64,
        retention_days: u64,
        sweep_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match repository.trim(retention_count, retention_days).await {
                Ok(removed) if removed > 0 => info!(removed, "audit retention sweep trimmed rows"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "audit retention sweep failed"),
            }
        }
    }

    pub async fn query<R: AuditRepository>(
        repository: &R,
        query: AuditQuery,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        repository.query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::domain::audit::{AuditResult, Channel};

    struct FakeRepo {
        rows: Mutex<Vec<AuditEvent>>,
        next_id: Mutex<i64>,
    }

    #[async_trait]
    impl AuditRepository for FakeRepo {
        async fn append(&self, draft: AuditEventDraft) -> Result<AuditEvent, RepositoryError> {
            let mut next_id = self.next_id.lock().unwrap();
            let event = draft.into_event(*next_id, Utc::now());
            *next_id += 1;
            self.rows.lock().unwrap().push(event.clone());
            Ok(event)
        }
        async fn query(&self, _query: AuditQuery) -> Result<Vec<AuditEvent>, RepositoryError> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn trim(&self, max_count: u64, _max_age_days: u64) -> Result<u64, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let excess = rows.len().saturating_sub(max_count as usize);
            rows.drain(0..excess);
            Ok(excess as u64)
        }
    }

    fn draft(op: &str) -> AuditEventDraft {
        AuditEventDraft {
            operation: op.into(),
            channel: Channel::Socket,
            allowed: true,
            matched_policy_id: None,
            target: "example.com".into(),
            result: AuditResult::Success,
            error_message: None,
            elapsed_ms: 1,
            redacted_metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn submitted_events_are_flushed_on_batch_size() {
        let repo = Arc::new(FakeRepo {
            rows: Mutex::new(vec![]),
            next_id: Mutex::new(0),
        });
        let (log, writer, retention) = AuditLog::spawn(
            Arc::clone(&repo),
            Duration::from_secs(60),
            2,
            1000,
            90,
            Duration::from_secs(60),
        );
        log.submit(draft("open_url"));
        log.submit(draft("file_read"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(repo.rows.lock().unwrap().len(), 2);
        writer.abort();
        retention.abort();
    }

    #[tokio::test]
    async fn submitted_events_are_flushed_on_interval_when_batch_not_full() {
        let repo = Arc::new(FakeRepo {
            rows: Mutex::new(vec![]),
            next_id: Mutex::new(0),
        });
        let (log, writer, retention) = AuditLog::spawn(
            Arc::clone(&repo),
            Duration::from_millis(20),
            100,
            1000,
            90,
            Duration::from_secs(60),
        );
        log.submit(draft("ping"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(repo.rows.lock().unwrap().len(), 1);
        writer.abort();
        retention.abort();
    }
}
