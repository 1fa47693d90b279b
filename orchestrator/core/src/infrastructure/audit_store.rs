// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secondary scoped store — SQLite audit log (§4.9, §4.10)
//!
//! Physically separate `SqlitePool` from [`crate::infrastructure::store`] so
//! high-write audit appends never contend with the lower-volume
//! configuration/policy/secret tables.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;

use crate::domain::audit::{AuditEvent, AuditEventDraft, AuditQuery, AuditResult, Channel};
use crate::domain::repository::{AuditRepository, RepositoryError};

use super::store::{StoreOpenError, APPLICATION_ID};

/// Distinct application id so the audit store and the primary store cannot
/// be swapped for one another undetected.
pub const AUDIT_APPLICATION_ID: i32 = APPLICATION_ID ^ 0x01;

pub async fn open_audit_store(path: &Path) -> Result<SqlitePool, StoreOpenError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;

    sqlx::migrate!("./migrations/audit").run(&pool).await?;

    let row = sqlx::query("PRAGMA application_id")
        .fetch_one(&pool)
        .await
        .map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
    let found: i32 = row.try_get(0).unwrap_or(0);
    if found == 0 {
        let stamp = format!("PRAGMA application_id = {AUDIT_APPLICATION_ID}");
        sqlx::query(&stamp).execute(&pool).await.map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
    } else if found != AUDIT_APPLICATION_ID {
        return Err(StoreOpenError::Tamper {
            path: path.to_path_buf(),
            expected: AUDIT_APPLICATION_ID,
            found,
        });
    }
    Ok(pool)
}

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn result_tag(result: AuditResult) -> &'static str {
    match result {
        AuditResult::Success => "success",
        AuditResult::Error => "error",
        AuditResult::Denied => "denied",
    }
}

fn parse_result(raw: &str) -> Result<AuditResult, RepositoryError> {
    match raw {
        "success" => Ok(AuditResult::Success),
        "error" => Ok(AuditResult::Error),
        "denied" => Ok(AuditResult::Denied),
        other => Err(RepositoryError::Storage(format!("unknown audit result: {other}"))),
    }
}

fn channel_tag(channel: Channel) -> &'static str {
    channel.as_str()
}

fn parse_channel(raw: &str) -> Result<Channel, RepositoryError> {
    match raw {
        "socket" => Ok(Channel::Socket),
        "http" => Ok(Channel::Http),
        other => Err(RepositoryError::Storage(format!("unknown channel: {other}"))),
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let timestamp_raw: String = row.try_get("timestamp").map_err(|e| RepositoryError::Storage(e.to_string()))?;
    let timestamp: DateTime<Utc> = timestamp_raw
        .parse()
        .map_err(|_| RepositoryError::Storage("invalid stored timestamp".into()))?;
    let channel_raw: String = row.try_get("channel").map_err(|e| RepositoryError::Storage(e.to_string()))?;
    let result_raw: String = row.try_get("result").map_err(|e| RepositoryError::Storage(e.to_string()))?;
    let metadata_raw: String = row
        .try_get("redacted_metadata")
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
    let redacted_metadata: HashMap<String, JsonValue> =
        serde_json::from_str(&metadata_raw).unwrap_or_default();

    Ok(AuditEvent {
        id: row.try_get("id").map_err(|e| RepositoryError::Storage(e.to_string()))?,
        timestamp,
        operation: row.try_get("operation").map_err(|e| RepositoryError::Storage(e.to_string()))?,
        channel: parse_channel(&channel_raw)?,
        allowed: row.try_get::<i64, _>("allowed").map_err(|e| RepositoryError::Storage(e.to_string()))? != 0,
        matched_policy_id: row
            .try_get("matched_policy_id")
            .map_err(|e| RepositoryError::Storage(e.to_string()))?,
        target: row.try_get("target").map_err(|e| RepositoryError::Storage(e.to_string()))?,
        result: parse_result(&result_raw)?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| RepositoryError::Storage(e.to_string()))?,
        elapsed_ms: row.try_get::<i64, _>("elapsed_ms").map_err(|e| RepositoryError::Storage(e.to_string()))? as u64,
        redacted_metadata,
    })
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, draft: AuditEventDraft) -> Result<AuditEvent, RepositoryError> {
        let metadata = serde_json::to_string(&draft.redacted_metadata).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let timestamp = Utc::now();
        let row = sqlx::query(
            "INSERT INTO audit_events
                (timestamp, operation, channel, allowed, matched_policy_id, target, result, error_message, elapsed_ms, redacted_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING id",
        )
        .bind(timestamp.to_rfc3339())
        .bind(&draft.operation)
        .bind(channel_tag(draft.channel))
        .bind(draft.allowed as i64)
        .bind(&draft.matched_policy_id)
        .bind(&draft.target)
        .bind(result_tag(draft.result))
        .bind(&draft.error_message)
        .bind(draft.elapsed_ms as i64)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(draft.into_event(id, timestamp))
    }

    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditEvent>, RepositoryError> {
        let limit = query.limit.unwrap_or(100).min(1000) as i64;
        let cursor = query.cursor.unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT * FROM audit_events
             WHERE id < ?1
               AND (?2 IS NULL OR target = ?2)
               AND (?3 IS NULL OR timestamp >= ?3)
               AND (?4 IS NULL OR timestamp <= ?4)
             ORDER BY id DESC
             LIMIT ?5",
        )
        .bind(cursor)
        .bind(&query.target_or_profile_id)
        .bind(query.since.map(|t| t.to_rfc3339()))
        .bind(query.until.map(|t| t.to_rfc3339()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        rows.iter().map(row_to_event).collect()
    }

    /// Runs a single `DELETE` enforcing both caps, ordered so the age cap
    /// never strips rows the count cap would have kept (§4.10 expanded).
    async fn trim(&self, max_count: u64, max_age_days: u64) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM audit_events
             WHERE id NOT IN (SELECT id FROM audit_events ORDER BY id DESC LIMIT ?1)
                OR timestamp < datetime('now', ?2)",
        )
        .bind(max_count as i64)
        .bind(format!("-{max_age_days} days"))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
