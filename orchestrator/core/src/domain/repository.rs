// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository traits — storage-backend abstraction for the scoped store
//! (§4.9). One trait per aggregate; `agenshield_core::infrastructure::store`
//! provides the SQLite-backed implementation used in production, so
//! application services stay storage-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::audit::{AuditEvent, AuditEventDraft, AuditQuery};
use super::policy::Policy;
use super::scope::{ScopeLevel, ScopeTriple};
use super::secret::Secret;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("tamper detected: {0}")]
    Tamper(String),
    #[error("not found")]
    NotFound,
}

/// Configuration is a set of named fields, each independently scoped and
/// merged per §3 "Config" rules.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_field(&self, field: &str, scope: &ScopeTriple) -> Result<Option<Value>, RepositoryError>;
    async fn set_field(&self, field: &str, level: &ScopeLevel, value: Value) -> Result<(), RepositoryError>;
}

#[async_trait]
impl ConfigRepository for Arc<dyn ConfigRepository> {
    async fn get_field(&self, field: &str, scope: &ScopeTriple) -> Result<Option<Value>, RepositoryError> {
        self.as_ref().get_field(field, scope).await
    }
    async fn set_field(&self, field: &str, level: &ScopeLevel, value: Value) -> Result<(), RepositoryError> {
        self.as_ref().set_field(field, level, value).await
    }
}

/// Policies union across scope levels — the engine does its own priority
/// sort over whatever this returns (§3 "Policies", §4.9).
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn list_for_scope(&self, scope: &ScopeTriple) -> Result<Vec<Policy>, RepositoryError>;
    async fn upsert(&self, policy: Policy) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
    /// Monotonic counter bumped on every mutation — lets the engine's
    /// background reload task detect "has anything changed" cheaply
    /// (SPEC_FULL.md §4.3) without diffing the whole rule set.
    async fn revision(&self) -> Result<i64, RepositoryError>;
}

#[async_trait]
impl PolicyRepository for Arc<dyn PolicyRepository> {
    async fn list_for_scope(&self, scope: &ScopeTriple) -> Result<Vec<Policy>, RepositoryError> {
        self.as_ref().list_for_scope(scope).await
    }
    async fn upsert(&self, policy: Policy) -> Result<(), RepositoryError> {
        self.as_ref().upsert(policy).await
    }
    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.as_ref().delete(id).await
    }
    async fn revision(&self) -> Result<i64, RepositoryError> {
        self.as_ref().revision().await
    }
}

/// Secrets resolve by name, most-specific scope wins per name (§3, §8).
#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn get_by_name(&self, name: &str, scope: &ScopeTriple) -> Result<Option<Secret>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<Secret>, RepositoryError>;
    async fn upsert(&self, secret: Secret) -> Result<(), RepositoryError>;
    async fn delete(&self, name: &str, level: &ScopeLevel) -> Result<(), RepositoryError>;
    /// Re-encrypt every row's ciphertext+nonce inside one transaction
    /// (§4.8 `change_passcode`, §9 "Re-encryption under change_passcode").
    async fn reencrypt_all(
        &self,
        reencrypt: Box<dyn Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> + Send + Sync>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
impl SecretRepository for Arc<dyn SecretRepository> {
    async fn get_by_name(&self, name: &str, scope: &ScopeTriple) -> Result<Option<Secret>, RepositoryError> {
        self.as_ref().get_by_name(name, scope).await
    }
    async fn list_all(&self) -> Result<Vec<Secret>, RepositoryError> {
        self.as_ref().list_all().await
    }
    async fn upsert(&self, secret: Secret) -> Result<(), RepositoryError> {
        self.as_ref().upsert(secret).await
    }
    async fn delete(&self, name: &str, level: &ScopeLevel) -> Result<(), RepositoryError> {
        self.as_ref().delete(name, level).await
    }
    async fn reencrypt_all(
        &self,
        reencrypt: Box<dyn Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> + Send + Sync>,
    ) -> Result<(), RepositoryError> {
        self.as_ref().reencrypt_all(reencrypt).await
    }
}

/// The audit log lives on a physically separate storage unit (§3, §4.9,
/// §4.10) — a distinct trait keeps that separation explicit even though
/// both traits may be backed by `sqlx` pools of the same driver.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, draft: AuditEventDraft) -> Result<AuditEvent, RepositoryError>;
    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditEvent>, RepositoryError>;
    async fn trim(&self, max_count: u64, max_age_days: u64) -> Result<u64, RepositoryError>;
}

#[async_trait]
impl AuditRepository for Arc<dyn AuditRepository> {
    async fn append(&self, draft: AuditEventDraft) -> Result<AuditEvent, RepositoryError> {
        self.as_ref().append(draft).await
    }
    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditEvent>, RepositoryError> {
        self.as_ref().query(query).await
    }
    async fn trim(&self, max_count: u64, max_age_days: u64) -> Result<u64, RepositoryError> {
        self.as_ref().trim(max_count, max_age_days).await
    }
}
