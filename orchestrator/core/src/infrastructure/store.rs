// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Primary scoped store — SQLite (§4.9)
//!
//! Backs configuration, policies, secrets and the vault's credential row.
//! A distinct `SqlitePool` from the audit store's (`infrastructure::audit_store`)
//! so the high-write audit log never contends with these lower-volume tables.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::application::vault::{VaultCredentialStore, VaultCredentials};
use crate::domain::policy::Policy;
use crate::domain::repository::{ConfigRepository, PolicyRepository, RepositoryError, SecretRepository};
use crate::domain::scope::{ScopeLevel, ScopeTriple};
use crate::domain::secret::{Secret, SecretScope};

/// Matches the application id a fresh database is stamped with at
/// migration time; a mismatch on open means the file was not created by
/// this broker, or was tampered with (§4.9, §6 "Exit codes" code 4).
pub const APPLICATION_ID: i32 = 0x41_67_53_68; // "AgSh"

#[derive(Debug, thiserror::Error)]
pub enum StoreOpenError {
    #[error("failed to connect to store at {path:?}: {source}")]
    Connect {
        path: std::path::PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("tamper detected at {path:?}: expected application_id {expected:#x}, found {found}")]
    Tamper {
        path: std::path::PathBuf,
        expected: i32,
        found: i32,
    },
}

/// Opens (creating if absent) the primary store, runs migrations, and
/// verifies the `PRAGMA application_id` stamp (§4.9).
pub async fn open_primary_store(path: &Path) -> Result<SqlitePool, StoreOpenError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;

    sqlx::migrate!("./migrations/primary").run(&pool).await?;
    verify_application_id(&pool, path).await?;
    Ok(pool)
}

async fn verify_application_id(pool: &SqlitePool, path: &Path) -> Result<(), StoreOpenError> {
    let row = sqlx::query("PRAGMA application_id")
        .fetch_one(pool)
        .await
        .map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
    let found: i32 = row.try_get(0).unwrap_or(0);
    if found == 0 {
        // Freshly created file: stamp it.
        let stamp = format!("PRAGMA application_id = {APPLICATION_ID}");
        sqlx::query(&stamp).execute(pool).await.map_err(|e| StoreOpenError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        return Ok(());
    }
    if found != APPLICATION_ID {
        return Err(StoreOpenError::Tamper {
            path: path.to_path_buf(),
            expected: APPLICATION_ID,
            found,
        });
    }
    Ok(())
}

fn scope_columns(level: &ScopeLevel) -> (Option<&str>, Option<&str>) {
    match level {
        ScopeLevel::Base => (None, None),
        ScopeLevel::Target(t) => (Some(t.as_str()), None),
        ScopeLevel::TargetUser(t, u) => (Some(t.as_str()), Some(u.as_str())),
    }
}

pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
    /// Walks `[base] -> [target] -> [target,user]`, projecting the most
    /// specific non-null row for `field` (§4.9 "Scoped queries").
    async fn get_field(&self, field: &str, scope: &ScopeTriple) -> Result<Option<JsonValue>, RepositoryError> {
        let mut best: Option<JsonValue> = None;
        for level in scope.levels() {
            let (target, user) = scope_columns(&level);
            let row = sqlx::query(
                "SELECT value FROM config_fields WHERE field = ?1 AND target IS ?2 AND user IS ?3",
            )
            .bind(field)
            .bind(target)
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
            if let Some(row) = row {
                let raw: String = row.try_get("value").map_err(|e| RepositoryError::Storage(e.to_string()))?;
                if let Ok(value) = serde_json::from_str::<JsonValue>(&raw) {
                    best = Some(value);
                }
            }
        }
        Ok(best)
    }

    async fn set_field(&self, field: &str, level: &ScopeLevel, value: JsonValue) -> Result<(), RepositoryError> {
        let (target, user) = scope_columns(level);
        let raw = serde_json::to_string(&value).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO config_fields (field, target, user, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (field, target, user) DO UPDATE SET value = excluded.value",
        )
        .bind(field)
        .bind(target)
        .bind(user)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }
}

pub struct SqlitePolicyRepository {
    pool: SqlitePool,
}

impl SqlitePolicyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepository for SqlitePolicyRepository {
    /// Unions rows across all three scope levels (§4.9 "Scoped queries").
    async fn list_for_scope(&self, scope: &ScopeTriple) -> Result<Vec<Policy>, RepositoryError> {
        let mut all = Vec::new();
        for level in scope.levels() {
            let (target, user) = scope_columns(&level);
            let rows = sqlx::query("SELECT body FROM policies WHERE target IS ?1 AND user IS ?2")
                .bind(target)
                .bind(user)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
            for row in rows {
                let raw: String = row.try_get("body").map_err(|e| RepositoryError::Storage(e.to_string()))?;
                let policy: Policy = serde_json::from_str(&raw).map_err(|e| RepositoryError::Storage(e.to_string()))?;
                all.push(policy);
            }
        }
        Ok(all)
    }

    async fn upsert(&self, policy: Policy) -> Result<(), RepositoryError> {
        let (target, user) = scope_columns(&policy.scope_level);
        let body = serde_json::to_string(&policy).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO policies (id, target, user, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET target = excluded.target, user = excluded.user, body = excluded.body",
        )
        .bind(&policy.id)
        .bind(target)
        .bind(user)
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        sqlx::query("UPDATE store_meta SET policy_revision = policy_revision + 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        tx.commit().await.map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::Storage(e.to_string()))?;
        sqlx::query("DELETE FROM policies WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        sqlx::query("UPDATE store_meta SET policy_revision = policy_revision + 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        tx.commit().await.map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn revision(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT policy_revision FROM store_meta")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        row.try_get(0).map_err(|e| RepositoryError::Storage(e.to_string()))
    }
}

pub struct SqliteSecretRepository {
    pool: SqlitePool,
}

impl SqliteSecretRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_secret(row: &sqlx::sqlite::SqliteRow) -> Result<Secret, RepositoryError> {
        let scope_str: String = row.try_get("scope").map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let scope = match scope_str.as_str() {
            "standalone" => SecretScope::Standalone,
            "global" => SecretScope::Global,
            "policed" => SecretScope::Policed,
            other => return Err(RepositoryError::Storage(format!("unknown secret scope: {other}"))),
        };
        let target: Option<String> = row.try_get("target").map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let user: Option<String> = row.try_get("user").map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let scope_level = match (target, user) {
            (None, _) => ScopeLevel::Base,
            (Some(t), None) => ScopeLevel::Target(t),
            (Some(t), Some(u)) => ScopeLevel::TargetUser(t, u),
        };
        let linked_raw: String = row
            .try_get("linked_policy_ids")
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let linked_policy_ids: Vec<String> =
            serde_json::from_str(&linked_raw).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(Secret {
            id: row.try_get("id").map_err(|e| RepositoryError::Storage(e.to_string()))?,
            name: row.try_get("name").map_err(|e| RepositoryError::Storage(e.to_string()))?,
            ciphertext: row.try_get("ciphertext").map_err(|e| RepositoryError::Storage(e.to_string()))?,
            nonce: row.try_get("nonce").map_err(|e| RepositoryError::Storage(e.to_string()))?,
            created_at: row.try_get("created_at").map_err(|e| RepositoryError::Storage(e.to_string()))?,
            linked_policy_ids,
            scope,
            scope_level,
            header_name: row.try_get("header_name").map_err(|e| RepositoryError::Storage(e.to_string()))?,
        })
    }
}

fn scope_tag(scope: SecretScope) -> &'static str {
    match scope {
        SecretScope::Standalone => "standalone",
        SecretScope::Global => "global",
        SecretScope::Policed => "policed",
    }
}

#[async_trait]
impl SecretRepository for SqliteSecretRepository {
    /// Groups by name across levels, returning the most-specific non-null
    /// row (§4.9 "Scoped queries").
    async fn get_by_name(&self, name: &str, scope: &ScopeTriple) -> Result<Option<Secret>, RepositoryError> {
        let mut candidates = Vec::new();
        for level in scope.levels() {
            let (target, user) = scope_columns(&level);
            let row = sqlx::query("SELECT * FROM secrets WHERE name = ?1 AND target IS ?2 AND user IS ?3")
                .bind(name)
                .bind(target)
                .bind(user)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
            if let Some(row) = row {
                candidates.push((level, Self::row_to_secret(&row)?));
            }
        }
        Ok(crate::domain::scope::resolve_most_specific(candidates))
    }

    async fn list_all(&self) -> Result<Vec<Secret>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM secrets")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        rows.iter().map(Self::row_to_secret).collect()
    }

    async fn upsert(&self, secret: Secret) -> Result<(), RepositoryError> {
        let (target, user) = scope_columns(&secret.scope_level);
        let linked = serde_json::to_string(&secret.linked_policy_ids).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO secrets (id, name, target, user, ciphertext, nonce, created_at, linked_policy_ids, scope, header_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (name, target, user) DO UPDATE SET
                ciphertext = excluded.ciphertext, nonce = excluded.nonce,
                linked_policy_ids = excluded.linked_policy_ids, scope = excluded.scope,
                header_name = excluded.header_name",
        )
        .bind(&secret.id)
        .bind(&secret.name)
        .bind(target)
        .bind(user)
        .bind(&secret.ciphertext)
        .bind(&secret.nonce)
        .bind(secret.created_at)
        .bind(linked)
        .bind(scope_tag(secret.scope))
        .bind(&secret.header_name)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, name: &str, level: &ScopeLevel) -> Result<(), RepositoryError> {
        let (target, user) = scope_columns(level);
        sqlx::query("DELETE FROM secrets WHERE name = ?1 AND target IS ?2 AND user IS ?3")
            .bind(name)
            .bind(target)
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Re-encrypts every row inside one transaction; any failure aborts the
    /// transaction and leaves the previous ciphertexts untouched (§4.8).
    async fn reencrypt_all(
        &self,
        reencrypt: Box<dyn Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> + Send + Sync>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let rows = sqlx::query("SELECT id, ciphertext, nonce FROM secrets")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        for row in rows {
            let id: String = row.try_get("id").map_err(|e| RepositoryError::Storage(e.to_string()))?;
            let ciphertext: Vec<u8> = row.try_get("ciphertext").map_err(|e| RepositoryError::Storage(e.to_string()))?;
            let nonce: Vec<u8> = row.try_get("nonce").map_err(|e| RepositoryError::Storage(e.to_string()))?;
            let (new_ciphertext, new_nonce) = reencrypt(&ciphertext, &nonce).map_err(RepositoryError::Storage)?;
            sqlx::query("UPDATE secrets SET ciphertext = ?1, nonce = ?2 WHERE id = ?3")
                .bind(new_ciphertext)
                .bind(new_nonce)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }
}

pub struct SqliteVaultCredentialStore {
    pool: SqlitePool,
}

impl SqliteVaultCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VaultCredentialStore for SqliteVaultCredentialStore {
    async fn load(&self) -> Result<Option<VaultCredentials>, RepositoryError> {
        let row = sqlx::query("SELECT salt, verification_hash, pbkdf2_iterations FROM vault_credentials WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let salt_vec: Vec<u8> = row.try_get("salt").map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let hash_vec: Vec<u8> = row
            .try_get("verification_hash")
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let pbkdf2_iterations: i64 = row
            .try_get("pbkdf2_iterations")
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let salt: [u8; 16] = salt_vec
            .try_into()
            .map_err(|_| RepositoryError::Storage("stored salt has unexpected length".into()))?;
        let verification_hash: [u8; 64] = hash_vec
            .try_into()
            .map_err(|_| RepositoryError::Storage("stored verification hash has unexpected length".into()))?;
        Ok(Some(VaultCredentials {
            salt,
            verification_hash,
            pbkdf2_iterations: pbkdf2_iterations as u32,
        }))
    }

    async fn save(&self, credentials: VaultCredentials) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO vault_credentials (id, salt, verification_hash, pbkdf2_iterations) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET salt = excluded.salt, verification_hash = excluded.verification_hash,
                pbkdf2_iterations = excluded.pbkdf2_iterations",
        )
        .bind(credentials.salt.to_vec())
        .bind(credentials.verification_hash.to_vec())
        .bind(credentials.pbkdf2_iterations as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }
}
