// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Secret vault application service (§3 "Secret", §4.8).

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::repository::{RepositoryError, SecretRepository};
use crate::domain::scope::{ScopeLevel, ScopeTriple};
use crate::domain::secret::{Secret, SecretScope};
use crate::infrastructure::crypto::{
    self, derive_key, generate_salt, passcode_verification_hash, verify_passcode, CryptoError, DerivedKey,
    ScryptConfig, PBKDF2_HASH_LEN, SALT_LEN,
};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault is locked")]
    Locked,
    #[error("vault has no passcode set")]
    NoPasscode,
    #[error("incorrect passcode")]
    IncorrectPasscode,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Salt + verification hash persisted alongside the encrypted secrets,
/// independent of which rows exist (§4.8).
#[derive(Debug, Clone)]
pub struct VaultCredentials {
    pub salt: [u8; SALT_LEN],
    pub verification_hash: [u8; PBKDF2_HASH_LEN],
    pub pbkdf2_iterations: u32,
}

/// Persists/loads the vault's credential row — kept distinct from
/// `SecretRepository` because it's a singleton, not a per-name aggregate.
#[async_trait::async_trait]
pub trait VaultCredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<VaultCredentials>, RepositoryError>;
    async fn save(&self, credentials: VaultCredentials) -> Result<(), RepositoryError>;
}

enum KeyState {
    Locked,
    Unlocked(DerivedKey),
}

/// Locked by default; `set_passcode`/`unlock` admit reads, `lock` zeroes the
/// resident key (§4.8 "Lifecycle").
pub struct SecretVault<S: SecretRepository, C: VaultCredentialStore> {
    secrets: Arc<S>,
    credentials: Arc<C>,
    scrypt: ScryptConfig,
    key: RwLock<KeyState>,
}

impl<S: SecretRepository, C: VaultCredentialStore> SecretVault<S, C> {
    pub fn new(secrets: Arc<S>, credentials: Arc<C>, scrypt: ScryptConfig) -> Self {
        Self {
            secrets,
            credentials,
            scrypt,
            key: RwLock::new(KeyState::Locked),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(*self.key.read(), KeyState::Unlocked(_))
    }

    pub async fn has_passcode(&self) -> Result<bool, VaultError> {
        Ok(self.credentials.load().await?.is_some())
    }

    /// First-time initialisation: writes salt + verification hash and
    /// transitions locked → unlocked.
    pub async fn set_passcode(&self, passcode: &str, pbkdf2_iterations: u32) -> Result<(), VaultError> {
        if self.credentials.load().await?.is_some() {
            return Err(VaultError::IncorrectPasscode);
        }
        let salt = generate_salt();
        let verification_hash = passcode_verification_hash(passcode, &salt, pbkdf2_iterations);
        self.credentials
            .save(VaultCredentials {
                salt,
                verification_hash,
                pbkdf2_iterations,
            })
            .await?;
        let key = derive_key(passcode, &salt, self.scrypt)?;
        *self.key.write() = KeyState::Unlocked(key);
        Ok(())
    }

    /// Re-derives the key and admits vault reads; rejects in constant time
    /// on mismatch (§4.8).
    pub async fn unlock(&self, passcode: &str) -> Result<(), VaultError> {
        let creds = self.credentials.load().await?.ok_or(VaultError::NoPasscode)?;
        let candidate = passcode_verification_hash(passcode, &creds.salt, creds.pbkdf2_iterations);
        if !verify_passcode(&candidate, &creds.verification_hash) {
            return Err(VaultError::IncorrectPasscode);
        }
        let key = derive_key(passcode, &creds.salt, self.scrypt)?;
        *self.key.write() = KeyState::Unlocked(key);
        Ok(())
    }

    /// Zeroes and releases the resident key.
    pub fn lock(&self) {
        *self.key.write() = KeyState::Locked;
    }

    /// Verifies `old`, derives a new key from a fresh salt, re-encrypts every
    /// stored secret inside one pass, then swaps the key — a failure before
    /// the swap leaves the previous ciphertexts untouched (§4.8).
    pub async fn change_passcode(&self, old: &str, new: &str) -> Result<(), VaultError> {
        let creds = self.credentials.load().await?.ok_or(VaultError::NoPasscode)?;
        let old_candidate = passcode_verification_hash(old, &creds.salt, creds.pbkdf2_iterations);
        if !verify_passcode(&old_candidate, &creds.verification_hash) {
            return Err(VaultError::IncorrectPasscode);
        }
        let old_key = derive_key(old, &creds.salt, self.scrypt)?;
        let new_salt = generate_salt();
        let new_key = derive_key(new, &new_salt, self.scrypt)?;

        let reencrypt_fn: Box<dyn Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> + Send + Sync> = {
            Box::new(move |ciphertext: &[u8], nonce: &[u8]| {
                crypto::reencrypt(&old_key, &new_key, ciphertext, nonce)
                    .map(|c| (c.bytes, c.nonce))
                    .map_err(|e| e.to_string())
            })
        };
        self.secrets
            .reencrypt_all(reencrypt_fn)
            .await
            .map_err(VaultError::Repository)?;

        let new_verification_hash = passcode_verification_hash(new, &new_salt, creds.pbkdf2_iterations);
        self.credentials
            .save(VaultCredentials {
                salt: new_salt,
                verification_hash: new_verification_hash,
                pbkdf2_iterations: creds.pbkdf2_iterations,
            })
            .await?;

        let confirmed_key = derive_key(new, &new_salt, self.scrypt)?;
        *self.key.write() = KeyState::Unlocked(confirmed_key);
        Ok(())
    }

    /// Returns the most-specific value matching `scope` for `name`, or
    /// `Ok(None)` if no row exists at any level (§4.8 "Resolution").
    pub async fn get_by_name(&self, name: &str, scope: &ScopeTriple) -> Result<Option<Vec<u8>>, VaultError> {
        let guard = self.key.read();
        let key = match &*guard {
            KeyState::Unlocked(key) => key,
            KeyState::Locked => return Err(VaultError::Locked),
        };
        let secret = match self.secrets.get_by_name(name, scope).await? {
            Some(s) => s,
            None => return Ok(None),
        };
        let plaintext = crypto::decrypt(key, &secret.ciphertext, &secret.nonce)?;
        Ok(Some(plaintext))
    }

    /// Encrypts and stores a new secret value at the given scope level.
    #[allow(clippy::too_many_arguments)]
    pub async fn put(
        &self,
        name: &str,
        plaintext: &[u8],
        scope: SecretScope,
        level: ScopeLevel,
        linked_policy_ids: Vec<String>,
        header_name: Option<String>,
    ) -> Result<(), VaultError> {
        let guard = self.key.read();
        let key = match &*guard {
            KeyState::Unlocked(key) => key,
            KeyState::Locked => return Err(VaultError::Locked),
        };
        let ciphertext = crypto::encrypt(key, plaintext)?;
        self.secrets
            .upsert(Secret {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                ciphertext: ciphertext.bytes,
                nonce: ciphertext.nonce,
                created_at: chrono::Utc::now(),
                linked_policy_ids,
                scope,
                scope_level: level,
                header_name,
            })
            .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str, level: &ScopeLevel) -> Result<(), VaultError> {
        self.secrets.delete(name, level).await?;
        Ok(())
    }

    pub async fn list_metadata(&self) -> Result<Vec<Secret>, VaultError> {
        Ok(self.secrets.list_all().await?)
    }

    /// Resolves every secret whose `linked_policy_ids` contains
    /// `matched_policy_id` and that declares a header placement, decrypting
    /// each in turn (§4.6 "injected as headers per the secret's declared
    /// placement"). A policed secret with no links is dormant and never
    /// appears here — see [`Secret::is_dormant`].
    pub async fn resolve_injections(&self, matched_policy_id: &str) -> Result<Vec<(String, Vec<u8>)>, VaultError> {
        let guard = self.key.read();
        let key = match &*guard {
            KeyState::Unlocked(key) => key,
            KeyState::Locked => return Err(VaultError::Locked),
        };
        let mut injections = Vec::new();
        for secret in self.secrets.list_all().await? {
            let Some(header_name) = &secret.header_name else { continue };
            if !secret.linked_policy_ids.iter().any(|id| id == matched_policy_id) {
                continue;
            }
            let plaintext = crypto::decrypt(key, &secret.ciphertext, &secret.nonce)?;
            injections.push((header_name.clone(), plaintext));
        }
        Ok(injections)
    }
}

/// Object-safe facade over `SecretVault<S, C>` so the control API and daemon
/// wiring can hold one `Arc<dyn VaultHandle>` instead of threading the two
/// storage type parameters through every call site (same erasure pattern as
/// `MethodHandler` for the per-method handler set).
#[async_trait::async_trait]
pub trait VaultHandle: Send + Sync {
    fn is_unlocked(&self) -> bool;
    async fn has_passcode(&self) -> Result<bool, VaultError>;
    async fn set_passcode(&self, passcode: &str, pbkdf2_iterations: u32) -> Result<(), VaultError>;
    async fn unlock(&self, passcode: &str) -> Result<(), VaultError>;
    fn lock(&self);
    async fn change_passcode(&self, old: &str, new: &str) -> Result<(), VaultError>;
    async fn get_by_name(&self, name: &str, scope: &ScopeTriple) -> Result<Option<Vec<u8>>, VaultError>;
    #[allow(clippy::too_many_arguments)]
    async fn put(
        &self,
        name: &str,
        plaintext: &[u8],
        scope: SecretScope,
        level: ScopeLevel,
        linked_policy_ids: Vec<String>,
        header_name: Option<String>,
    ) -> Result<(), VaultError>;
    async fn delete(&self, name: &str, level: &ScopeLevel) -> Result<(), VaultError>;
    async fn list_metadata(&self) -> Result<Vec<Secret>, VaultError>;
    async fn resolve_injections(&self, matched_policy_id: &str) -> Result<Vec<(String, Vec<u8>)>, VaultError>;
}

#[async_trait::async_trait]
impl<S: SecretRepository + 'static, C: VaultCredentialStore + 'static> VaultHandle for SecretVault<S, C> {
    fn is_unlocked(&self) -> bool {
        SecretVault::is_unlocked(self)
    }
    async fn has_passcode(&self) -> Result<bool, VaultError> {
        SecretVault::has_passcode(self).await
    }
    async fn set_passcode(&self, passcode: &str, pbkdf2_iterations: u32) -> Result<(), VaultError> {
        SecretVault::set_passcode(self, passcode, pbkdf2_iterations).await
    }
    async fn unlock(&self, passcode: &str) -> Result<(), VaultError> {
        SecretVault::unlock(self, passcode).await
    }
    fn lock(&self) {
        SecretVault::lock(self)
    }
    async fn change_passcode(&self, old: &str, new: &str) -> Result<(), VaultError> {
        SecretVault::change_passcode(self, old, new).await
    }
    async fn get_by_name(&self, name: &str, scope: &ScopeTriple) -> Result<Option<Vec<u8>>, VaultError> {
        SecretVault::get_by_name(self, name, scope).await
    }
    async fn put(
        &self,
        name: &str,
        plaintext: &[u8],
        scope: SecretScope,
        level: ScopeLevel,
        linked_policy_ids: Vec<String>,
        header_name: Option<String>,
    ) -> Result<(), VaultError> {
        SecretVault::put(self, name, plaintext, scope, level, linked_policy_ids, header_name).await
    }
    async fn delete(&self, name: &str, level: &ScopeLevel) -> Result<(), VaultError> {
        SecretVault::delete(self, name, level).await
    }
    async fn list_metadata(&self) -> Result<Vec<Secret>, VaultError> {
        SecretVault::list_metadata(self).await
    }
    async fn resolve_injections(&self, matched_policy_id: &str) -> Result<Vec<(String, Vec<u8>)>, VaultError> {
        SecretVault::resolve_injections(self, matched_policy_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeSecretRepo {
        rows: Mutex<HashMap<String, Secret>>,
    }

    #[async_trait]
    impl SecretRepository for FakeSecretRepo {
        async fn get_by_name(&self, name: &str, _scope: &ScopeTriple) -> Result<Option<Secret>, RepositoryError> {
            Ok(self.rows.lock().unwrap().get(name).cloned())
        }
        async fn list_all(&self) -> Result<Vec<Secret>, RepositoryError> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
        async fn upsert(&self, secret: Secret) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().insert(secret.name.clone(), secret);
            Ok(())
        }
        async fn delete(&self, name: &str, _level: &ScopeLevel) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().remove(name);
            Ok(())
        }
        async fn reencrypt_all(
            &self,
            reencrypt: Box<dyn Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> + Send + Sync>,
        ) -> Result<(), RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            for secret in rows.values_mut() {
                let (ciphertext, nonce) =
                    reencrypt(&secret.ciphertext, &secret.nonce).map_err(RepositoryError::Storage)?;
                secret.ciphertext = ciphertext;
                secret.nonce = nonce;
            }
            Ok(())
        }
    }

    struct FakeCredentialStore {
        creds: Mutex<Option<VaultCredentials>>,
    }

    #[async_trait]
    impl VaultCredentialStore for FakeCredentialStore {
        async fn load(&self) -> Result<Option<VaultCredentials>, RepositoryError> {
            Ok(self.creds.lock().unwrap().clone())
        }
        async fn save(&self, credentials: VaultCredentials) -> Result<(), RepositoryError> {
            *self.creds.lock().unwrap() = Some(credentials);
            Ok(())
        }
    }

    fn fast_scrypt() -> ScryptConfig {
        ScryptConfig::from_n(16, 1, 1).unwrap()
    }

    fn vault() -> SecretVault<FakeSecretRepo, FakeCredentialStore> {
        SecretVault::new(
            Arc::new(FakeSecretRepo { rows: Mutex::new(HashMap::new()) }),
            Arc::new(FakeCredentialStore { creds: Mutex::new(None) }),
            fast_scrypt(),
        )
    }

    #[tokio::test]
    async fn reads_fail_while_locked() {
        let vault = vault();
        let err = vault.get_by_name("API_KEY", &ScopeTriple::base()).await;
        assert!(matches!(err, Err(VaultError::Locked)));
    }

    #[tokio::test]
    async fn set_passcode_then_unlock_round_trips_a_secret() {
        let vault = vault();
        vault.set_passcode("hunter2", 1000).await.unwrap();
        vault
            .put("API_KEY", b"s3cr3t", SecretScope::Standalone, ScopeLevel::Base, vec![], None)
            .await
            .unwrap();
        vault.lock();
        assert!(!vault.is_unlocked());
        assert!(matches!(
            vault.get_by_name("API_KEY", &ScopeTriple::base()).await,
            Err(VaultError::Locked)
        ));
        vault.unlock("hunter2").await.unwrap();
        let value = vault.get_by_name("API_KEY", &ScopeTriple::base()).await.unwrap();
        assert_eq!(value, Some(b"s3cr3t".to_vec()));
    }

    #[tokio::test]
    async fn unlock_rejects_wrong_passcode() {
        let vault = vault();
        vault.set_passcode("hunter2", 1000).await.unwrap();
        vault.lock();
        let err = vault.unlock("wrong").await;
        assert!(matches!(err, Err(VaultError::IncorrectPasscode)));
    }

    #[tokio::test]
    async fn change_passcode_keeps_secret_readable_under_new_passcode() {
        let vault = vault();
        vault.set_passcode("hunter2", 1000).await.unwrap();
        vault
            .put("API_KEY", b"s3cr3t", SecretScope::Standalone, ScopeLevel::Base, vec![], None)
            .await
            .unwrap();
        vault.change_passcode("hunter2", "hunter3").await.unwrap();
        let value = vault.get_by_name("API_KEY", &ScopeTriple::base()).await.unwrap();
        assert_eq!(value, Some(b"s3cr3t".to_vec()));

        vault.lock();
        assert!(matches!(vault.unlock("hunter2").await, Err(VaultError::IncorrectPasscode)));
        vault.unlock("hunter3").await.unwrap();
    }

    #[tokio::test]
    async fn change_passcode_rejects_wrong_old_passcode_without_touching_data() {
        let vault = vault();
        vault.set_passcode("hunter2", 1000).await.unwrap();
        vault
            .put("API_KEY", b"s3cr3t", SecretScope::Standalone, ScopeLevel::Base, vec![], None)
            .await
            .unwrap();
        let err = vault.change_passcode("wrong-old", "new-one").await;
        assert!(matches!(err, Err(VaultError::IncorrectPasscode)));
        let value = vault.get_by_name("API_KEY", &ScopeTriple::base()).await.unwrap();
        assert_eq!(value, Some(b"s3cr3t".to_vec()));
    }
}
