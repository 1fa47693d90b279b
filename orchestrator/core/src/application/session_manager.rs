// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bearer session issuance, verification and refresh for the control API
//! (§3 "Session token", §4.11).

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::domain::session::{PermissionClass, SessionToken};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session token not found")]
    NotFound,
    #[error("session token expired")]
    Expired,
}

/// In-memory bearer-token table. Sessions are created by a successful vault
/// unlock (or, when `anonymous_read_only` is enabled, issued without one)
/// and are destroyed on `lock()` or timeout — nothing here is persisted
/// across a daemon restart, matching §3's "destroyed on lock or timeout".
pub struct SessionManager {
    ttl: Duration,
    tokens: RwLock<HashMap<String, SessionToken>>,
}

impl SessionManager {
    pub fn new(ttl: StdDuration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn issue(&self, permission_class: PermissionClass) -> SessionToken {
        let token = SessionToken {
            token: random_token(),
            expiry: Utc::now() + self.ttl,
            permission_class,
        };
        self.tokens.write().insert(token.token.clone(), token.clone());
        token
    }

    /// Verifies a bearer string in constant time against each resident
    /// token's identity (§5: "refused in constant time once past expiry" —
    /// applied here to the lookup itself rather than a single fixed secret,
    /// since the table holds many independently valid tokens).
    pub fn verify(&self, bearer: &str) -> Result<SessionToken, SessionError> {
        let tokens = self.tokens.read();
        let matched = tokens.values().find(|t| bool::from(t.token.as_bytes().ct_eq(bearer.as_bytes())));
        let token = matched.cloned().ok_or(SessionError::NotFound)?;
        if token.is_expired_at(Utc::now()) {
            return Err(SessionError::Expired);
        }
        Ok(token)
    }

    /// Re-presenting a still-valid bearer before expiry extends it by the
    /// configured TTL (§3: "refreshed by re-presenting the bearer before
    /// expiry").
    pub fn refresh(&self, bearer: &str) -> Result<SessionToken, SessionError> {
        let mut tokens = self.tokens.write();
        let existing = tokens.get(bearer).cloned().ok_or(SessionError::NotFound)?;
        if existing.is_expired_at(Utc::now()) {
            tokens.remove(bearer);
            return Err(SessionError::Expired);
        }
        let refreshed = SessionToken {
            expiry: Utc::now() + self.ttl,
            ..existing
        };
        tokens.insert(refreshed.token.clone(), refreshed.clone());
        Ok(refreshed)
    }

    pub fn revoke(&self, bearer: &str) {
        self.tokens.write().remove(bearer);
    }

    /// Drops every resident token — called on `vault.lock()` (§3: "destroyed
    /// on lock").
    pub fn revoke_all(&self) {
        self.tokens.write().clear();
    }

    /// Sweeps expired tokens; intended to be called periodically alongside
    /// the other background tasks.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.tokens.write().retain(|_, t| !t.is_expired_at(now));
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_successfully() {
        let manager = SessionManager::new(StdDuration::from_secs(3600));
        let token = manager.issue(PermissionClass::Authenticated);
        let verified = manager.verify(&token.token).unwrap();
        assert_eq!(verified.token, token.token);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let manager = SessionManager::new(StdDuration::from_secs(3600));
        assert!(matches!(manager.verify("nope"), Err(SessionError::NotFound)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = SessionManager::new(StdDuration::from_secs(0));
        let token = manager.issue(PermissionClass::Authenticated);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(matches!(manager.verify(&token.token), Err(SessionError::Expired)));
    }

    #[test]
    fn refresh_extends_expiry() {
        let manager = SessionManager::new(StdDuration::from_secs(3600));
        let token = manager.issue(PermissionClass::Authenticated);
        let refreshed = manager.refresh(&token.token).unwrap();
        assert!(refreshed.expiry >= token.expiry);
    }

    #[test]
    fn revoke_all_drops_every_token() {
        let manager = SessionManager::new(StdDuration::from_secs(3600));
        let token = manager.issue(PermissionClass::Authenticated);
        manager.revoke_all();
        assert!(matches!(manager.verify(&token.token), Err(SessionError::NotFound)));
    }
}
