// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Secret entity (§3 "Secret").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scope::ScopeLevel;

/// Storage scope for a secret — distinct from the request-time
/// [`super::scope::ScopeTriple`]; this is the level the secret's *row* is
/// attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretScope {
    /// Not linked to any policy and not scoped to a target/user.
    Standalone,
    Global,
    Policed,
}

/// A secret row as persisted (ciphertext only — plaintext never reaches this
/// type outside the vault's decrypt path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub name: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub linked_policy_ids: Vec<String>,
    pub scope: SecretScope,
    pub scope_level: ScopeLevel,
    /// Declared placement for `http_request` injection — the outbound
    /// header name this secret's plaintext is written to when a linked
    /// policy matches (§4.6 "injected as headers per the secret's declared
    /// placement"). `None` for secrets that are never injected into
    /// outbound requests (e.g. ones only read via `secret_inject`).
    pub header_name: Option<String>,
}

impl Secret {
    /// A policed secret with zero linked policies degrades to standalone at
    /// read time — it stays dormant (no policy grants access via
    /// `secret_inject`) but remains retrievable by an operator (§3).
    pub fn effective_scope(&self) -> SecretScope {
        if matches!(self.scope, SecretScope::Policed) && self.linked_policy_ids.is_empty() {
            SecretScope::Standalone
        } else {
            self.scope
        }
    }

    pub fn is_dormant(&self) -> bool {
        matches!(self.scope, SecretScope::Policed) && self.linked_policy_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_with(scope: SecretScope, linked: Vec<&str>) -> Secret {
        Secret {
            id: "s1".into(),
            name: "API_KEY".into(),
            ciphertext: vec![1, 2, 3],
            nonce: vec![0; 12],
            created_at: Utc::now(),
            linked_policy_ids: linked.into_iter().map(String::from).collect(),
            scope,
            scope_level: ScopeLevel::Base,
            header_name: None,
        }
    }

    #[test]
    fn policed_with_no_links_degrades_to_standalone() {
        let secret = secret_with(SecretScope::Policed, vec![]);
        assert_eq!(secret.effective_scope(), SecretScope::Standalone);
        assert!(secret.is_dormant());
    }

    #[test]
    fn policed_with_links_stays_policed() {
        let secret = secret_with(SecretScope::Policed, vec!["policy-1"]);
        assert_eq!(secret.effective_scope(), SecretScope::Policed);
        assert!(!secret.is_dormant());
    }

    #[test]
    fn standalone_is_never_dormant() {
        let secret = secret_with(SecretScope::Standalone, vec![]);
        assert!(!secret.is_dormant());
    }
}
