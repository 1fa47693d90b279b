// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session token entity (§3 "Session token").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionClass {
    ReadOnlyAnonymous,
    Authenticated,
}

/// A bearer token created by a successful passcode unlock (§3 "Session
/// token", §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
    pub permission_class: PermissionClass,
}

impl SessionToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn can_write(&self) -> bool {
        matches!(self.permission_class, PermissionClass::Authenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn token_is_expired_once_past_expiry() {
        let now = Utc::now();
        let token = SessionToken {
            token: "t".into(),
            expiry: now - Duration::seconds(1),
            permission_class: PermissionClass::Authenticated,
        };
        assert!(token.is_expired_at(now));
    }

    #[test]
    fn anonymous_token_cannot_write() {
        let token = SessionToken {
            token: "t".into(),
            expiry: Utc::now() + Duration::minutes(5),
            permission_class: PermissionClass::ReadOnlyAnonymous,
        };
        assert!(!token.can_write());
    }
}
