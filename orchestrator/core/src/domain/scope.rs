// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scope triples and the three merge strategies described in §3 "Scope
//! triple": config (most-specific-non-null wins per field), policies
//! (union), secrets (most-specific-per-name wins).

use serde::{Deserialize, Serialize};

/// `(profile-or-target-id, user-name)` where either or both may be absent.
/// Absent means "base".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeTriple {
    pub target: Option<String>,
    pub user: Option<String>,
}

impl ScopeTriple {
    pub fn base() -> Self {
        Self::default()
    }

    pub fn target_only(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            user: None,
        }
    }

    pub fn target_and_user(target: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            user: Some(user.into()),
        }
    }

    /// The three levels this triple resolves through, ordered from least to
    /// most specific, as literal scope keys a store row can carry.
    ///
    /// `[base] -> [target] -> [target,user]`
    pub fn levels(&self) -> Vec<ScopeLevel> {
        let mut levels = vec![ScopeLevel::Base];
        if let Some(target) = &self.target {
            levels.push(ScopeLevel::Target(target.clone()));
            if let Some(user) = &self.user {
                levels.push(ScopeLevel::TargetUser(target.clone(), user.clone()));
            }
        }
        levels
    }

    /// Specificity rank used to pick the "most specific non-null wins" row
    /// for config and secrets. Higher is more specific.
    pub fn specificity(&self) -> u8 {
        match (&self.target, &self.user) {
            (None, _) => 0,
            (Some(_), None) => 1,
            (Some(_), Some(_)) => 2,
        }
    }
}

/// A concrete scope level a stored row is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeLevel {
    Base,
    Target(String),
    TargetUser(String, String),
}

impl Default for ScopeLevel {
    fn default() -> Self {
        ScopeLevel::Base
    }
}

impl ScopeLevel {
    pub fn target(&self) -> Option<&str> {
        match self {
            ScopeLevel::Base => None,
            ScopeLevel::Target(t) | ScopeLevel::TargetUser(t, _) => Some(t.as_str()),
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            ScopeLevel::TargetUser(_, u) => Some(u.as_str()),
            _ => None,
        }
    }

    pub fn specificity(&self) -> u8 {
        match self {
            ScopeLevel::Base => 0,
            ScopeLevel::Target(_) => 1,
            ScopeLevel::TargetUser(_, _) => 2,
        }
    }
}

/// Merge a series of `(level, value)` rows for one configuration field: the
/// most-specific level whose value is non-null wins; nulls inherit.
pub fn merge_config_field<T: Clone>(rows: &[(ScopeLevel, Option<T>)]) -> Option<T> {
    rows.iter()
        .filter(|(_, v)| v.is_some())
        .max_by_key(|(level, _)| level.specificity())
        .and_then(|(_, v)| v.clone())
}

/// Resolve the most-specific row for a given secret name across whatever
/// scope levels have a value, per §3's "Secrets — resolve by name;
/// most-specific scope wins per name" and §8's resolution invariant.
pub fn resolve_most_specific<T>(rows: Vec<(ScopeLevel, T)>) -> Option<T> {
    rows.into_iter()
        .max_by_key(|(level, _)| level.specificity())
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_expand_from_base_to_target_user() {
        let triple = ScopeTriple::target_and_user("git", "alice");
        let levels = triple.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], ScopeLevel::Base);
        assert_eq!(levels[1], ScopeLevel::Target("git".into()));
        assert_eq!(levels[2], ScopeLevel::TargetUser("git".into(), "alice".into()));
    }

    #[test]
    fn base_only_triple_has_one_level() {
        let triple = ScopeTriple::base();
        assert_eq!(triple.levels(), vec![ScopeLevel::Base]);
    }

    #[test]
    fn config_merge_prefers_most_specific_non_null() {
        let rows = vec![
            (ScopeLevel::Base, Some(1)),
            (ScopeLevel::Target("git".into()), None),
            (ScopeLevel::TargetUser("git".into(), "alice".into()), Some(3)),
        ];
        assert_eq!(merge_config_field(&rows), Some(3));
    }

    #[test]
    fn config_merge_inherits_base_when_more_specific_is_null() {
        let rows: Vec<(ScopeLevel, Option<i32>)> = vec![
            (ScopeLevel::Base, Some(1)),
            (ScopeLevel::Target("git".into()), None),
        ];
        assert_eq!(merge_config_field(&rows), Some(1));
    }

    #[test]
    fn resolve_most_specific_picks_deepest_match() {
        let rows = vec![
            (ScopeLevel::Base, "base-value"),
            (ScopeLevel::Target("git".into()), "target-value"),
        ];
        assert_eq!(resolve_most_specific(rows), Some("target-value"));
    }
}
