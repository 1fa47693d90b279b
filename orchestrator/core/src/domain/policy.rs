// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy entities and the pattern language the policy engine evaluates
//! against (§3 "Policy", §4.3 "Pattern semantics").

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::scope::ScopeLevel;

/// What a policy permits or forbids once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyAction {
    Allow,
    Deny,
    /// Never used in effective matching without an upstream human-in-the-loop
    /// collaborator; the engine treats it as a deny until that collaborator
    /// resolves it (out of scope — §1).
    ApprovalPending,
}

/// Which request surface a policy's patterns are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetType {
    Url,
    Command,
    Filesystem,
    Skill,
}

/// Filesystem operation subset an allow rule grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsOp {
    Read,
    Write,
}

/// Network egress mode carried by an allow decision's sandbox hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressMode {
    Direct,
    Proxy,
    None,
}

impl Default for EgressMode {
    fn default() -> Self {
        EgressMode::None
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy pattern list must not be empty")]
    EmptyPatternList,
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// A single rule in the policy set (§3 "Policy").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub action: PolicyAction,
    pub target: TargetType,
    pub patterns: Vec<String>,
    pub enabled: bool,
    /// Higher values are evaluated first.
    pub priority: i64,
    /// e.g. `"command:git"` — restricts this policy to a calling context.
    pub scope_restriction: Option<String>,
    /// Where this policy's row is placed — base, a target, or a
    /// target+user (§3 "Policies — union across base, target, and
    /// target+user"), mirroring how [`super::secret::Secret`] carries its
    /// own `scope_level`. Distinct from `scope_restriction`, which narrows
    /// which *calling context* the rule applies to, not where it is stored.
    #[serde(default)]
    pub scope_level: ScopeLevel,
    pub fs_ops: Option<HashSet<FsOp>>,
    pub egress_mode: Option<EgressMode>,
    /// Workspace-root override carried as a sandbox hint for `exec`.
    pub workspace_override: Option<String>,
    /// Environment variable names an `exec` allow rule whitelists through to
    /// the spawned child (§4.5 item 4).
    pub env_allowlist: Option<Vec<String>>,
}

impl Policy {
    /// Validate the entity-level invariants from §3: pattern list non-empty,
    /// `approval-pending` never reaches here as an active matching outcome
    /// without upstream resolution (enforced by the engine, not this type).
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.patterns.is_empty() {
            return Err(PolicyError::EmptyPatternList);
        }
        for p in &self.patterns {
            CompiledPattern::compile(p).map_err(PolicyError::InvalidPattern)?;
        }
        Ok(())
    }

    /// Identity used for the "two enabled policies with identical (target,
    /// pattern, scope) are not both allowed to exist" invariant — last write
    /// wins at update time, enforced by the store on insert/update.
    pub fn identity_key(&self) -> (TargetType, String, Option<String>) {
        (
            self.target,
            self.patterns.join(","),
            self.scope_restriction.clone(),
        )
    }
}

/// A policy pattern compiled into segments for repeated evaluation without
/// re-parsing per request (SPEC_FULL.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Literal text, matched exactly (command patterns use `NAME:ARGGLOB`
    /// and literal segments may still contain `*` mid-token for arg globs).
    Literal(String),
    /// `*` — matches exactly one path segment / command argument.
    Single,
    /// `**` — matches any remaining suffix, must be last.
    Suffix,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        if pattern.is_empty() {
            return Err("empty pattern".to_string());
        }
        let parts: Vec<&str> = pattern.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let seg = match *part {
                "**" => {
                    if i != parts.len() - 1 {
                        return Err("`**` must be the final segment".to_string());
                    }
                    Segment::Suffix
                }
                "*" => Segment::Single,
                other => Segment::Literal(other.to_string()),
            };
            segments.push(seg);
        }
        Ok(Self { segments })
    }

    /// Match against a `/`-delimited value — a command's "name + space-joined
    /// args" string, or a filesystem path. URL targets go through
    /// `matches_url` instead, since a scheme-qualified URL string can't be
    /// segmented by a naive `split('/')` (the `//` after the scheme produces
    /// a spurious empty segment).
    pub fn matches(&self, value: &str) -> bool {
        let value_segments: Vec<&str> = value.split('/').collect();
        self.matches_segments(&value_segments)
    }

    /// Match against a URL target. Parses `value` with `url::Url` and
    /// matches on host-then-path-segments, so the pattern's leading literal
    /// lines up with the host regardless of the request's scheme (§4.3
    /// "Bare hostnames in URL targets imply HTTPS").
    pub fn matches_url(&self, value: &str) -> bool {
        let parsed = match url::Url::parse(value) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let host = match parsed.host_str() {
            Some(h) => h,
            None => return false,
        };
        let mut value_segments = vec![host];
        let path = parsed.path().trim_matches('/');
        if !path.is_empty() {
            value_segments.extend(path.split('/'));
        }
        self.matches_segments(&value_segments)
    }

    fn matches_segments(&self, value: &[&str]) -> bool {
        let mut vi = 0;
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Suffix => return true,
                Segment::Single => {
                    if vi >= value.len() {
                        return false;
                    }
                    vi += 1;
                }
                Segment::Literal(lit) => {
                    if vi >= value.len() || !glob_literal_matches(lit, value[vi]) {
                        return false;
                    }
                    vi += 1;
                }
            }
            let _ = i;
        }
        vi == value.len()
    }
}

/// A literal segment may itself contain a `*` wildcard (used by command
/// patterns' `ARGGLOB`, e.g. `git:push*`).
fn glob_literal_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    if !value.starts_with(first) {
        return false;
    }
    let mut rest = &value[first.len()..];
    let mut parts: Vec<&str> = parts.collect();
    let last = parts.pop();
    for mid in &parts {
        if mid.is_empty() {
            continue;
        }
        if let Some(idx) = rest.find(mid) {
            rest = &rest[idx + mid.len()..];
        } else {
            return false;
        }
    }
    match last {
        Some(last) => rest.ends_with(last),
        None => true,
    }
}

/// Parses a command target string of the form `NAME:ARGGLOB` (a bare `NAME`
/// matches any argv) as described in §4.3.
pub fn split_command_pattern(pattern: &str) -> (&str, Option<&str>) {
    match pattern.split_once(':') {
        Some((name, argglob)) => (name, Some(argglob)),
        None => (pattern, None),
    }
}

/// Bare hostnames in URL targets imply HTTPS; `http://` is denied unless
/// explicitly allowed (§4.3). Returns the effective target string the engine
/// matches patterns against for a URL request.
pub fn url_target_string(url: &str) -> String {
    if !url.contains("://") {
        format!("https://{}", url)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_matches_one_segment() {
        let p = CompiledPattern::compile("example.com/*").unwrap();
        assert!(p.matches("example.com/foo"));
        assert!(!p.matches("example.com/foo/bar"));
    }

    #[test]
    fn double_star_matches_suffix() {
        let p = CompiledPattern::compile("example.com/**").unwrap();
        assert!(p.matches("example.com/foo/bar/baz"));
        assert!(p.matches("example.com"));
    }

    #[test]
    fn bare_hostname_matches_exactly() {
        let p = CompiledPattern::compile("example.com").unwrap();
        assert!(p.matches("example.com"));
        assert!(!p.matches("example.com/foo"));
    }

    #[test]
    fn matches_url_lines_up_host_against_scheme_qualified_target() {
        let p = CompiledPattern::compile("example.com").unwrap();
        assert!(p.matches_url("https://example.com"));
        assert!(p.matches_url(&url_target_string("example.com")));
        assert!(!p.matches_url("https://example.com/foo"));
    }

    #[test]
    fn matches_url_suffix_pattern_covers_any_path() {
        let p = CompiledPattern::compile("example.com/**").unwrap();
        assert!(p.matches_url("https://example.com"));
        assert!(p.matches_url("https://example.com/path"));
        assert!(p.matches_url("https://example.com/a/b/c"));
        assert!(!p.matches_url("https://other.example"));
    }

    #[test]
    fn matches_url_rejects_unparsable_value() {
        let p = CompiledPattern::compile("example.com/**").unwrap();
        assert!(!p.matches_url("not a url"));
    }

    #[test]
    fn literal_mid_wildcard_for_arg_glob() {
        let (name, argglob) = split_command_pattern("git:push*");
        assert_eq!(name, "git");
        assert_eq!(argglob, Some("push*"));
        assert!(glob_literal_matches("push*", "push origin main"));
        assert!(!glob_literal_matches("push*", "pull origin main"));
    }

    #[test]
    fn bare_command_name_has_no_argglob() {
        let (name, argglob) = split_command_pattern("echo");
        assert_eq!(name, "echo");
        assert_eq!(argglob, None);
    }

    #[test]
    fn double_star_must_be_last() {
        assert!(CompiledPattern::compile("**/foo").is_err());
    }

    #[test]
    fn url_target_string_adds_https_for_bare_hostnames() {
        assert_eq!(url_target_string("example.com"), "https://example.com");
        assert_eq!(url_target_string("http://example.com"), "http://example.com");
        assert_eq!(url_target_string("https://example.com"), "https://example.com");
    }

    #[test]
    fn policy_validate_rejects_empty_patterns() {
        let policy = Policy {
            id: "p1".into(),
            name: "test".into(),
            action: PolicyAction::Allow,
            target: TargetType::Url,
            patterns: vec![],
            enabled: true,
            priority: 0,
            scope_restriction: None,
            scope_level: ScopeLevel::Base,
            fs_ops: None,
            egress_mode: None,
            workspace_override: None,
            env_allowlist: None,
        };
        assert!(matches!(policy.validate(), Err(PolicyError::EmptyPatternList)));
    }
}
