// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Engine — evaluation and hot reload (§4.3, §4.9)
//!
//! Holds the active rule set behind a short-lived read lock so evaluation
//! only ever blocks for the duration of a pointer swap, never a reload in
//! progress. A background task polls the repository's revision counter on
//! `reload_cooldown_ms` and installs a freshly compiled snapshot when it
//! changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::handler::SandboxHints;
use crate::domain::policy::{split_command_pattern, url_target_string, CompiledPattern, Policy, PolicyAction, TargetType};
use crate::domain::repository::{PolicyRepository, RepositoryError};
use crate::domain::scope::ScopeTriple;

/// The engine's verdict for one request (§4.3 "Decision").
#[derive(Debug, Clone)]
pub enum Decision {
    Allow {
        policy_id: String,
        hints: SandboxHints,
    },
    Deny {
        policy_id: Option<String>,
    },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn matched_policy_id(&self) -> Option<&str> {
        match self {
            Decision::Allow { policy_id, .. } => Some(policy_id),
            Decision::Deny { policy_id } => policy_id.as_deref(),
        }
    }
}

struct CompiledRule {
    policy: Policy,
    command_name: Option<String>,
    patterns: Vec<CompiledPattern>,
}

/// An immutable, pre-sorted view of the rule set for one scope key.
struct Snapshot {
    rules: Vec<Arc<CompiledRule>>,
    revision: i64,
}

/// Default-deny evaluator over the priority-ordered, scope-unioned rule set
/// (§3 "Policy", §4.3).
pub struct PolicyEngine<R: PolicyRepository> {
    repository: Arc<R>,
    snapshots: RwLock<HashMap<ScopeKey, Arc<Snapshot>>>,
    reload_cooldown: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey(Option<String>, Option<String>);

impl From<&ScopeTriple> for ScopeKey {
    fn from(scope: &ScopeTriple) -> Self {
        ScopeKey(scope.target.clone(), scope.user.clone())
    }
}

impl<R: PolicyRepository + 'static> PolicyEngine<R> {
    pub fn new(repository: Arc<R>, reload_cooldown: Duration) -> Self {
        Self {
            repository,
            snapshots: RwLock::new(HashMap::new()),
            reload_cooldown,
        }
    }

    /// Spawns the background reload-poll task (SPEC_FULL.md §4.3). The
    /// returned handle is owned by the daemon's shutdown supervisor.
    pub fn spawn_reload_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_revision: Option<i64> = None;
            let mut ticker = tokio::time::interval(engine.reload_cooldown);
            loop {
                ticker.tick().await;
                match engine.repository.revision().await {
                    Ok(revision) if Some(revision) != last_revision => {
                        if let Err(e) = engine.reload(ScopeTriple::base()).await {
                            warn!(error = %e, "policy reload failed, keeping previous snapshot");
                            continue;
                        }
                        info!(revision, "policy snapshot reloaded");
                        last_revision = Some(revision);
                    }
                    Ok(_) => debug!("policy revision unchanged, skipping reload"),
                    Err(e) => warn!(error = %e, "failed to read policy revision"),
                }
            }
        })
    }

    /// (Re)compile and install the snapshot for one scope key. Called eagerly
    /// for a scope the first time `evaluate` sees it, and periodically by the
    /// background task for the base scope.
    pub async fn reload(&self, scope: ScopeTriple) -> Result<(), RepositoryError> {
        let policies = self.repository.list_for_scope(&scope).await?;
        let revision = self.repository.revision().await?;
        let mut rules: Vec<Arc<CompiledRule>> = Vec::with_capacity(policies.len());
        for policy in policies {
            if !policy.enabled {
                continue;
            }
            let command_name = if policy.target == TargetType::Command {
                policy
                    .patterns
                    .first()
                    .map(|p| split_command_pattern(p).0.to_string())
            } else {
                None
            };
            let mut patterns = Vec::with_capacity(policy.patterns.len());
            for raw in &policy.patterns {
                let compiled = if policy.target == TargetType::Command {
                    let (_, argglob) = split_command_pattern(raw);
                    CompiledPattern::compile(argglob.unwrap_or("**"))
                } else {
                    CompiledPattern::compile(raw)
                };
                match compiled {
                    Ok(c) => patterns.push(c),
                    Err(e) => {
                        warn!(policy_id = %policy.id, error = %e, "skipping policy with invalid pattern");
                        continue;
                    }
                }
            }
            rules.push(Arc::new(CompiledRule {
                policy,
                command_name,
                patterns,
            }));
        }
        // Highest priority first; ties broken by stable identifier ordering
        // so evaluation order is deterministic regardless of the repository's
        // row order (§3/§4.3).
        rules.sort_by(|a, b| {
            b.policy
                .priority
                .cmp(&a.policy.priority)
                .then_with(|| a.policy.id.cmp(&b.policy.id))
        });

        let key = ScopeKey::from(&scope);
        self.snapshots
            .write()
            .insert(key, Arc::new(Snapshot { rules, revision }));
        Ok(())
    }

    /// Evaluate one request. `target` is the already-normalised match string
    /// (a URL with scheme, a canonical filesystem path, or a command name);
    /// for filesystem requests pass `fs_op` so rules can filter by it.
    pub async fn evaluate(
        &self,
        target_type: TargetType,
        target: &str,
        scope: &ScopeTriple,
        fs_op: Option<crate::domain::policy::FsOp>,
    ) -> Result<Decision, RepositoryError> {
        let key = ScopeKey::from(scope);
        let missing = self.snapshots.read().get(&key).is_none();
        if missing {
            self.reload(scope.clone()).await?;
        }
        let snapshot = match self.snapshots.read().get(&key) {
            Some(s) => Arc::clone(s),
            None => return Ok(Decision::Deny { policy_id: None }),
        };

        let match_target = if target_type == TargetType::Url {
            url_target_string(target)
        } else {
            target.to_string()
        };

        for rule in &snapshot.rules {
            if rule.policy.target != target_type {
                continue;
            }
            if let Some(fs_op) = fs_op {
                if let Some(allowed_ops) = &rule.policy.fs_ops {
                    if !allowed_ops.contains(&fs_op) {
                        continue;
                    }
                }
            }
            if target_type == TargetType::Command {
                if let Some(name) = &rule.command_name {
                    let (candidate_name, _) = split_command_pattern(&match_target);
                    if candidate_name != name {
                        continue;
                    }
                }
            }
            let matched = if target_type == TargetType::Url {
                rule.patterns.iter().any(|p| p.matches_url(&match_target))
            } else {
                rule.patterns.iter().any(|p| p.matches(&match_target))
            };
            if !matched {
                continue;
            }
            return Ok(match rule.policy.action {
                PolicyAction::Allow => Decision::Allow {
                    policy_id: rule.policy.id.clone(),
                    hints: SandboxHints {
                        egress_mode: rule.policy.egress_mode,
                        fs_ops: rule.policy.fs_ops.clone(),
                        read_allow: Vec::new(),
                        write_allow: Vec::new(),
                        workspace_override: rule.policy.workspace_override.clone().map(Into::into),
                        env_allowlist: rule.policy.env_allowlist.clone(),
                    },
                },
                // An unresolved approval-pending rule never grants access;
                // it is surfaced to the operator but evaluates as deny here.
                PolicyAction::Deny | PolicyAction::ApprovalPending => Decision::Deny {
                    policy_id: Some(rule.policy.id.clone()),
                },
            });
        }

        Ok(Decision::Deny { policy_id: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeRepo {
        policies: Mutex<Vec<Policy>>,
        revision: Mutex<i64>,
    }

    #[async_trait]
    impl PolicyRepository for FakeRepo {
        async fn list_for_scope(&self, _scope: &ScopeTriple) -> Result<Vec<Policy>, RepositoryError> {
            Ok(self.policies.lock().unwrap().clone())
        }
        async fn upsert(&self, policy: Policy) -> Result<(), RepositoryError> {
            self.policies.lock().unwrap().push(policy);
            *self.revision.lock().unwrap() += 1;
            Ok(())
        }
        async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
            self.policies.lock().unwrap().retain(|p| p.id != id);
            Ok(())
        }
        async fn revision(&self) -> Result<i64, RepositoryError> {
            Ok(*self.revision.lock().unwrap())
        }
    }

    fn url_policy(id: &str, action: PolicyAction, pattern: &str, priority: i64) -> Policy {
        Policy {
            id: id.into(),
            name: id.into(),
            action,
            target: TargetType::Url,
            patterns: vec![pattern.into()],
            enabled: true,
            priority,
            scope_restriction: None,
            scope_level: crate::domain::scope::ScopeLevel::Base,
            fs_ops: None,
            egress_mode: None,
            workspace_override: None,
            env_allowlist: None,
        }
    }

    #[tokio::test]
    async fn default_deny_when_no_rule_matches() {
        let repo = Arc::new(FakeRepo {
            policies: Mutex::new(vec![]),
            revision: Mutex::new(0),
        });
        let engine = PolicyEngine::new(repo, Duration::from_secs(60));
        let decision = engine
            .evaluate(TargetType::Url, "example.com", &ScopeTriple::base(), None)
            .await
            .unwrap();
        assert!(!decision.is_allow());
    }

    #[tokio::test]
    async fn higher_priority_rule_wins() {
        let repo = Arc::new(FakeRepo {
            policies: Mutex::new(vec![
                url_policy("deny-all", PolicyAction::Deny, "**", 0),
                url_policy("allow-example", PolicyAction::Allow, "example.com/**", 10),
            ]),
            revision: Mutex::new(1),
        });
        let engine = PolicyEngine::new(repo, Duration::from_secs(60));
        let decision = engine
            .evaluate(TargetType::Url, "example.com/path", &ScopeTriple::base(), None)
            .await
            .unwrap();
        match decision {
            Decision::Allow { policy_id, .. } => assert_eq!(policy_id, "allow-example"),
            Decision::Deny { .. } => panic!("expected allow"),
        }
    }

    #[tokio::test]
    async fn equal_priority_ties_break_on_policy_id() {
        let repo = Arc::new(FakeRepo {
            policies: Mutex::new(vec![
                url_policy("z-deny", PolicyAction::Deny, "example.com/**", 10),
                url_policy("a-allow", PolicyAction::Allow, "example.com/**", 10),
            ]),
            revision: Mutex::new(1),
        });
        let engine = PolicyEngine::new(repo, Duration::from_secs(60));
        let decision = engine
            .evaluate(TargetType::Url, "example.com/path", &ScopeTriple::base(), None)
            .await
            .unwrap();
        match decision {
            Decision::Allow { policy_id, .. } => assert_eq!(policy_id, "a-allow"),
            Decision::Deny { .. } => panic!("expected the lexicographically first id to win the tie"),
        }
    }

    #[tokio::test]
    async fn fs_op_filters_allow_rule() {
        let mut write_only = HashSet::new();
        write_only.insert(crate::domain::policy::FsOp::Write);
        let policy = Policy {
            fs_ops: Some(write_only),
            target: TargetType::Filesystem,
            ..url_policy("write-only", PolicyAction::Allow, "/workspace/**", 5)
        };
        let repo = Arc::new(FakeRepo {
            policies: Mutex::new(vec![policy]),
            revision: Mutex::new(1),
        });
        let engine = PolicyEngine::new(repo, Duration::from_secs(60));
        let read_decision = engine
            .evaluate(
                TargetType::Filesystem,
                "/workspace/file.txt",
                &ScopeTriple::base(),
                Some(crate::domain::policy::FsOp::Read),
            )
            .await
            .unwrap();
        assert!(!read_decision.is_allow());

        let write_decision = engine
            .evaluate(
                TargetType::Filesystem,
                "/workspace/file.txt",
                &ScopeTriple::base(),
                Some(crate::domain::policy::FsOp::Write),
            )
            .await
            .unwrap();
        assert!(write_decision.is_allow());
    }

    #[tokio::test]
    async fn reload_picks_up_new_revision() {
        let repo = Arc::new(FakeRepo {
            policies: Mutex::new(vec![]),
            revision: Mutex::new(0),
        });
        let engine = PolicyEngine::new(Arc::clone(&repo), Duration::from_secs(60));
        engine.reload(ScopeTriple::base()).await.unwrap();
        repo.upsert(url_policy("allow-all", PolicyAction::Allow, "**", 0))
            .await
            .unwrap();
        engine.reload(ScopeTriple::base()).await.unwrap();
        let decision = engine
            .evaluate(TargetType::Url, "anything.example", &ScopeTriple::base(), None)
            .await
            .unwrap();
        assert!(decision.is_allow());
    }
}
