// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandbox profile descriptor (§3 "Sandbox profile descriptor", §4.4).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::policy::EgressMode;

/// Deterministic inputs to `profile_for` — canonicalised before hashing so
/// that equivalent inputs produce a byte-identical cached profile (§4.4
/// invariant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxProfileInputs {
    pub workspace_root: PathBuf,
    pub socket_path: PathBuf,
    pub egress_mode: EgressMode,
    pub proxy_address: Option<String>,
    pub read_allow: Vec<PathBuf>,
    pub write_allow: Vec<PathBuf>,
    pub extra_deny: Vec<PathBuf>,
}

impl SandboxProfileInputs {
    /// Canonical form used both for hashing (fingerprint stability) and for
    /// serializing into the profile body: sorted, de-duplicated path lists
    /// and lexically normalised (not filesystem-resolved — a workspace that
    /// does not yet exist must still hash stably).
    pub fn canonicalised(&self) -> Self {
        let mut read_allow = self.read_allow.clone();
        let mut write_allow = self.write_allow.clone();
        let mut extra_deny = self.extra_deny.clone();
        for list in [&mut read_allow, &mut write_allow, &mut extra_deny] {
            for p in list.iter_mut() {
                *p = lexical_normalize(p);
            }
            list.sort();
            list.dedup();
        }
        Self {
            workspace_root: lexical_normalize(&self.workspace_root),
            socket_path: lexical_normalize(&self.socket_path),
            egress_mode: self.egress_mode,
            proxy_address: self.proxy_address.clone(),
            read_allow,
            write_allow,
            extra_deny,
        }
    }
}

fn lexical_normalize(path: &std::path::Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalised_sorts_and_dedups_allow_lists() {
        let inputs = SandboxProfileInputs {
            workspace_root: PathBuf::from("/ws"),
            socket_path: PathBuf::from("/var/run/agenshield/agenshield.sock"),
            egress_mode: EgressMode::None,
            proxy_address: None,
            read_allow: vec![PathBuf::from("/ws/b"), PathBuf::from("/ws/a"), PathBuf::from("/ws/a")],
            write_allow: vec![],
            extra_deny: vec![],
        };
        let canon = inputs.canonicalised();
        assert_eq!(canon.read_allow, vec![PathBuf::from("/ws/a"), PathBuf::from("/ws/b")]);
    }

    #[test]
    fn lexical_normalize_collapses_parent_dir() {
        assert_eq!(
            lexical_normalize(std::path::Path::new("/ws/sub/../file")),
            PathBuf::from("/ws/file")
        );
    }

    #[test]
    fn equal_inputs_canonicalise_identically() {
        let a = SandboxProfileInputs {
            workspace_root: PathBuf::from("/ws/./"),
            socket_path: PathBuf::from("/var/run/agenshield/agenshield.sock"),
            egress_mode: EgressMode::Proxy,
            proxy_address: Some("127.0.0.1:8080".into()),
            read_allow: vec![PathBuf::from("/ws/a")],
            write_allow: vec![],
            extra_deny: vec![],
        };
        let b = SandboxProfileInputs {
            workspace_root: PathBuf::from("/ws/x/../"),
            ..a.clone()
        };
        assert_eq!(a.canonicalised(), b.canonicalised());
    }
}
