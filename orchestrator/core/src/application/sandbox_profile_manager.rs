// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandbox profile generation and fingerprint caching (§3 "Sandbox profile
//! descriptor", §4.4).

use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::domain::policy::EgressMode;
use crate::domain::sandbox::SandboxProfileInputs;

#[derive(Debug, thiserror::Error)]
pub enum SandboxProfileError {
    #[error("failed to write profile to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Generates the deny-default sandbox profile text for a set of canonical
/// inputs and caches it on disk by fingerprint, so repeated requests for the
/// same effective sandbox reuse the same file (§4.4 invariant: "generating a
/// profile for the same canonical inputs twice produces byte-identical
/// output").
pub struct SandboxProfileManager {
    profile_dir: PathBuf,
}

impl SandboxProfileManager {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
        }
    }

    /// Returns the path to a cached (or freshly written) profile file for the
    /// given inputs. Resolves existing workspace/allow-list paths with
    /// `std::fs::canonicalize`, falling back to lexical normalisation for
    /// paths that do not yet exist, before fingerprinting.
    pub fn profile_for(&self, inputs: &SandboxProfileInputs) -> Result<PathBuf, SandboxProfileError> {
        let resolved = resolve_existing(inputs);
        let canonical = resolved.canonicalised();
        let fingerprint = fingerprint(&canonical);
        let path = self.profile_dir.join(format!("{fingerprint}.sb"));

        if path.exists() {
            return Ok(path);
        }

        let body = render_profile(&canonical);
        std::fs::create_dir_all(&self.profile_dir).map_err(|e| SandboxProfileError::Write {
            path: self.profile_dir.clone(),
            source: e,
        })?;
        // Write to a temp file then rename, so a concurrent reader never
        // observes a partially-written profile under the final fingerprint
        // path (two dispatcher tasks can race to generate the same profile).
        let tmp_path = self.profile_dir.join(format!("{fingerprint}.sb.tmp-{}", std::process::id()));
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(|e| SandboxProfileError::Write {
                path: tmp_path.clone(),
                source: e,
            })?;
            file.write_all(body.as_bytes())
                .map_err(|e| SandboxProfileError::Write {
                    path: tmp_path.clone(),
                    source: e,
                })?;
        }
        std::fs::rename(&tmp_path, &path).map_err(|e| SandboxProfileError::Write {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}

fn resolve_existing(inputs: &SandboxProfileInputs) -> SandboxProfileInputs {
    let resolve = |p: &Path| -> PathBuf { std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()) };
    SandboxProfileInputs {
        workspace_root: resolve(&inputs.workspace_root),
        socket_path: resolve(&inputs.socket_path),
        egress_mode: inputs.egress_mode,
        proxy_address: inputs.proxy_address.clone(),
        read_allow: inputs.read_allow.iter().map(|p| resolve(p)).collect(),
        write_allow: inputs.write_allow.iter().map(|p| resolve(p)).collect(),
        extra_deny: inputs.extra_deny.iter().map(|p| resolve(p)).collect(),
    }
}

/// SHA-256 over a deterministic, explicitly field-ordered serialization of
/// the already-canonicalised inputs, hex-encoded — stable across process
/// restarts and across hosts given the same logical inputs (§4.4).
fn fingerprint(inputs: &SandboxProfileInputs) -> String {
    let mut hasher = Sha256::new();
    hasher.update(inputs.workspace_root.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(inputs.socket_path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(egress_tag(inputs.egress_mode).as_bytes());
    hasher.update(b"\0");
    hasher.update(inputs.proxy_address.as_deref().unwrap_or("").as_bytes());
    for list in [&inputs.read_allow, &inputs.write_allow, &inputs.extra_deny] {
        hasher.update(b"\0\0");
        for p in list {
            hasher.update(p.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        }
    }
    hex::encode(hasher.finalize())
}

fn egress_tag(mode: EgressMode) -> &'static str {
    match mode {
        EgressMode::Direct => "direct",
        EgressMode::Proxy => "proxy",
        EgressMode::None => "none",
    }
}

/// Renders the project's declarative deny-default profile syntax (§4.4):
/// `(allow file-read* "<path>")`, `(allow file-write* "<path>")`,
/// `(allow network-outbound "<addr>")`, terminated with `(deny default)`.
fn render_profile(inputs: &SandboxProfileInputs) -> String {
    let mut out = String::new();
    out.push_str("(version 1)\n");
    out.push_str(&format!("; workspace={}\n", inputs.workspace_root.display()));
    for path in &inputs.read_allow {
        out.push_str(&format!("(allow file-read* \"{}\")\n", path.display()));
    }
    out.push_str(&format!(
        "(allow file-read* \"{}\")\n",
        inputs.workspace_root.display()
    ));
    for path in &inputs.write_allow {
        out.push_str(&format!("(allow file-write* \"{}\")\n", path.display()));
    }
    for path in &inputs.extra_deny {
        out.push_str(&format!("(deny file* \"{}\")\n", path.display()));
    }
    match inputs.egress_mode {
        EgressMode::Direct => out.push_str("(allow network-outbound)\n"),
        EgressMode::Proxy => {
            if let Some(addr) = &inputs.proxy_address {
                out.push_str(&format!("(allow network-outbound \"{addr}\")\n"));
            }
        }
        EgressMode::None => {}
    }
    out.push_str(&format!(
        "(allow file-read* \"{}\")\n",
        inputs.socket_path.display()
    ));
    out.push_str("(deny default)\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_inputs(workspace: &Path) -> SandboxProfileInputs {
        SandboxProfileInputs {
            workspace_root: workspace.to_path_buf(),
            socket_path: PathBuf::from("/var/run/agenshield/agenshield.sock"),
            egress_mode: EgressMode::None,
            proxy_address: None,
            read_allow: vec![],
            write_allow: vec![],
            extra_deny: vec![],
        }
    }

    #[test]
    fn same_inputs_produce_same_cached_path() {
        let dir = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        let manager = SandboxProfileManager::new(dir.path());
        let inputs = sample_inputs(workspace.path());
        let first = manager.profile_for(&inputs).unwrap();
        let second = manager.profile_for(&inputs).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn profile_contains_deny_default_terminator() {
        let dir = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        let manager = SandboxProfileManager::new(dir.path());
        let inputs = sample_inputs(workspace.path());
        let path = manager.profile_for(&inputs).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.trim_end().ends_with("(deny default)"));
    }

    #[test]
    fn lexically_equivalent_but_unresolved_paths_hash_identically() {
        let a = SandboxProfileInputs {
            workspace_root: PathBuf::from("/nonexistent/ws/./"),
            socket_path: PathBuf::from("/var/run/agenshield/agenshield.sock"),
            egress_mode: EgressMode::None,
            proxy_address: None,
            read_allow: vec![],
            write_allow: vec![],
            extra_deny: vec![],
        };
        let b = SandboxProfileInputs {
            workspace_root: PathBuf::from("/nonexistent/ws/sub/../"),
            ..a.clone()
        };
        assert_eq!(fingerprint(&resolve_existing(&a).canonicalised()), fingerprint(&resolve_existing(&b).canonicalised()));
    }
}
