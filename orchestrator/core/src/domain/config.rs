// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Broker configuration (§6 "Configuration file").
//!
//! Loaded as JSON; every field has a documented default so a missing file or
//! a missing field falls back to it, mirroring the teacher's
//! `NodeConfigManifest::load_or_default` convention (SPEC_FULL.md §10).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/agenshield/agenshield.sock")
}
fn default_http_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    5201
}
fn default_control_host() -> String {
    "127.0.0.1".to_string()
}
fn default_control_port() -> u16 {
    5200
}
fn default_policies_path() -> PathBuf {
    PathBuf::from("/opt/agenshield/data/shield.db")
}
fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/opt/agenshield/data/activity.db")
}
fn default_action() -> String {
    "deny".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_reload_cooldown_ms() -> u64 {
    60_000
}
fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_output_bytes() -> u64 {
    4 * 1024 * 1024
}
fn default_follow_redirects() -> u32 {
    5
}
fn default_sandbox_launcher_path() -> PathBuf {
    PathBuf::from("/usr/bin/sandbox-exec")
}
fn default_sandbox_profile_dir() -> PathBuf {
    PathBuf::from("/tmp/agenshield-profiles")
}
fn default_exec_path_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/bin"),
    ]
}
fn default_retention_count() -> u64 {
    1_000_000
}
fn default_retention_days() -> u64 {
    90
}
fn default_scrypt_n() -> u32 {
    16384
}
fn default_scrypt_r() -> u32 {
    8
}
fn default_scrypt_p() -> u32 {
    1
}
fn default_pbkdf2_iters() -> u32 {
    100_000
}
fn default_max_connections() -> u32 {
    256
}
fn default_audit_flush_interval_ms() -> u64 {
    100
}
fn default_audit_batch_size() -> u32 {
    256
}
fn default_cpu_slice_ms() -> u64 {
    500
}

/// Fields enumerated in §6 plus a small set of implementation-level knobs
/// (audit batching, max connections) that §4.10/§5 name as configurable but
/// §6 does not spell out a JSON key for — given the same documented-default
/// treatment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_control_host")]
    pub control_host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_policies_path")]
    pub policies_path: PathBuf,
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
    #[serde(default = "default_action")]
    pub default_action: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reload_cooldown_ms")]
    pub reload_cooldown_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: u32,
    #[serde(default = "default_sandbox_launcher_path")]
    pub sandbox_launcher_path: PathBuf,
    #[serde(default = "default_sandbox_profile_dir")]
    pub sandbox_profile_dir: PathBuf,
    /// Directories `exec` resolves command names against, independent of the
    /// broker process's own `PATH` (SPEC_FULL.md §4.5).
    #[serde(default = "default_exec_path_dirs")]
    pub exec_path_dirs: Vec<PathBuf>,
    #[serde(default = "default_retention_count")]
    pub retention_count: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_scrypt_n")]
    pub scrypt_n: u32,
    #[serde(default = "default_scrypt_r")]
    pub scrypt_r: u32,
    #[serde(default = "default_scrypt_p")]
    pub scrypt_p: u32,
    #[serde(default = "default_pbkdf2_iters")]
    pub pbkdf2_iters: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_audit_flush_interval_ms")]
    pub audit_flush_interval_ms: u64,
    #[serde(default = "default_audit_batch_size")]
    pub audit_batch_size: u32,
    #[serde(default = "default_cpu_slice_ms")]
    pub cpu_slice_ms: u64,
    /// Allows anonymous read-only control-API access when `true` (§4.11).
    #[serde(default)]
    pub anonymous_read_only: bool,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            http_host: default_http_host(),
            http_port: default_http_port(),
            control_host: default_control_host(),
            control_port: default_control_port(),
            policies_path: default_policies_path(),
            audit_log_path: default_audit_log_path(),
            default_action: default_action(),
            request_timeout_ms: default_request_timeout_ms(),
            reload_cooldown_ms: default_reload_cooldown_ms(),
            max_body_bytes: default_max_body_bytes(),
            max_output_bytes: default_max_output_bytes(),
            follow_redirects: default_follow_redirects(),
            sandbox_launcher_path: default_sandbox_launcher_path(),
            sandbox_profile_dir: default_sandbox_profile_dir(),
            exec_path_dirs: default_exec_path_dirs(),
            retention_count: default_retention_count(),
            retention_days: default_retention_days(),
            scrypt_n: default_scrypt_n(),
            scrypt_r: default_scrypt_r(),
            scrypt_p: default_scrypt_p(),
            pbkdf2_iters: default_pbkdf2_iters(),
            max_connections: default_max_connections(),
            audit_flush_interval_ms: default_audit_flush_interval_ms(),
            audit_batch_size: default_audit_batch_size(),
            cpu_slice_ms: default_cpu_slice_ms(),
            anonymous_read_only: false,
        }
    }
}

impl ShieldConfig {
    /// Load from the given path, or the default location
    /// (`/opt/agenshield/config/shield.json`, §6) if `None`. Missing file is
    /// not an error — the all-default configuration is returned — but a
    /// present-and-unparsable file is (exit code 1, §6 "Exit codes").
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/opt/agenshield/config/shield.json"));

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let config: ShieldConfig = serde_json::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("invalid configuration at {:?}: {}", path, e))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!("failed to read configuration at {:?}: {}", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let config = ShieldConfig::default();
        assert_eq!(config.http_port, 5201);
        assert_eq!(config.control_port, 5200);
        assert_eq!(config.default_action, "deny");
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.scrypt_n, 16384);
        assert_eq!(config.pbkdf2_iters, 100_000);
    }

    #[test]
    fn missing_fields_take_documented_defaults() {
        let partial = r#"{"httpPort": 9999}"#;
        let parsed: ShieldConfig = serde_json::from_str(partial).unwrap();
        assert_eq!(parsed.http_port, 9999);
        assert_eq!(parsed.control_port, default_control_port());
        assert_eq!(parsed.scrypt_n, default_scrypt_n());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ShieldConfig::load_or_default(Some(Path::new("/nonexistent/shield.json"))).unwrap();
        assert_eq!(config.http_port, default_http_port());
    }
}
