// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon process lifecycle: background spawn, PID file management, HTTP
//! health checks, graceful and forced shutdown (SPEC_FULL.md §10, grounded
//! on the teacher's `cli/src/daemon/mod.rs`).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
#[cfg(unix)]
use tokio::time::sleep;
use tracing::info;
#[cfg(unix)]
use tracing::warn;

mod http_server;
mod socket_server;
pub mod server;

#[cfg(unix)]
const PID_FILE: &str = "/var/run/agenshield/agenshield.pid";
#[cfg(unix)]
const PID_FILE_FALLBACK: &str = "/tmp/agenshield.pid";

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: u32, uptime: Option<u64> },
    Stopped,
    Unhealthy { pid: u32, error: String },
}

/// Re-executes the current binary with no subcommand, detached from the
/// calling terminal, and returns once the child has been launched. We do
/// not fork() the running process: doing so inside a `#[tokio::main]`
/// runtime breaks the reactor, so the foreground-run path is always reached
/// through a fresh process exec rather than in-process daemonization.
pub async fn spawn_background(config_path: Option<PathBuf>) -> Result<()> {
    let exe = std::env::current_exe().context("failed to resolve current executable path")?;
    let mut command = std::process::Command::new(exe);
    if let Some(path) = &config_path {
        command.arg("--config").arg(path);
    }
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let child = command.spawn().context("failed to spawn background broker process")?;
    info!(pid = child.id(), "AgenShield broker started in the background");
    Ok(())
}

/// Checks whether the broker is running via the control API health endpoint
/// (primary signal, works whether we are local or talking to a forwarded
/// port) falling back to PID-file diagnosis when HTTP is unreachable.
pub async fn check_daemon_running(control_host: &str, control_port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let base_url = if control_host.starts_with("http://") || control_host.starts_with("https://") {
        format!("{}:{}", control_host, control_port)
    } else {
        format!("http://{}:{}", control_host, control_port)
    };
    let health_url = format!("{}/health", base_url);

    let pid_file = get_pid_file_path();
    let local_pid = std::fs::read_to_string(&pid_file)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let uptime = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["uptime_seconds"].as_u64());
            Ok(DaemonStatus::Running {
                pid: local_pid.unwrap_or(0),
                uptime,
            })
        }
        Ok(resp) => Ok(DaemonStatus::Unhealthy {
            pid: local_pid.unwrap_or(0),
            error: format!("HTTP {}", resp.status()),
        }),
        Err(e) => {
            if let Some(pid) = local_pid {
                if process_exists(pid) {
                    return Ok(DaemonStatus::Unhealthy { pid, error: e.to_string() });
                }
                let _ = std::fs::remove_file(&pid_file);
            }
            Ok(DaemonStatus::Stopped)
        }
    }
}

/// Sends SIGTERM, waits up to `timeout_secs` for exit, then SIGKILL if
/// `force` is set (`stop_daemon`, §10).
pub async fn stop_daemon(force: bool, timeout_secs: u64) -> Result<()> {
    let pid_file = get_pid_file_path();

    let pid = std::fs::read_to_string(&pid_file)
        .context("failed to read PID file — is the broker running?")?
        .trim()
        .parse::<u32>()
        .context("invalid PID file contents")?;

    info!(pid, "sending SIGTERM");

    #[cfg(unix)]
    {
        send_signal(pid, libc::SIGTERM)?;

        for _ in 0..timeout_secs {
            if !process_exists(pid) {
                info!("broker stopped gracefully");
                let _ = std::fs::remove_file(&pid_file);
                return Ok(());
            }
            sleep(Duration::from_secs(1)).await;
        }

        if force {
            warn!("graceful shutdown timed out, sending SIGKILL");
            send_signal(pid, libc::SIGKILL)?;
            sleep(Duration::from_secs(1)).await;
        } else {
            anyhow::bail!("broker did not stop within {timeout_secs}s (retry with --force)");
        }
    }

    #[cfg(windows)]
    {
        let output = std::process::Command::new("taskkill")
            .args(&["/PID", &pid.to_string(), "/F"])
            .output()
            .context("failed to execute taskkill")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("not found") {
                anyhow::bail!("failed to stop broker: {}", stderr);
            }
        }
        info!("broker stopped (killed via taskkill)");
    }

    let _ = std::fs::remove_file(&pid_file);
    Ok(())
}

fn get_pid_file_path() -> PathBuf {
    #[cfg(unix)]
    {
        let uid = unsafe { libc::geteuid() };
        if uid == 0 {
            PathBuf::from(PID_FILE)
        } else {
            PathBuf::from(PID_FILE_FALLBACK)
        }
    }

    #[cfg(windows)]
    {
        PathBuf::from("C:\\ProgramData\\agenshield\\agenshield.pid")
    }
}

fn process_exists(_pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(_pid as i32, 0) == 0 }
    }

    #[cfg(windows)]
    {
        true
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> Result<()> {
    unsafe {
        if libc::kill(pid as i32, signal) != 0 {
            anyhow::bail!("failed to send signal {} to process {}", signal, pid);
        }
    }
    Ok(())
}

/// Writes the PID file at process start; cleaned up by `PidFileGuard` on
/// shutdown.
pub fn write_pid_file(pid: u32) -> Result<()> {
    let pid_file = get_pid_file_path();
    if let Some(parent) = pid_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(&pid_file, pid.to_string())
        .with_context(|| format!("failed to write PID file: {:?}", pid_file))?;
    info!(path = ?pid_file, "wrote PID file");
    Ok(())
}

pub fn remove_pid_file() -> Result<()> {
    let pid_file = get_pid_file_path();
    if pid_file.exists() {
        std::fs::remove_file(&pid_file).with_context(|| format!("failed to remove PID file: {:?}", pid_file))?;
        info!(path = ?pid_file, "removed PID file");
    }
    Ok(())
}
