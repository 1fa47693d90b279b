// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AgenShield broker
//!
//! `agenshield` is the security-broker daemon described in SPEC_FULL.md
//! §1-2: it accepts RPC on a local socket (primary, full surface) and a
//! loopback HTTP endpoint (fallback, reduced surface), mediates every
//! outbound network/filesystem/exec call an agent process makes on the
//! broker's own privileges, and exposes a control API for the operator
//! surface to manage configuration, policies and secrets.
//!
//! Run with no subcommand to start the broker in the foreground (the normal
//! way a process supervisor such as systemd invokes it). `start`/`stop`/
//! `status` manage a detached background instance for interactive use.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use agenshield_daemon::daemon;

/// AgenShield — host-resident security broker for untrusted agent processes.
#[derive(Parser)]
#[command(name = "agenshield")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (default: /opt/agenshield/config/shield.json, §6)
    #[arg(short, long, global = true, env = "AGENSHIELD_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AGENSHIELD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker as a detached background process
    Start,
    /// Stop a running background broker
    Stop {
        /// Send SIGKILL if the process has not exited within the timeout
        #[arg(long)]
        force: bool,
        /// Seconds to wait for graceful shutdown before giving up (or killing, with --force)
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },
    /// Report whether the broker is running
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Start) => daemon::spawn_background(cli.config).await,
        Some(Commands::Stop { force, timeout_secs }) => daemon::stop_daemon(force, timeout_secs).await,
        Some(Commands::Status) => {
            let config = agenshield_core::domain::config::ShieldConfig::load_or_default(cli.config.as_deref())?;
            match daemon::check_daemon_running(&config.control_host, config.control_port).await? {
                daemon::DaemonStatus::Running { pid, uptime } => {
                    let uptime = uptime.map(|s| format!(", uptime {}s", s)).unwrap_or_default();
                    println!("{} (pid {}{})", "running".green(), pid, uptime);
                }
                daemon::DaemonStatus::Unhealthy { pid, error } => {
                    println!("{} (pid {}): {}", "unhealthy".yellow(), pid, error);
                    std::process::exit(1);
                }
                daemon::DaemonStatus::Stopped => {
                    println!("{}", "stopped".red());
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        None => {
            info!("starting AgenShield broker in the foreground");
            daemon::server::start_daemon(cli.config).await
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
