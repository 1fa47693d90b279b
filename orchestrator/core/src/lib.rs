// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # agenshield-core
//!
//! Domain model, policy engine, sandbox profile manager, secret vault, scoped
//! store, and the typed handler set shared by the AgenShield broker's two RPC
//! front ends.
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← axum Router for the control API (mounted by the daemon binary)
//!     ↓
//! application/    ← policy engine, sandbox profile manager, vault, audit log,
//!                   session manager, request dispatcher
//!     ↓
//! domain/         ← policies, secrets, scope, audit events, sessions, RPC types
//!     ↓
//! infrastructure/ ← SQLite-backed scoped store, crypto primitives, handlers
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
