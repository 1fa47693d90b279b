// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure: the SQLite-backed scoped store, crypto primitives, the
//! sandbox profile's on-disk side, and the typed per-method handlers.

pub mod audit_store;
pub mod crypto;
pub mod handlers;
pub mod store;
