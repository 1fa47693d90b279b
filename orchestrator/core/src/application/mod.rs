// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application services: the policy engine, sandbox profile manager, secret
//! vault, audit log, session manager, and the request dispatcher that ties
//! them together for both RPC front ends.

pub mod audit_log;
pub mod dispatch;
pub mod policy_engine;
pub mod sandbox_profile_manager;
pub mod session_manager;
pub mod vault;
