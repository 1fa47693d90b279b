// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Thin JSON-RPC client for processes that launch an agent under the
//! AgenShield broker and need to issue requests through it (SPEC_FULL.md §5
//! "Wrapper responsibilities"). Talks to the broker's local socket, never
//! the HTTP fallback — the socket is the only channel with the full method
//! surface and the only one `secret_inject` is reachable over.

pub mod rpc_client;

pub use rpc_client::{BrokerClient, ClientError};
