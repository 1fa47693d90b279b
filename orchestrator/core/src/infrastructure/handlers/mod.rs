// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Typed per-method handler implementations (§4.5–4.7).

pub mod exec;
pub mod file_ops;
pub mod http_request;
pub mod open_url;
pub mod secret_inject;
