// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control API surface: the `axum` router the operator UI talks to (§4.11).

pub mod control_api;
