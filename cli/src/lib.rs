// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! AgenShield daemon library — exposes the daemon lifecycle and composition
//! root as testable components, separate from the `agenshield` binary's
//! argument parsing.

pub mod daemon;
