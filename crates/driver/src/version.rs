// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Driver version baked into the FUSE user-agent.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");
