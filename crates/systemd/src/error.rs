// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Failures from the supervision stack.
///
/// `UnitFailed` and `Cancelled` carry the drained PTY output flattened to a
/// single line, so callers can surface what the FUSE process actually said.
#[derive(Debug, Error)]
pub enum SystemdError {
    #[error("failed to connect to systemd: {0}")]
    Connect(#[source] zbus::Error),

    #[error("systemd call failed: {0}")]
    Call(#[from] zbus::Error),

    #[error("pty allocation failed: {0}")]
    Pty(#[from] std::io::Error),

    #[error("unit {unit} failed to start ({detail}): {output}")]
    UnitFailed { unit: String, detail: String, output: String },

    #[error("cancelled while waiting for unit {unit}: {output}")]
    Cancelled { unit: String, output: String },
}
