// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! s3cd-systemd: transient-unit supervision over the systemd private socket.
//!
//! The FUSE process backing each mount runs as a transient systemd service
//! so it outlives this driver. Layering, bottom up:
//!
//! - [`pty`] allocates the pseudo-terminal a unit's stdout/stderr is wired
//!   into, so mount failures come back with the process's own words.
//! - [`dbus`] is the raw manager client on `/run/systemd/private`.
//! - [`supervisor`] owns one connection, fans lifecycle signals out to
//!   per-unit watchers, and runs units to readiness or completion.
//! - [`runner`] transparently replaces a supervisor whose connection died.

pub mod dbus;
mod error;
pub mod pty;
pub mod runner;
pub mod supervisor;

pub use dbus::{ListedUnit, SystemdDbus, DEFAULT_ADDRESS};
pub use error::SystemdError;
pub use runner::{SupervisorFactory, SystemdRunner, UnitRunner};
pub use supervisor::{
    transient_unit_name, ExecConfig, SupervisorConfig, SystemdSupervisor, UnitProperties, UnitType,
};
