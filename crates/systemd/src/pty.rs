// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pseudo-terminal allocation for supervised units.
//!
//! systemd wires a transient unit's stdout/stderr into a tty we name by
//! slave index; we keep the master end and read whatever the process
//! printed when deciding how a mount attempt went.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

pub const DEFAULT_PTMX_PATH: &str = "/dev/ptmx";

mod ioctl {
    nix::ioctl_write_ptr_bad!(tiocsptlck, libc::TIOCSPTLCK, libc::c_int);
    nix::ioctl_read_bad!(tiocgptn, libc::TIOCGPTN, libc::c_uint);
}

/// Open the master multiplexer at `ptmx_path` and allocate a slave.
///
/// Returns the master (read end) and the slave index `<n>` for
/// `/dev/pts/<n>`. The master is closed (dropped) before returning on any
/// ioctl failure. The caller owns the returned file and must close it
/// exactly once.
pub fn new_pts(ptmx_path: &Path) -> io::Result<(File, u32)> {
    let master = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
        .open(ptmx_path)?;
    let fd = master.as_raw_fd();

    // SAFETY: fd belongs to `master`, which stays open across the calls and
    // is dropped (closing fd) on every error return.
    let rc = unsafe { libc::grantpt(fd) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let unlock: libc::c_int = 0;
    unsafe { ioctl::tiocsptlck(fd, &unlock) }.map_err(io::Error::from)?;
    let mut pts: libc::c_uint = 0;
    unsafe { ioctl::tiocgptn(fd, &mut pts) }.map_err(io::Error::from)?;

    Ok((master, pts))
}

/// Read everything currently buffered on the master without blocking and
/// flatten it into a single-line status string.
pub fn drain(master: &File) -> String {
    let fd = master.as_raw_fd();
    // SAFETY: plain fcntl flag manipulation on an fd we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }

    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let mut reader = master;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // WouldBlock: buffer empty. EIO: slave side already gone.
            Err(_) => break,
        }
    }

    flatten(&String::from_utf8_lossy(&collected))
}

/// Collapse all whitespace runs (including newlines) to single spaces.
pub fn flatten(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
