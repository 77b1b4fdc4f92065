// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host mounts-file parsing.
//!
//! `/host/proc/mounts` can transiently fail with EINVAL while the kernel
//! rewrites it; reads retry a few times before giving up. A line counts as
//! one of our mounts only when its device column is the FUSE device
//! literal.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::MountError;

/// Device column value of a mount-s3 FUSE mount.
pub const FUSE_DEVICE: &str = "mount-s3";
/// The host's mounts file as bind-mounted into this container.
pub const DEFAULT_MOUNTS_PATH: &str = "/host/proc/mounts";

const EINVAL_RETRIES: u32 = 3;
const EINVAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub device: String,
    pub mount_point: String,
}

pub(crate) fn parse_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: mount_point.to_string(),
            })
        })
        .collect()
}

/// Whether `target` appears in the mounts file with our FUSE device.
pub(crate) async fn device_mounted_at(
    mounts_path: &Path,
    target: &Path,
) -> Result<bool, MountError> {
    let contents = read_with_retry(mounts_path).await?;
    let target = target.to_string_lossy();
    Ok(parse_mounts(&contents)
        .iter()
        .any(|entry| entry.device == FUSE_DEVICE && entry.mount_point == target))
}

async fn read_with_retry(path: &Path) -> Result<String, MountError> {
    let mut attempt = 0;
    loop {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => return Ok(contents),
            Err(err)
                if err.raw_os_error() == Some(libc::EINVAL) && attempt < EINVAL_RETRIES =>
            {
                attempt += 1;
                debug!(attempt, path = %path.display(), "transient EINVAL reading mounts file");
                tokio::time::sleep(EINVAL_BACKOFF).await;
            }
            Err(err) => {
                return Err(MountError::MountsFile { path: path.to_path_buf(), source: err })
            }
        }
    }
}

#[cfg(test)]
#[path = "mounts_tests.rs"]
mod tests;
