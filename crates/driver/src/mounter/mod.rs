// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mount orchestration.
//!
//! [`Mounter`] is the seam the node handler drives; the default
//! implementation supervises one `mount-s3` transient unit per mount
//! through systemd. `MOUNTER_KIND` selects the implementation; the
//! alternative pod-based mounter is a separate deployment and is not
//! linked into this build.

pub mod mounts;
mod systemd;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use s3cd_core::credentials::MountCredentials;
use s3cd_core::profile::ProfileError;
use s3cd_systemd::{SystemdError, UnitRunner};

use crate::args::MountArgs;

pub use systemd::SystemdMounter;

#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `bucket` at `target`; succeeds if the target is already
    /// mounted.
    async fn mount(
        &self,
        bucket: &str,
        target: &Path,
        credentials: &MountCredentials,
        args: MountArgs,
    ) -> Result<(), MountError>;

    async fn unmount(&self, target: &Path) -> Result<(), MountError>;

    /// Whether `target` is one of our FUSE mounts.
    async fn is_mount_point(&self, target: &Path) -> Result<bool, MountError>;
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("bucket name is missing")]
    EmptyBucket,

    #[error("target path is missing")]
    EmptyTarget,

    #[error("target path {path} does not exist")]
    TargetNotFound { path: PathBuf },

    #[error("corrupted mount at {path}: {source}")]
    CorruptedMount { path: PathBuf, source: std::io::Error },

    #[error("failed to prepare target {path}: {source}")]
    TargetIo { path: PathBuf, source: std::io::Error },

    #[error("failed to read mounts file {path}: {source}")]
    MountsFile { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("timed out after {timeout:?}: {output}")]
    Timeout { timeout: Duration, output: String },

    #[error(transparent)]
    Systemd(#[from] SystemdError),

    #[error("unsupported mounter kind {0:?} (the pod mounter ships as its own deployment)")]
    UnsupportedKind(String),
}

/// Pick the mounter for a `MOUNTER_KIND` value.
pub fn select_mounter(
    kind: &str,
    runner: Arc<dyn UnitRunner>,
    k8s_version: Option<String>,
) -> Result<Arc<dyn Mounter>, MountError> {
    match kind {
        "" | "systemd" => Ok(Arc::new(SystemdMounter::new(runner, k8s_version))),
        other => Err(MountError::UnsupportedKind(other.to_string())),
    }
}
