// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The host-supervisor mounter: one transient `mount-s3` unit per mount.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use s3cd_core::credentials::{CredentialSource, MountCredentials};
use s3cd_core::profile;
use s3cd_systemd::{transient_unit_name, ExecConfig, SystemdError, UnitRunner};

use crate::args::MountArgs;
use crate::env;
use crate::version::DRIVER_VERSION;

use super::mounts;
use super::{MountError, Mounter};

/// Budget for one StartService / umount round-trip.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(30);
const UMOUNT_PATH: &str = "/usr/bin/umount";
const MOUNT_UNIT_BASENAME: &str = "mount-s3";
const UMOUNT_UNIT_BASENAME: &str = "umount-s3";

pub struct SystemdMounter {
    runner: Arc<dyn UnitRunner>,
    mount_s3_path: PathBuf,
    mounts_path: PathBuf,
    k8s_version: Option<String>,
    timeout: Duration,
}

impl SystemdMounter {
    pub fn new(runner: Arc<dyn UnitRunner>, k8s_version: Option<String>) -> Self {
        Self {
            runner,
            mount_s3_path: env::mount_s3_path(),
            mounts_path: PathBuf::from(mounts::DEFAULT_MOUNTS_PATH),
            k8s_version,
            timeout: MOUNT_TIMEOUT,
        }
    }

    pub fn with_mount_s3_path(mut self, path: PathBuf) -> Self {
        self.mount_s3_path = path;
        self
    }

    pub fn with_mounts_path(mut self, path: PathBuf) -> Self {
        self.mounts_path = path;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `s3-csi-driver/<version> credential-source#<source> k8s/<version>`,
    /// the last segment omitted when the orchestrator version is unknown.
    fn user_agent(&self, source: CredentialSource) -> String {
        let mut agent = format!("s3-csi-driver/{} credential-source#{}", DRIVER_VERSION, source);
        if let Some(version) = self.k8s_version.as_deref().filter(|v| !v.is_empty()) {
            agent.push_str(" k8s/");
            agent.push_str(version);
        }
        agent
    }

    /// Run the unit under the 30-second budget. The deadline cancels the
    /// in-flight wait rather than dropping it, so the PTY output still
    /// comes back attached to the error.
    async fn supervise(&self, config: &ExecConfig, oneshot: bool) -> Result<String, MountError> {
        let cancel = CancellationToken::new();
        let fut = async {
            if oneshot {
                self.runner.run_oneshot(&cancel, config).await
            } else {
                self.runner.start_service(&cancel, config).await
            }
        };
        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => result.map_err(MountError::from),
            _ = tokio::time::sleep(self.timeout) => {
                cancel.cancel();
                match fut.await {
                    Err(SystemdError::Cancelled { output, .. }) => {
                        Err(MountError::Timeout { timeout: self.timeout, output })
                    }
                    other => other.map_err(MountError::from),
                }
            }
        }
    }
}

#[async_trait]
impl Mounter for SystemdMounter {
    async fn mount(
        &self,
        bucket: &str,
        target: &Path,
        credentials: &MountCredentials,
        mut args: MountArgs,
    ) -> Result<(), MountError> {
        if bucket.is_empty() {
            return Err(MountError::EmptyBucket);
        }
        if target.as_os_str().is_empty() {
            return Err(MountError::EmptyTarget);
        }

        let mut created_dir = false;
        match std::fs::metadata(target) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut builder = std::fs::DirBuilder::new();
                builder.recursive(true);
                std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o755);
                builder
                    .create(target)
                    .map_err(|source| MountError::TargetIo { path: target.to_path_buf(), source })?;
                created_dir = true;
            }
            Err(err) if is_corrupted(&err) => {
                warn!(target = %target.display(), "corrupted mount detected, unmounting first");
                self.unmount(target).await?;
            }
            Err(source) => {
                return Err(MountError::TargetIo { path: target.to_path_buf(), source })
            }
        }

        if mounts::device_mounted_at(&self.mounts_path, target).await? {
            debug!(target = %target.display(), "target already mounted");
            return Ok(());
        }

        let parent = target.parent();
        let aws_profile = if credentials.has_long_term() {
            let parent = parent.ok_or_else(|| MountError::TargetIo {
                path: target.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"),
            })?;
            Some(profile::create_aws_profile(
                parent,
                credentials.access_key_id.as_deref().unwrap_or(""),
                credentials.secret_access_key.as_deref().unwrap_or(""),
                credentials.session_token.as_deref().unwrap_or(""),
            )?)
        } else {
            None
        };

        let mut unit_env = credentials.env(aws_profile.as_ref());
        if let Some(attempts) = args.remove_key("--aws-max-attempts") {
            if !attempts.is_empty() {
                unit_env.push(("AWS_MAX_ATTEMPTS".to_string(), attempts));
            }
        }

        args.remove_key("--user-agent-prefix");
        args.push(format!("--user-agent-prefix={}", self.user_agent(credentials.source)));

        let mut argv = args.into_vec();
        argv.push(bucket.to_string());
        argv.push(target.to_string_lossy().into_owned());

        let config = ExecConfig {
            name: transient_unit_name(MOUNT_UNIT_BASENAME),
            description: format!("S3 CSI driver FUSE mount for {}", target.display()),
            exec_path: self.mount_s3_path.clone(),
            args: argv,
            env: unit_env,
        };

        info!(unit = %config.name, bucket, target = %target.display(), "starting mount-s3");
        match self.supervise(&config, false).await {
            Ok(output) => {
                if !output.is_empty() {
                    debug!(output, "mount-s3 startup output");
                }
                Ok(())
            }
            Err(err) => {
                if created_dir {
                    let _ = std::fs::remove_dir(target);
                }
                if aws_profile.is_some() {
                    if let Some(parent) = parent {
                        let _ = profile::remove_aws_profile(parent);
                    }
                }
                Err(err)
            }
        }
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        if let Some(parent) = target.parent() {
            if let Err(err) = profile::remove_aws_profile(parent) {
                warn!(error = %err, "failed to remove profile files");
            }
        }

        let config = ExecConfig {
            name: transient_unit_name(UMOUNT_UNIT_BASENAME),
            description: format!("S3 CSI driver unmount for {}", target.display()),
            exec_path: PathBuf::from(UMOUNT_PATH),
            args: vec![target.to_string_lossy().into_owned()],
            env: Vec::new(),
        };

        info!(unit = %config.name, target = %target.display(), "unmounting");
        let output = self.supervise(&config, true).await?;
        if !output.is_empty() {
            debug!(output, "umount output");
        }
        Ok(())
    }

    async fn is_mount_point(&self, target: &Path) -> Result<bool, MountError> {
        match std::fs::metadata(target) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MountError::TargetNotFound { path: target.to_path_buf() })
            }
            Err(source) if is_corrupted(&source) => {
                return Err(MountError::CorruptedMount { path: target.to_path_buf(), source })
            }
            Err(source) => {
                return Err(MountError::TargetIo { path: target.to_path_buf(), source })
            }
        }
        mounts::device_mounted_at(&self.mounts_path, target).await
    }
}

/// Errno class a crashed FUSE process leaves behind on its mount point.
fn is_corrupted(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENOTCONN) | Some(libc::ESTALE) | Some(libc::EIO)
    )
}

#[cfg(test)]
#[path = "systemd_tests.rs"]
mod tests;
