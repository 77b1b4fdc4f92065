// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the spec suite.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use s3cd_driver::credentials::k8s::ServiceAccountRoleSource;
use s3cd_driver::credentials::regions::{ImdsRegionSource, RegionResolver};
use s3cd_driver::credentials::{CredentialError, CredentialProvider};
use s3cd_driver::mounter::SystemdMounter;
use s3cd_driver::NodeServer;
use s3cd_systemd::{ExecConfig, SystemdError, UnitRunner};

/// Records every unit the driver hands to "systemd".
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<(&'static str, ExecConfig)>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn service_calls(&self) -> Vec<ExecConfig> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == "service")
            .map(|(_, config)| config.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl UnitRunner for FakeRunner {
    async fn start_service(
        &self,
        _cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        self.calls.lock().unwrap().push(("service", config.clone()));
        Ok(String::new())
    }

    async fn run_oneshot(
        &self,
        _cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        self.calls.lock().unwrap().push(("oneshot", config.clone()));
        Ok(String::new())
    }

    fn is_connection_closed(&self) -> bool {
        false
    }

    async fn teardown(&self) {}
}

/// Service accounts with a fixed role annotation.
pub struct StubRoles(pub Option<String>);

#[async_trait::async_trait]
impl ServiceAccountRoleSource for StubRoles {
    async fn role_arn(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<String>, CredentialError> {
        Ok(self.0.clone())
    }
}

/// Instance metadata returning a fixed region (or nothing).
pub struct StubImds(pub Option<String>);

#[async_trait::async_trait]
impl ImdsRegionSource for StubImds {
    async fn region(&self) -> Option<String> {
        self.0.clone()
    }
}

/// One assembled driver over fakes: a temp kubelet root, a temp plugin
/// directory, a temp (initially empty) mounts file.
pub struct Driver {
    pub server: NodeServer,
    pub runner: Arc<FakeRunner>,
    pub kubelet_root: tempfile::TempDir,
    pub plugin_dir: tempfile::TempDir,
    pub mounts_file: tempfile::NamedTempFile,
}

impl Driver {
    pub fn target_path(&self, pod_id: &str, encoded_volume_id: &str) -> PathBuf {
        self.kubelet_root
            .path()
            .join("pods")
            .join(pod_id)
            .join("volumes")
            .join("kubernetes.io~csi")
            .join(encoded_volume_id)
            .join("mount")
    }
}

pub fn driver_with(role_arn: Option<&str>, imds_region: Option<&str>, mounts: &str) -> Driver {
    use std::io::Write;

    let runner = FakeRunner::new();
    let kubelet_root = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();

    let mut mounts_file = tempfile::NamedTempFile::new().unwrap();
    mounts_file.write_all(mounts.as_bytes()).unwrap();

    let credentials = Arc::new(CredentialProvider::new(
        Arc::new(StubRoles(role_arn.map(str::to_owned))),
        RegionResolver::with_imds(Arc::new(StubImds(imds_region.map(str::to_owned)))),
        plugin_dir.path().to_path_buf(),
        PathBuf::from("/plug"),
    ));

    let mounter = Arc::new(
        SystemdMounter::new(runner.clone(), Some("v1.29.0".to_string()))
            .with_mount_s3_path(PathBuf::from("/usr/bin/mount-s3"))
            .with_mounts_path(mounts_file.path().to_path_buf()),
    );

    let server = NodeServer::new(
        "spec-node".to_string(),
        kubelet_root.path().to_path_buf(),
        mounter,
        credentials,
    );

    Driver { server, runner, kubelet_root, plugin_dir, mounts_file }
}

pub fn env_map(config: &ExecConfig) -> HashMap<String, String> {
    config.env.iter().cloned().collect()
}

pub fn mount_capability(flags: &[&str]) -> s3cd_csi::VolumeCapability {
    s3cd_csi::VolumeCapability {
        access_type: Some(s3cd_csi::volume_capability::AccessType::Mount(
            s3cd_csi::volume_capability::MountVolume {
                fs_type: String::new(),
                mount_flags: flags.iter().map(|f| f.to_string()).collect(),
                volume_mount_group: String::new(),
            },
        )),
        access_mode: Some(s3cd_csi::volume_capability::AccessMode {
            mode: s3cd_csi::volume_capability::access_mode::Mode::MultiNodeMultiWriter as i32,
        }),
    }
}

pub fn publish_request(
    volume_id: &str,
    bucket: &str,
    target: &Path,
    extra_context: &[(&str, &str)],
) -> s3cd_csi::NodePublishVolumeRequest {
    let mut volume_context = HashMap::new();
    volume_context.insert("bucketName".to_string(), bucket.to_string());
    for (key, value) in extra_context {
        volume_context.insert(key.to_string(), value.to_string());
    }
    s3cd_csi::NodePublishVolumeRequest {
        volume_id: volume_id.to_string(),
        target_path: target.to_string_lossy().into_owned(),
        volume_capability: Some(mount_capability(&[])),
        volume_context,
        ..Default::default()
    }
}
