// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The CSI node service.
//!
//! Publish validates the request, normalises the user's mount flags,
//! resolves credentials and hands the mount orchestrator a ready argument
//! set. Unpublish is idempotent: anything that is not mounted any more
//! counts as success, and the materialised token for the (pod, volume)
//! pair is removed on the way out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use s3cd_core::target::TargetPath;
use s3cd_csi as csi;
use s3cd_csi::volume_capability::{access_mode, AccessType, MountVolume};
use s3cd_csi::Node;
use s3cd_systemd::SystemdError;

use crate::args::MountArgs;
use crate::credentials::{CredentialError, CredentialProvider, BUCKET_NAME_KEY};
use crate::mounter::{MountError, Mounter};

pub struct NodeServer {
    node_id: String,
    kubelet_root: PathBuf,
    mounter: Arc<dyn Mounter>,
    credentials: Arc<CredentialProvider>,
}

impl NodeServer {
    pub fn new(
        node_id: String,
        kubelet_root: PathBuf,
        mounter: Arc<dyn Mounter>,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        Self { node_id, kubelet_root, mounter, credentials }
    }

    /// Best-effort removal of the token materialised for this mount.
    /// Parsing failures and volume-id mismatches are logged, never fatal.
    fn cleanup_token_for(&self, volume_id: &str, target_path: &str) {
        match TargetPath::parse(target_path) {
            Ok(parsed) => {
                if parsed.volume_id() != volume_id {
                    warn!(
                        request_volume = volume_id,
                        target_volume = parsed.volume_id(),
                        "volume id in request does not match the target path"
                    );
                }
                if let Err(err) = self.credentials.cleanup_token(parsed.pod_id(), parsed.volume_id())
                {
                    warn!(error = %err, "failed to remove token file");
                }
            }
            Err(err) => {
                warn!(error = %err, "could not parse target path for token cleanup");
            }
        }
    }
}

#[tonic::async_trait]
impl Node for NodeServer {
    async fn node_stage_volume(
        &self,
        _request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeStageVolume is not supported"))
    }

    async fn node_unstage_volume(
        &self,
        _request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeUnstageVolume is not supported"))
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id is missing"));
        }
        if req.target_path.is_empty() {
            return Err(Status::invalid_argument("target path is missing"));
        }
        let mount = mount_capability(req.volume_capability.as_ref())?;

        let target = Path::new(&req.target_path);
        if !target.starts_with(&self.kubelet_root) {
            return Err(Status::invalid_argument(format!(
                "target path {} is outside the kubelet root {}",
                req.target_path,
                self.kubelet_root.display()
            )));
        }

        let bucket = req
            .volume_context
            .get(BUCKET_NAME_KEY)
            .filter(|bucket| !bucket.is_empty())
            .ok_or_else(|| Status::invalid_argument("bucketName is missing from volume context"))?;

        let mut args = MountArgs::parse(&mount.mount_flags)
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        let fs_group = mount.volume_mount_group.as_str();
        if !fs_group.is_empty() {
            args.push_if_absent(&format!("--gid={}", fs_group));
            args.push_if_absent("--allow-other");
            args.push_if_absent("--dir-mode=770");
            args.push_if_absent("--file-mode=660");
        } else if !args.has_key("--allow-other") {
            args.push_if_absent("--allow-root");
        }
        if req.readonly {
            args.push_if_absent("--read-only");
        }

        info!(volume_id = %req.volume_id, target = %req.target_path, "publishing volume");

        let credentials = self
            .credentials
            .provide(&req.volume_id, &req.volume_context, &args)
            .await
            .map_err(|err| {
                error!(volume_id = %req.volume_id, error = %err, "credential resolution failed");
                credential_status(err)
            })?;

        self.mounter.mount(bucket, target, &credentials, args).await.map_err(|err| {
            error!(volume_id = %req.volume_id, target = %req.target_path, error = %err,
                "mount failed");
            mount_status(err)
        })?;

        info!(volume_id = %req.volume_id, target = %req.target_path, "volume published");
        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume id is missing"));
        }
        if req.target_path.is_empty() {
            return Err(Status::invalid_argument("target path is missing"));
        }
        let target = Path::new(&req.target_path);

        let mounted = match self.mounter.is_mount_point(target).await {
            Ok(mounted) => mounted,
            Err(MountError::TargetNotFound { .. }) => {
                info!(target = %req.target_path, "target path does not exist, skipping unmount");
                self.cleanup_token_for(&req.volume_id, &req.target_path);
                return Ok(Response::new(csi::NodeUnpublishVolumeResponse {}));
            }
            Err(MountError::CorruptedMount { .. }) => {
                warn!(target = %req.target_path, "corrupted mount point, proceeding to unmount");
                true
            }
            Err(err) => {
                error!(target = %req.target_path, error = %err, "mount point check failed");
                return Err(mount_status(err));
            }
        };

        if mounted {
            self.mounter.unmount(target).await.map_err(|err| {
                error!(target = %req.target_path, error = %err, "unmount failed");
                mount_status(err)
            })?;
            info!(volume_id = %req.volume_id, target = %req.target_path, "volume unmounted");
        } else {
            debug!(target = %req.target_path, "target not mounted, skipping unmount");
        }

        self.cleanup_token_for(&req.volume_id, &req.target_path);
        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        _request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        Err(Status::unimplemented("NodeGetVolumeStats is not supported"))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeExpandVolume is not supported"))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        let capabilities = vec![csi::NodeServiceCapability {
            r#type: Some(csi::node_service_capability::Type::Rpc(
                csi::node_service_capability::Rpc {
                    r#type: csi::node_service_capability::rpc::Type::VolumeMountGroup as i32,
                },
            )),
        }];
        Ok(Response::new(csi::NodeGetCapabilitiesResponse { capabilities }))
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}

/// The only capability shape we mount: a Mount access type with a known
/// access mode.
fn mount_capability(capability: Option<&csi::VolumeCapability>) -> Result<&MountVolume, Status> {
    let capability =
        capability.ok_or_else(|| Status::invalid_argument("volume capability is missing"))?;
    if let Some(mode) = &capability.access_mode {
        match access_mode::Mode::try_from(mode.mode) {
            Ok(access_mode::Mode::Unknown) | Err(_) => {
                return Err(Status::invalid_argument("unsupported volume access mode"));
            }
            Ok(_) => {}
        }
    }
    match &capability.access_type {
        Some(AccessType::Mount(mount)) => Ok(mount),
        Some(AccessType::Block(_)) => {
            Err(Status::invalid_argument("block volume capability is not supported"))
        }
        None => Err(Status::invalid_argument("volume capability access type is missing")),
    }
}

fn credential_status(err: CredentialError) -> Status {
    match &err {
        CredentialError::UnknownAuthenticationSource(_)
        | CredentialError::MissingContext(_)
        | CredentialError::MissingToken(_)
        | CredentialError::MalformedTokens(_)
        | CredentialError::MissingRoleAnnotation { .. } => {
            Status::invalid_argument(err.to_string())
        }
        CredentialError::Kube(kube::Error::Api(response)) if response.code == 404 => {
            Status::not_found(err.to_string())
        }
        CredentialError::Kube(_) | CredentialError::Region(_) | CredentialError::TokenWrite(_) => {
            Status::internal(err.to_string())
        }
    }
}

fn mount_status(err: MountError) -> Status {
    match &err {
        MountError::EmptyBucket | MountError::EmptyTarget | MountError::UnsupportedKind(_) => {
            Status::invalid_argument(err.to_string())
        }
        MountError::Timeout { .. } => Status::deadline_exceeded(err.to_string()),
        MountError::Systemd(SystemdError::Cancelled { .. }) => Status::cancelled(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
