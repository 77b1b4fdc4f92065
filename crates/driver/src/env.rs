// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the driver crate.

use std::path::PathBuf;

use s3cd_core::credentials::CACHE_KEY_ENV;

/// Plugin directory as seen from the host (the FUSE process's namespace).
pub fn host_plugin_dir() -> PathBuf {
    path_or("HOST_PLUGIN_DIR", "/var/lib/kubelet/plugins/s3.csi.aws.com")
}

/// mount-s3 binary on the host, placed there by the installer.
pub fn mount_s3_path() -> PathBuf {
    path_or("MOUNT_S3_PATH", "/usr/bin/mount-s3")
}

/// Kubelet root every target path must live under.
pub fn kubelet_path() -> PathBuf {
    path_or("KUBELET_PATH", "/var/lib/kubelet")
}

/// Pseudo-terminal master multiplexer.
pub fn ptmx_path() -> PathBuf {
    path_or("PTMX_PATH", s3cd_systemd::pty::DEFAULT_PTMX_PATH)
}

/// Which mounter backs Publish: empty/`systemd` for the host-supervisor
/// mounter, `pod` for the out-of-tree pod mounter deployment.
pub fn mounter_kind() -> String {
    std::env::var("MOUNTER_KIND").unwrap_or_default()
}

/// Node name reported through NodeGetInfo.
pub fn node_name() -> Option<String> {
    non_empty("CSI_NODE_NAME")
}

pub fn aws_access_key_id() -> Option<String> {
    non_empty("AWS_ACCESS_KEY_ID")
}

pub fn aws_secret_access_key() -> Option<String> {
    non_empty("AWS_SECRET_ACCESS_KEY")
}

pub fn aws_session_token() -> Option<String> {
    non_empty("AWS_SESSION_TOKEN")
}

pub fn aws_region() -> Option<String> {
    non_empty("AWS_REGION")
}

pub fn aws_default_region() -> Option<String> {
    non_empty("AWS_DEFAULT_REGION")
}

pub fn aws_sts_regional_endpoints() -> Option<String> {
    non_empty("AWS_STS_REGIONAL_ENDPOINTS")
}

pub fn aws_role_arn() -> Option<String> {
    non_empty("AWS_ROLE_ARN")
}

pub fn cache_key() -> Option<String> {
    non_empty(CACHE_KEY_ENV)
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn path_or(name: &str, default: &str) -> PathBuf {
    non_empty(name).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(default))
}
