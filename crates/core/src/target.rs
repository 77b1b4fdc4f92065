// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parsed view of the kubelet-supplied target path.
//!
//! The orchestrator hands Publish a directory of the form
//! `<kubelet-root>/pods/<pod-uuid>/volumes/kubernetes.io~csi/<volume-id>/mount`.
//! Volume ids containing `/` arrive with `/` replaced by `~` (the kubelet's
//! own encoding, which is why the plugin tag segment also carries a `~`).

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Literal third-from-last path segment for CSI volume mounts.
pub const CSI_PLUGIN_TAG: &str = "kubernetes.io~csi";

/// A target path that matched the kubelet layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPath {
    pod_id: String,
    volume_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetPathError {
    #[error("target path {0:?} is not a kubelet csi mount path")]
    Malformed(String),
}

impl TargetPath {
    /// Parse a target path, accepting the `~`-encoded volume id form.
    pub fn parse(path: &str) -> Result<Self, TargetPathError> {
        let malformed = || TargetPathError::Malformed(path.to_string());

        let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        if segments.len() < 6 {
            return Err(malformed());
        }
        let tail = &segments[segments.len() - 6..];
        let (pods, pod_id, volumes, tag, volume_id, mount) =
            (tail[0], tail[1], tail[2], tail[3], tail[4], tail[5]);

        if pods != "pods"
            || volumes != "volumes"
            || tag != CSI_PLUGIN_TAG
            || mount != "mount"
            || pod_id.is_empty()
            || volume_id.is_empty()
        {
            return Err(malformed());
        }

        Ok(Self { pod_id: pod_id.to_string(), volume_id: decode_volume_id(volume_id) })
    }

    /// Build the path the kubelet would hand us for this (pod, volume) pair.
    pub fn build(kubelet_root: &Path, pod_id: &str, volume_id: &str) -> PathBuf {
        kubelet_root
            .join("pods")
            .join(pod_id)
            .join("volumes")
            .join(CSI_PLUGIN_TAG)
            .join(encode_volume_id(volume_id))
            .join("mount")
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// The decoded volume id (may contain `/`).
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    pub fn encoded_volume_id(&self) -> String {
        encode_volume_id(&self.volume_id)
    }

    /// File name of the service-account token for this (pod, volume) pair.
    ///
    /// Unique across co-tenant pods sharing the same volume id.
    pub fn token_file_name(&self) -> String {
        token_file_name(self.pod_id(), &self.volume_id)
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod={} volume={}", self.pod_id, self.volume_id)
    }
}

/// Replace `/` with `~` the way the kubelet encodes volume ids in paths.
pub fn encode_volume_id(volume_id: &str) -> String {
    volume_id.replace('/', "~")
}

pub fn decode_volume_id(encoded: &str) -> String {
    encoded.replace('~', "/")
}

/// `<pod-uuid>-<encoded-volume-id>.token`
pub fn token_file_name(pod_id: &str, volume_id: &str) -> String {
    format!("{}-{}.token", pod_id, encode_volume_id(volume_id))
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
