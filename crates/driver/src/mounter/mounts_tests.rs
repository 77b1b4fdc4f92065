// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;
use std::path::PathBuf;

const SAMPLE: &str = "\
proc /proc proc rw,nosuid 0 0
mount-s3 /var/lib/kubelet/pods/P/volumes/kubernetes.io~csi/v1/mount fuse rw,nosuid,nodev 0 0
tmpfs /tmp tmpfs rw 0 0
s3fs /var/lib/kubelet/pods/P/volumes/kubernetes.io~csi/v2/mount fuse rw 0 0
";

#[test]
fn parses_device_and_mount_point_columns() {
    let entries = parse_mounts(SAMPLE);
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[1].device, "mount-s3");
    assert_eq!(
        entries[1].mount_point,
        "/var/lib/kubelet/pods/P/volumes/kubernetes.io~csi/v1/mount"
    );
}

#[test]
fn skips_short_lines() {
    assert!(parse_mounts("loner\n\n").is_empty());
}

#[tokio::test]
async fn recognises_only_our_device() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let ours = PathBuf::from("/var/lib/kubelet/pods/P/volumes/kubernetes.io~csi/v1/mount");
    let theirs = PathBuf::from("/var/lib/kubelet/pods/P/volumes/kubernetes.io~csi/v2/mount");

    assert!(device_mounted_at(file.path(), &ours).await.unwrap());
    // same path shape, wrong device column
    assert!(!device_mounted_at(file.path(), &theirs).await.unwrap());
    assert!(!device_mounted_at(file.path(), &PathBuf::from("/elsewhere")).await.unwrap());
}

#[tokio::test]
async fn missing_mounts_file_is_an_error() {
    let err = device_mounted_at(&PathBuf::from("/no/such/mounts"), &PathBuf::from("/t"))
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::MountsFile { .. }));
}
