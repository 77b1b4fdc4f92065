// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publish/Unpublish end-to-end scenarios.

use crate::prelude::*;
use std::os::unix::fs::PermissionsExt;
use tonic::Request;

use s3cd_csi::Node;

const POD_CONTEXT: &[(&str, &str)] = &[
    ("authenticationSource", "pod"),
    ("csi.storage.k8s.io/pod.uid", "P1"),
    ("csi.storage.k8s.io/pod.namespace", "ns"),
    ("csi.storage.k8s.io/serviceAccount.name", "sa"),
    (
        "csi.storage.k8s.io/serviceAccount.tokens",
        r#"{"sts.amazonaws.com": {"token": "tok", "expirationTimestamp": "2026-08-01T00:00:00Z"}}"#,
    ),
];

fn clear_aws_env() {
    for key in [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
        "AWS_REGION",
        "AWS_DEFAULT_REGION",
        "AWS_STS_REGIONAL_ENDPOINTS",
        "AWS_ROLE_ARN",
    ] {
        std::env::remove_var(key);
    }
}

#[tokio::test]
#[serial_test::serial]
async fn driver_mode_happy_path() {
    clear_aws_env();
    std::env::set_var("AWS_ACCESS_KEY_ID", "AK");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "SK");
    std::env::set_var("AWS_SESSION_TOKEN", "ST");
    std::env::set_var("AWS_REGION", "eu-west-1");

    let driver = driver_with(None, None, "");
    let target = driver.target_path("P", "v1");
    let request = publish_request("v1", "b1", &target, &[]);

    driver.server.node_publish_volume(Request::new(request)).await.unwrap();

    let calls = driver.runner.service_calls();
    assert_eq!(calls.len(), 1);
    let config = &calls[0];

    let env = env_map(config);
    assert_eq!(env.get("AWS_ACCESS_KEY_ID").map(String::as_str), Some("AK"));
    assert_eq!(env.get("AWS_SECRET_ACCESS_KEY").map(String::as_str), Some("SK"));
    assert_eq!(env.get("AWS_SESSION_TOKEN").map(String::as_str), Some("ST"));
    assert_eq!(env.get("AWS_REGION").map(String::as_str), Some("eu-west-1"));
    assert_eq!(env.get("AWS_WEB_IDENTITY_TOKEN_FILE").map(String::as_str), Some("/plug/token"));

    // argv ends in <bucket> <target>
    let argv = &config.args;
    assert_eq!(argv[argv.len() - 2], "b1");
    assert_eq!(argv[argv.len() - 1], target.to_string_lossy());
    assert!(argv.contains(&"--allow-root".to_string()));

    clear_aws_env();
}

#[tokio::test]
#[serial_test::serial]
async fn pod_mode_falls_back_to_metadata_region() {
    clear_aws_env();

    let driver = driver_with(Some("arn:aws:iam::1:role/Role"), Some("us-east-1"), "");
    let target = driver.target_path("P1", "v1");
    let request = publish_request("v1", "b1", &target, POD_CONTEXT);

    driver.server.node_publish_volume(Request::new(request)).await.unwrap();

    let token_path = driver.plugin_dir.path().join("P1-v1.token");
    assert_eq!(std::fs::read_to_string(&token_path).unwrap(), "tok");
    let mode = std::fs::metadata(&token_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o400);

    let calls = driver.runner.service_calls();
    let env = env_map(&calls[0]);
    assert_eq!(env.get("AWS_REGION").map(String::as_str), Some("us-east-1"));
    assert_eq!(env.get("AWS_DEFAULT_REGION").map(String::as_str), Some("us-east-1"));
    assert_eq!(
        env.get("AWS_WEB_IDENTITY_TOKEN_FILE").map(String::as_str),
        Some("/plug/P1-v1.token")
    );
    assert_eq!(env.get("AWS_ROLE_ARN").map(String::as_str), Some("arn:aws:iam::1:role/Role"));
    assert_eq!(env.get("AWS_EC2_METADATA_DISABLED").map(String::as_str), Some("true"));
}

#[tokio::test]
#[serial_test::serial]
async fn volume_ids_with_slashes_are_tilde_encoded() {
    clear_aws_env();

    let driver = driver_with(Some("arn:aws:iam::1:role/Role"), Some("us-east-1"), "");
    let mut context = POD_CONTEXT.to_vec();
    context[1] = ("csi.storage.k8s.io/pod.uid", "P");
    let target = driver.target_path("P", "v~1");
    let request = publish_request("v/1", "b1", &target, &context);

    driver.server.node_publish_volume(Request::new(request)).await.unwrap();

    assert!(driver.plugin_dir.path().join("P-v~1.token").exists());
    let env = env_map(&driver.runner.service_calls()[0]);
    assert_eq!(
        env.get("AWS_WEB_IDENTITY_TOKEN_FILE").map(String::as_str),
        Some("/plug/P-v~1.token")
    );
}

#[tokio::test]
#[serial_test::serial]
async fn publish_is_idempotent_for_mounted_targets() {
    clear_aws_env();

    let driver = driver_with(None, None, "");
    let target = driver.target_path("P", "v1");
    std::fs::write(
        driver.mounts_file.path(),
        format!("mount-s3 {} fuse rw,nosuid 0 0\n", target.display()),
    )
    .unwrap();

    let request = publish_request("v1", "b1", &target, &[]);
    driver.server.node_publish_volume(Request::new(request)).await.unwrap();

    assert_eq!(driver.runner.call_count(), 0);
}

#[tokio::test]
#[serial_test::serial]
async fn unpublish_unmounts_and_removes_the_token() {
    clear_aws_env();

    let driver = driver_with(None, None, "");
    let target = driver.target_path("P1", "v1");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(
        driver.mounts_file.path(),
        format!("mount-s3 {} fuse rw,nosuid 0 0\n", target.display()),
    )
    .unwrap();
    std::fs::write(driver.plugin_dir.path().join("P1-v1.token"), "tok").unwrap();

    let request = s3cd_csi::NodeUnpublishVolumeRequest {
        volume_id: "v1".to_string(),
        target_path: target.to_string_lossy().into_owned(),
    };
    driver.server.node_unpublish_volume(Request::new(request)).await.unwrap();

    let calls = driver.runner.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (kind, config) = &calls[0];
    assert_eq!(*kind, "oneshot");
    assert_eq!(config.exec_path.to_string_lossy(), "/usr/bin/umount");
    assert_eq!(config.args, vec![target.to_string_lossy().into_owned()]);

    assert!(!driver.plugin_dir.path().join("P1-v1.token").exists());
}

#[tokio::test]
#[serial_test::serial]
async fn unpublish_of_an_absent_target_succeeds() {
    clear_aws_env();

    let driver = driver_with(None, None, "");
    let target = driver.target_path("P1", "v1");

    let request = s3cd_csi::NodeUnpublishVolumeRequest {
        volume_id: "v1".to_string(),
        target_path: target.to_string_lossy().into_owned(),
    };
    driver.server.node_unpublish_volume(Request::new(request)).await.unwrap();

    assert_eq!(driver.runner.call_count(), 0);
}
