// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential-material specs: profile files and injection safety.

use s3cd_core::profile::{create_aws_profile, ProfileError};

#[test]
fn invalid_credential_characters_create_nothing() {
    let dir = tempfile::tempdir().unwrap();

    let err = create_aws_profile(dir.path(), "AK\n", "SK", "").unwrap_err();
    assert!(matches!(err, ProfileError::InvalidCredentials));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn profile_round_trips_through_an_ini_reader() {
    let dir = tempfile::tempdir().unwrap();
    let profile = create_aws_profile(dir.path(), "AKIA12345", "sEcReT/Key+1", "session.token").unwrap();

    let contents = std::fs::read_to_string(&profile.credentials_path).unwrap();
    let mut section = String::new();
    let mut entries = std::collections::HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.to_string();
        } else if let Some((key, value)) = line.split_once('=') {
            entries.insert(format!("{section}.{}", key.trim()), value.trim().to_string());
        }
    }

    assert_eq!(entries.get("s3-csi.aws_access_key_id").map(String::as_str), Some("AKIA12345"));
    assert_eq!(
        entries.get("s3-csi.aws_secret_access_key").map(String::as_str),
        Some("sEcReT/Key+1")
    );
    assert_eq!(entries.get("s3-csi.aws_session_token").map(String::as_str), Some("session.token"));
}
