// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk AWS profile for long-term credentials.
//!
//! mount-s3 cannot read multi-value secrets from its unit environment
//! without exposing them in `systemctl show`, so long-term keys are
//! materialised as an INI profile next to the mount point. The files live
//! inside the per-mount parent directory so a stale mount's teardown also
//! removes its credentials.
//!
//! The INI grammar is line-oriented; a key or secret containing a control
//! character could smuggle extra lines into the file. Inputs are rejected
//! outright instead of escaped.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fsx;

/// Profile name referenced by `AWS_PROFILE`.
pub const PROFILE_NAME: &str = "s3-csi";
/// File names inside the per-mount parent directory.
pub const CONFIG_FILE_NAME: &str = "s3-csi-config";
pub const CREDENTIALS_FILE_NAME: &str = "s3-csi-credentials";

const PROFILE_FILE_MODE: u32 = 0o400;

/// Paths of a materialised profile plus the name to select it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsProfile {
    pub name: String,
    pub config_path: PathBuf,
    pub credentials_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("credentials contain non-printable characters")]
    InvalidCredentials,

    #[error("failed to write profile file: {0}")]
    Io(#[from] io::Error),
}

/// Write the config + credentials pair for a long-term key set under `dir`.
///
/// Validation happens before any file is touched; on a failed credentials
/// write the config file is unlinked again so no partial profile remains.
pub fn create_aws_profile(
    dir: &Path,
    access_key_id: &str,
    secret_access_key: &str,
    session_token: &str,
) -> Result<AwsProfile, ProfileError> {
    for value in [access_key_id, secret_access_key, session_token] {
        if !is_printable(value) {
            return Err(ProfileError::InvalidCredentials);
        }
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    let credentials_path = dir.join(CREDENTIALS_FILE_NAME);

    let config = format!("[profile {}]\n", PROFILE_NAME);
    fsx::write_atomic(&config_path, config.as_bytes(), PROFILE_FILE_MODE)?;

    let mut credentials = format!(
        "[{}]\naws_access_key_id={}\naws_secret_access_key={}\n",
        PROFILE_NAME, access_key_id, secret_access_key
    );
    if !session_token.is_empty() {
        credentials.push_str(&format!("aws_session_token={}\n", session_token));
    }
    if let Err(e) = fsx::write_atomic(&credentials_path, credentials.as_bytes(), PROFILE_FILE_MODE)
    {
        let _ = fsx::remove_if_exists(&config_path);
        return Err(e.into());
    }

    Ok(AwsProfile { name: PROFILE_NAME.to_string(), config_path, credentials_path })
}

/// Remove the profile pair under `dir`; absence is not an error.
pub fn remove_aws_profile(dir: &Path) -> io::Result<()> {
    fsx::remove_if_exists(&dir.join(CONFIG_FILE_NAME))?;
    fsx::remove_if_exists(&dir.join(CREDENTIALS_FILE_NAME))?;
    Ok(())
}

fn is_printable(value: &str) -> bool {
    value.chars().all(|c| !c.is_control())
}

#[cfg(test)]
#[path = "profile_tests.rs"]
mod tests;
