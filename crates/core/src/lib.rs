// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! s3cd-core: domain value types for the S3 CSI node driver.
//!
//! Everything the mount supervision and credential plane passes between
//! layers lives here: the parsed kubelet target path, the credentials a
//! FUSE process authenticates with, the on-disk profile files, and the
//! atomic file-write discipline that secret material is written with.

pub mod credentials;
pub mod fsx;
pub mod profile;
pub mod target;

pub use credentials::{CredentialSource, MountCredentials, Token};
pub use profile::{create_aws_profile, remove_aws_profile, AwsProfile, ProfileError};
pub use target::{TargetPath, TargetPathError, CSI_PLUGIN_TAG};
