// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credentials handed to the FUSE process.
//!
//! A [`MountCredentials`] is constructed once per Publish, consumed once to
//! generate the environment block for the transient unit, then discarded.
//! Secret fields are redacted from `Debug` output; nothing here logs them.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::profile::AwsProfile;

/// Environment variable mount-s3 reads its opaque cache key from.
pub const CACHE_KEY_ENV: &str = "UNSTABLE_MOUNTPOINT_CACHE_KEY";

/// Where the credentials for a mount were resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Long-term or role credentials owned by the driver itself.
    Driver,
    /// Pod-level credentials via a projected service-account token.
    Pod,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Driver => "driver",
            CredentialSource::Pod => "pod",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for CredentialSource {
    fn default() -> Self {
        CredentialSource::Driver
    }
}

/// A projected service-account token entry, keyed by audience in the
/// `csi.storage.k8s.io/serviceAccount.tokens` volume-context value.
#[derive(Clone, Deserialize)]
pub struct Token {
    pub token: String,
    #[serde(rename = "expirationTimestamp")]
    pub expiration_timestamp: DateTime<Utc>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token", &"<redacted>")
            .field("expiration_timestamp", &self.expiration_timestamp)
            .finish()
    }
}

/// Everything the FUSE process needs to authenticate against S3/STS.
#[derive(Clone, Default)]
pub struct MountCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Host-visible path of the web-identity token file.
    pub web_token_path: Option<PathBuf>,
    pub role_arn: Option<String>,
    pub region: Option<String>,
    pub default_region: Option<String>,
    /// `AWS_STS_REGIONAL_ENDPOINTS` hint (`regional`/`legacy`).
    pub sts_endpoints: Option<String>,
    /// Disable instance-metadata credential discovery in the FUSE process.
    pub disable_imds: bool,
    pub cache_key: Option<String>,
    pub source: CredentialSource,
}

impl MountCredentials {
    /// Build the environment block for the FUSE process.
    ///
    /// Every field that is set is emitted; the long-term triple requires
    /// both key halves to be present. When an [`AwsProfile`] was
    /// materialised for this mount its file paths are emitted as well, so
    /// the FUSE process can fall back to them.
    pub fn env(&self, profile: Option<&AwsProfile>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: &str| env.push((k.to_string(), v.to_string()));

        if let (Some(key), Some(secret)) = (&self.access_key_id, &self.secret_access_key) {
            push("AWS_ACCESS_KEY_ID", key);
            push("AWS_SECRET_ACCESS_KEY", secret);
            if let Some(session) = &self.session_token {
                push("AWS_SESSION_TOKEN", session);
            }
        }
        if let Some(profile) = profile {
            push("AWS_PROFILE", &profile.name);
            push("AWS_CONFIG_FILE", &profile.config_path.to_string_lossy());
            push("AWS_SHARED_CREDENTIALS_FILE", &profile.credentials_path.to_string_lossy());
        }
        if let Some(token_path) = &self.web_token_path {
            push("AWS_WEB_IDENTITY_TOKEN_FILE", &token_path.to_string_lossy());
            if let Some(role_arn) = &self.role_arn {
                push("AWS_ROLE_ARN", role_arn);
            }
        }
        if let Some(region) = &self.region {
            push("AWS_REGION", region);
        }
        if let Some(region) = &self.default_region {
            push("AWS_DEFAULT_REGION", region);
        }
        if let Some(endpoints) = &self.sts_endpoints {
            push("AWS_STS_REGIONAL_ENDPOINTS", endpoints);
        }
        if self.disable_imds {
            push("AWS_EC2_METADATA_DISABLED", "true");
        }
        if let Some(cache_key) = &self.cache_key {
            push(CACHE_KEY_ENV, cache_key);
        }
        env
    }

    /// Whether a long-term key pair is present (drives profile creation).
    pub fn has_long_term(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

impl fmt::Debug for MountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("web_token_path", &self.web_token_path)
            .field("role_arn", &self.role_arn)
            .field("region", &self.region)
            .field("default_region", &self.default_region)
            .field("sts_endpoints", &self.sts_endpoints)
            .field("disable_imds", &self.disable_imds)
            .field("cache_key", &self.cache_key)
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
