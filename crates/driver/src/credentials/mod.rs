// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-Publish credential resolution.
//!
//! Two authentication sources exist, declared in the volume context:
//!
//! ```text
//! driver (default): long-term keys / role from the driver's own
//!                   environment; nothing is materialised on disk here.
//! pod:              projected service-account token from the volume
//!                   context + the service account's IAM role annotation;
//!                   the token is written under the plugin directory and
//!                   referenced by its host-visible path.
//! ```

pub mod k8s;
pub mod regions;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use s3cd_core::credentials::{CredentialSource, MountCredentials, Token};
use s3cd_core::fsx;
use s3cd_core::target;

use crate::args::MountArgs;
use crate::env;
use k8s::ServiceAccountRoleSource;
use regions::{RegionError, RegionResolver};

/// Volume-context keys the credential plane consumes.
pub const BUCKET_NAME_KEY: &str = "bucketName";
pub const AUTHENTICATION_SOURCE_KEY: &str = "authenticationSource";
pub const STS_REGION_KEY: &str = "stsRegion";
pub const POD_UID_KEY: &str = "csi.storage.k8s.io/pod.uid";
pub const POD_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pod.namespace";
pub const SERVICE_ACCOUNT_NAME_KEY: &str = "csi.storage.k8s.io/serviceAccount.name";
pub const SERVICE_ACCOUNT_TOKENS_KEY: &str = "csi.storage.k8s.io/serviceAccount.tokens";

/// Audience of the projected token used against STS.
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";
/// Service-account annotation naming the IAM role to assume.
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

const TOKEN_FILE_MODE: u32 = 0o400;

/// `authenticationSource` volume-context value, resolved at the ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationSource {
    Driver,
    Pod,
}

impl AuthenticationSource {
    pub fn parse(value: Option<&str>) -> Result<Self, CredentialError> {
        match value.unwrap_or("") {
            "" | "driver" => Ok(AuthenticationSource::Driver),
            "pod" => Ok(AuthenticationSource::Pod),
            other => Err(CredentialError::UnknownAuthenticationSource(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unknown authentication source {0:?}")]
    UnknownAuthenticationSource(String),

    #[error("volume context is missing {0}")]
    MissingContext(&'static str),

    #[error("no projected service-account token for audience {0}")]
    MissingToken(&'static str),

    #[error("malformed service-account tokens: {0}")]
    MalformedTokens(#[from] serde_json::Error),

    #[error("service account {namespace}/{name} has no eks.amazonaws.com/role-arn annotation")]
    MissingRoleAnnotation { namespace: String, name: String },

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("failed to write service-account token: {0}")]
    TokenWrite(#[source] io::Error),
}

/// Resolves credentials per Publish and owns the materialised token files.
pub struct CredentialProvider {
    roles: Arc<dyn ServiceAccountRoleSource>,
    regions: Arc<RegionResolver>,
    /// Where this process writes token files.
    container_plugin_dir: PathBuf,
    /// Where the FUSE process will see them.
    host_plugin_dir: PathBuf,
}

impl CredentialProvider {
    pub fn new(
        roles: Arc<dyn ServiceAccountRoleSource>,
        regions: Arc<RegionResolver>,
        container_plugin_dir: PathBuf,
        host_plugin_dir: PathBuf,
    ) -> Self {
        Self { roles, regions, container_plugin_dir, host_plugin_dir }
    }

    /// Resolve credentials for one Publish request.
    pub async fn provide(
        &self,
        volume_id: &str,
        volume_context: &HashMap<String, String>,
        args: &MountArgs,
    ) -> Result<MountCredentials, CredentialError> {
        let source = AuthenticationSource::parse(
            volume_context.get(AUTHENTICATION_SOURCE_KEY).map(String::as_str),
        )?;
        match source {
            AuthenticationSource::Driver => Ok(self.provide_driver()),
            AuthenticationSource::Pod => self.provide_pod(volume_id, volume_context, args).await,
        }
    }

    /// Remove the token materialised for this (pod, volume); absence is
    /// not an error.
    pub fn cleanup_token(&self, pod_id: &str, volume_id: &str) -> io::Result<()> {
        let path = self.container_plugin_dir.join(target::token_file_name(pod_id, volume_id));
        let removed = fsx::remove_if_exists(&path)?;
        if removed {
            debug!(path = %path.display(), "removed service-account token");
        }
        Ok(())
    }

    fn provide_driver(&self) -> MountCredentials {
        MountCredentials {
            access_key_id: env::aws_access_key_id(),
            secret_access_key: env::aws_secret_access_key(),
            session_token: env::aws_session_token(),
            web_token_path: Some(self.host_plugin_dir.join("token")),
            role_arn: env::aws_role_arn(),
            region: env::aws_region(),
            default_region: env::aws_default_region(),
            sts_endpoints: env::aws_sts_regional_endpoints(),
            disable_imds: false,
            cache_key: env::cache_key(),
            source: CredentialSource::Driver,
        }
    }

    async fn provide_pod(
        &self,
        volume_id: &str,
        volume_context: &HashMap<String, String>,
        args: &MountArgs,
    ) -> Result<MountCredentials, CredentialError> {
        let pod_id = require(volume_context, POD_UID_KEY)?;
        let namespace = require(volume_context, POD_NAMESPACE_KEY)?;
        let sa_name = require(volume_context, SERVICE_ACCOUNT_NAME_KEY)?;
        let tokens_json = require(volume_context, SERVICE_ACCOUNT_TOKENS_KEY)?;

        let tokens: HashMap<String, Token> = serde_json::from_str(tokens_json)?;
        let token = tokens.get(STS_AUDIENCE).ok_or(CredentialError::MissingToken(STS_AUDIENCE))?;

        let role_arn = self.roles.role_arn(namespace, sa_name).await?.ok_or_else(|| {
            CredentialError::MissingRoleAnnotation {
                namespace: namespace.to_string(),
                name: sa_name.to_string(),
            }
        })?;

        let region = self.regions.security_token_service(volume_context, args).await?;

        let file_name = target::token_file_name(pod_id, volume_id);
        let container_path = self.container_plugin_dir.join(&file_name);
        fsx::write_atomic(&container_path, token.token.as_bytes(), TOKEN_FILE_MODE)
            .map_err(CredentialError::TokenWrite)?;
        debug!(path = %container_path.display(), expires = %token.expiration_timestamp,
            "materialised service-account token");

        Ok(MountCredentials {
            web_token_path: Some(self.host_plugin_dir.join(&file_name)),
            role_arn: Some(role_arn),
            region: Some(region.clone()),
            default_region: Some(region),
            sts_endpoints: Some("regional".to_string()),
            disable_imds: true,
            cache_key: Some(format!("{}-{}", pod_id, volume_id)),
            source: CredentialSource::Pod,
            ..Default::default()
        })
    }
}

fn require<'a>(
    volume_context: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, CredentialError> {
    volume_context
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(CredentialError::MissingContext(key))
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
