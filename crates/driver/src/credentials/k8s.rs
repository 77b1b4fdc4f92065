// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes lookups: service-account role annotations and the apiserver
//! version reported in the FUSE user-agent.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::Api;
use kube::Client;
use tracing::debug;

use super::{CredentialError, ROLE_ARN_ANNOTATION};

/// Source of IAM role annotations, separated from [`KubeRoles`] so pod-mode
/// resolution is testable without a cluster.
#[async_trait]
pub trait ServiceAccountRoleSource: Send + Sync {
    /// The role ARN annotated on the service account, if any.
    async fn role_arn(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, CredentialError>;
}

/// Role lookup through the in-cluster Kubernetes API.
#[derive(Clone)]
pub struct KubeRoles {
    client: Client,
}

impl KubeRoles {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAccountRoleSource for KubeRoles {
    async fn role_arn(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, CredentialError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let service_account = api.get(name).await?;
        Ok(service_account
            .metadata
            .annotations
            .and_then(|annotations| annotations.get(ROLE_ARN_ANNOTATION).cloned()))
    }
}

/// Apiserver version string (`v1.29.0`-style) for the user-agent, or `None`
/// when the apiserver cannot be reached.
pub async fn orchestrator_version(client: &Client) -> Option<String> {
    match client.apiserver_version().await {
        Ok(info) => Some(info.git_version),
        Err(err) => {
            debug!(error = %err, "failed to read apiserver version");
            None
        }
    }
}
