// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Region resolution for STS signing.
//!
//! Precedence: `stsRegion` in the volume context, `--region` in the
//! normalised mount args, `AWS_REGION`, `AWS_DEFAULT_REGION`, then a
//! once-only instance-metadata lookup. The lookup result is cached for the
//! process lifetime (failures included) and pre-warmed from a background
//! task so the first Publish does not pay for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::args::MountArgs;
use crate::env;

use super::STS_REGION_KEY;

const IMDS_TIMEOUT: Duration = Duration::from_secs(2);
const IMDS_REGION_PATH: &str = "/latest/meta-data/placement/region";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("unknown region: set stsRegion, --region, or AWS_REGION")]
    Unknown,
}

/// Instance-metadata region lookup, separated out so tests can stub the
/// endpoint away.
#[async_trait]
pub trait ImdsRegionSource: Send + Sync {
    async fn region(&self) -> Option<String>;
}

/// Real lookup against the EC2 instance metadata service.
pub struct Ec2Imds {
    client: aws_config::imds::Client,
}

impl Ec2Imds {
    pub fn new() -> Self {
        Self { client: aws_config::imds::Client::builder().build() }
    }
}

impl Default for Ec2Imds {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImdsRegionSource for Ec2Imds {
    async fn region(&self) -> Option<String> {
        match self.client.get(IMDS_REGION_PATH).await {
            Ok(region) => Some(region.into()),
            Err(err) => {
                debug!(error = %err, "imds region lookup failed");
                None
            }
        }
    }
}

/// Four-level fallback chain plus the cached metadata lookup.
pub struct RegionResolver {
    imds: Arc<dyn ImdsRegionSource>,
    cached: OnceCell<Option<String>>,
}

impl RegionResolver {
    pub fn new() -> Arc<Self> {
        Self::with_imds(Arc::new(Ec2Imds::new()))
    }

    pub fn with_imds(imds: Arc<dyn ImdsRegionSource>) -> Arc<Self> {
        let resolver = Arc::new(Self { imds, cached: OnceCell::new() });
        let warm = resolver.clone();
        tokio::spawn(async move {
            warm.imds_region().await;
        });
        resolver
    }

    /// Region used for STS signing for this Publish.
    pub async fn security_token_service(
        &self,
        volume_context: &HashMap<String, String>,
        args: &MountArgs,
    ) -> Result<String, RegionError> {
        if let Some(region) = volume_context.get(STS_REGION_KEY).filter(|r| !r.is_empty()) {
            return Ok(region.clone());
        }
        if let Some(region) = args.value_of("--region").filter(|r| !r.is_empty()) {
            return Ok(region.to_string());
        }
        if let Some(region) = env::aws_region() {
            return Ok(region);
        }
        if let Some(region) = env::aws_default_region() {
            return Ok(region);
        }
        self.imds_region().await.ok_or(RegionError::Unknown)
    }

    async fn imds_region(&self) -> Option<String> {
        self.cached
            .get_or_init(|| async {
                match tokio::time::timeout(IMDS_TIMEOUT, self.imds.region()).await {
                    Ok(region) => region,
                    Err(_) => {
                        debug!("imds region lookup timed out");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

#[cfg(test)]
#[path = "regions_tests.rs"]
mod tests;
