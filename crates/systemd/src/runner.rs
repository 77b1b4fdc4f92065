// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency-safe façade that survives losing the systemd socket.
//!
//! Losing `/run/systemd/private` is recoverable (systemd may restart under
//! us), so a closed connection is replaced transparently. The discipline:
//! reads of the current supervisor never block behind a reconnect, and at
//! most one reconnect is in flight: concurrent callers that observe a
//! closed connection all come back with the same fresh supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::SystemdError;
use crate::supervisor::{ExecConfig, SupervisorConfig, SystemdSupervisor};

/// The slice of supervisor behaviour callers depend on, so tests and the
/// resilient runner itself can stand in for a live connection.
#[async_trait]
pub trait UnitRunner: Send + Sync {
    async fn start_service(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError>;

    async fn run_oneshot(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError>;

    fn is_connection_closed(&self) -> bool;

    async fn teardown(&self);
}

#[async_trait]
impl UnitRunner for SystemdSupervisor {
    async fn start_service(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        SystemdSupervisor::start_service(self, cancel, config).await
    }

    async fn run_oneshot(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        SystemdSupervisor::run_oneshot(self, cancel, config).await
    }

    fn is_connection_closed(&self) -> bool {
        SystemdSupervisor::is_connection_closed(self)
    }

    async fn teardown(&self) {
        SystemdSupervisor::teardown(self).await;
    }
}

/// Builds a replacement supervisor after a connection loss.
pub type SupervisorFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn UnitRunner>, SystemdError>> + Send + Sync>;

/// Façade holding the current supervisor behind a lock-free-read reference.
///
/// The read lock is held only to clone the `Arc`; the async mutex guards
/// the replace path alone. The factory call is the one piece of I/O that
/// runs under a lock (the replace mutex), keeping reconnects down to one
/// in flight.
pub struct SystemdRunner {
    current: RwLock<Arc<dyn UnitRunner>>,
    replace: tokio::sync::Mutex<()>,
    factory: SupervisorFactory,
}

impl SystemdRunner {
    /// Build the initial supervisor through `factory` and keep the factory
    /// for reconnects.
    pub async fn new(factory: SupervisorFactory) -> Result<Self, SystemdError> {
        let initial = factory().await?;
        Ok(Self { current: RwLock::new(initial), replace: tokio::sync::Mutex::new(()), factory })
    }

    /// Runner over real systemd supervisors with the given settings.
    pub async fn connect(config: SupervisorConfig) -> Result<Self, SystemdError> {
        let factory: SupervisorFactory = Arc::new(move || {
            let config = config.clone();
            Box::pin(async move {
                let supervisor = SystemdSupervisor::new(config).await?;
                Ok(supervisor as Arc<dyn UnitRunner>)
            })
        });
        Self::new(factory).await
    }

    /// Double-checked replacement of a closed supervisor.
    async fn ensure_connection_open(&self) -> Result<Arc<dyn UnitRunner>, SystemdError> {
        let current = self.current.read().clone();
        if !current.is_connection_closed() {
            return Ok(current);
        }

        let _guard = self.replace.lock().await;
        let current = self.current.read().clone();
        if !current.is_connection_closed() {
            // another caller already reconnected
            return Ok(current);
        }

        info!("systemd connection closed, rebuilding supervisor");
        current.teardown().await;
        let fresh = (self.factory)().await?;
        *self.current.write() = fresh.clone();
        Ok(fresh)
    }
}

#[async_trait]
impl UnitRunner for SystemdRunner {
    async fn start_service(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        let supervisor = self.ensure_connection_open().await?;
        supervisor.start_service(cancel, config).await
    }

    async fn run_oneshot(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        let supervisor = self.ensure_connection_open().await?;
        supervisor.run_oneshot(cancel, config).await
    }

    fn is_connection_closed(&self) -> bool {
        self.current.read().is_connection_closed()
    }

    async fn teardown(&self) {
        let current = self.current.read().clone();
        current.teardown().await;
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
