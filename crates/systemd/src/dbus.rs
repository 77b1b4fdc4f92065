// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Low-level client for the systemd manager on its private socket.
//!
//! The private socket speaks peer-to-peer D-Bus (no broker, no Hello), so
//! signals arrive on the connection's message stream directly once
//! `Subscribe` has been called. Every instance tracks whether the peer has
//! closed the socket; once `is_closed` flips, higher layers replace the
//! whole instance rather than retrying on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use zbus::zvariant::{OwnedObjectPath, Type, Value};
use zbus::{proxy, Connection, MessageStream};

use crate::error::SystemdError;

/// systemd's private manager socket, reachable as uid 0.
pub const DEFAULT_ADDRESS: &str = "unix:path=/run/systemd/private";

/// Job mode for stop requests: fail rather than queue behind conflicts.
const STOP_MODE: &str = "fail";
/// Job mode for transient unit creation.
const START_MODE: &str = "replace";

/// One row of the manager's `ListUnits` reply.
#[derive(Debug, Clone, Deserialize, Type)]
pub struct ListedUnit {
    pub name: String,
    pub description: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub followed: String,
    pub path: OwnedObjectPath,
    pub job_id: u32,
    pub job_type: String,
    pub job_path: OwnedObjectPath,
}

#[proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1",
    gen_blocking = false
)]
trait Manager {
    fn list_units(&self) -> zbus::Result<Vec<ListedUnit>>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        properties: &[(&str, Value<'_>)],
        aux: &[(&str, Vec<(&str, Value<'_>)>)],
    ) -> zbus::Result<OwnedObjectPath>;

    fn subscribe(&self) -> zbus::Result<()>;
}

/// Handle to one authenticated manager connection.
#[derive(Clone)]
pub struct SystemdDbus {
    conn: Connection,
    manager: ManagerProxy<'static>,
    closed: Arc<AtomicBool>,
}

impl SystemdDbus {
    /// Dial `address`, cache the manager proxy and enable signal delivery.
    pub async fn connect(address: &str) -> Result<Self, SystemdError> {
        let conn = zbus::connection::Builder::address(address)
            .map_err(SystemdError::Connect)?
            .p2p()
            .build()
            .await
            .map_err(SystemdError::Connect)?;
        let manager = ManagerProxy::new(&conn).await.map_err(SystemdError::Connect)?;
        manager.subscribe().await.map_err(SystemdError::Connect)?;
        Ok(Self { conn, manager, closed: Arc::new(AtomicBool::new(false)) })
    }

    /// Stream of raw messages (signals included) from the peer.
    pub fn signals(&self) -> MessageStream {
        MessageStream::from(&self.conn)
    }

    pub async fn list_units(&self) -> Result<Vec<ListedUnit>, SystemdError> {
        self.check(self.manager.list_units().await)
    }

    pub async fn stop_unit(&self, name: &str) -> Result<OwnedObjectPath, SystemdError> {
        self.check(self.manager.stop_unit(name, STOP_MODE).await)
    }

    /// Request a transient unit; `properties` is the ordered name/value list
    /// the manager applies verbatim. Returns the job path.
    pub async fn start_transient_unit(
        &self,
        name: &str,
        properties: &[(&str, Value<'_>)],
    ) -> Result<OwnedObjectPath, SystemdError> {
        let aux: &[(&str, Vec<(&str, Value<'_>)>)] = &[];
        self.check(self.manager.start_transient_unit(name, START_MODE, properties, aux).await)
    }

    /// Flag the connection closed (used by the dispatcher when the signal
    /// stream ends).
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.mark_closed();
        self.conn.clone().graceful_shutdown().await;
    }

    /// Record a peer-closed socket before handing the error up.
    fn check<T>(&self, result: zbus::Result<T>) -> Result<T, SystemdError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if is_disconnect(&err) {
                    debug!(error = %err, "systemd connection lost");
                    self.mark_closed();
                }
                Err(SystemdError::Call(err))
            }
        }
    }
}

fn is_disconnect(err: &zbus::Error) -> bool {
    matches!(err, zbus::Error::InputOutput(_))
}
