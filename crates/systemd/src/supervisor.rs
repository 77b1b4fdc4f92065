// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateful owner of one systemd connection.
//!
//! A single dispatcher task consumes the signal stream and keeps two maps
//! consistent: unit name → watcher channels, and unit object path → unit
//! name (`PropertiesChanged` signals only carry the path). Watchers receive
//! small [`UnitProperties`] deltas; a closed channel means the unit was
//! removed or the supervisor tore down.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Type, Value};
use zbus::MessageStream;

use crate::dbus::{ListedUnit, SystemdDbus, DEFAULT_ADDRESS};
use crate::error::SystemdError;
use crate::pty;

/// Connection settings for a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub address: String,
    pub ptmx_path: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            ptmx_path: PathBuf::from(pty::DEFAULT_PTMX_PATH),
        }
    }
}

/// What to run as a transient unit.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Full unit name, usually from [`transient_unit_name`].
    pub name: String,
    pub description: String,
    pub exec_path: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    Forking,
    Oneshot,
}

impl UnitType {
    fn as_str(&self) -> &'static str {
        match self {
            UnitType::Forking => "forking",
            UnitType::Oneshot => "oneshot",
        }
    }
}

/// The three well-known keys watchers care about; keys missing from a
/// `PropertiesChanged` payload stay at their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitProperties {
    pub active_state: String,
    pub exec_main_code: i32,
    pub exec_main_status: i32,
}

/// Verdict of a readiness predicate over one properties delta.
enum UnitOutcome {
    Pending,
    Ready,
    Failed(String),
}

enum WaitOutcome {
    Ready,
    Failed(String),
    Removed,
    Cancelled,
}

/// Fresh `<basename>-<uuid>.service` name for one invocation.
pub fn transient_unit_name(basename: &str) -> String {
    format!("{}-{}.service", basename, Uuid::new_v4())
}

type WatcherSender = mpsc::UnboundedSender<UnitProperties>;

#[derive(Default)]
struct WatcherState {
    next_id: u64,
    watchers: HashMap<String, Vec<(u64, WatcherSender)>>,
    unit_paths: HashMap<String, String>,
}

impl WatcherState {
    fn add(&mut self, name: &str) -> (u64, mpsc::UnboundedReceiver<UnitProperties>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.entry(name.to_string()).or_default().push((id, tx));
        (id, rx)
    }

    fn remove(&mut self, name: &str, id: u64) {
        if let Some(list) = self.watchers.get_mut(name) {
            list.retain(|(watcher_id, _)| *watcher_id != id);
            if list.is_empty() {
                self.watchers.remove(name);
            }
        }
    }

    fn unit_new(&mut self, name: String, path: String) {
        self.unit_paths.insert(path, name);
    }

    fn unit_removed(&mut self, name: &str, path: &str) {
        self.unit_paths.remove(path);
        // Dropping the senders closes every watcher channel for the unit.
        self.watchers.remove(name);
    }

    fn properties_changed(&mut self, path: &str, props: &UnitProperties) {
        let Some(name) = self.unit_paths.get(path) else { return };
        if let Some(list) = self.watchers.get(name) {
            for (_, tx) in list {
                let _ = tx.send(props.clone());
            }
        }
    }

    fn close_all(&mut self) {
        self.watchers.clear();
        self.unit_paths.clear();
    }
}

/// Owner of one manager connection plus the per-unit watcher plumbing.
pub struct SystemdSupervisor {
    dbus: SystemdDbus,
    state: Arc<Mutex<WatcherState>>,
    shutdown: CancellationToken,
    ptmx_path: PathBuf,
}

impl SystemdSupervisor {
    pub async fn new(config: SupervisorConfig) -> Result<Arc<Self>, SystemdError> {
        let dbus = SystemdDbus::connect(&config.address).await?;
        let state = Arc::new(Mutex::new(WatcherState::default()));
        let shutdown = CancellationToken::new();

        let stream = dbus.signals();
        tokio::spawn(dispatch(stream, state.clone(), dbus.clone(), shutdown.clone()));

        Ok(Arc::new(Self { dbus, state, shutdown, ptmx_path: config.ptmx_path }))
    }

    /// Start a forking service and wait until it reports `active`.
    ///
    /// Returns the drained PTY output; errors carry it too.
    pub async fn start_service(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        self.run_unit(cancel, config, UnitType::Forking, service_ready).await
    }

    /// Run a oneshot to completion; the unit is stopped afterwards so
    /// `RemainAfterExit` does not leak it.
    pub async fn run_oneshot(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        let result = self.run_unit(cancel, config, UnitType::Oneshot, oneshot_done).await;
        if let Err(err) = self.dbus.stop_unit(&config.name).await {
            debug!(unit = %config.name, error = %err, "stop after oneshot failed");
        }
        result
    }

    pub async fn list_units(&self) -> Result<Vec<ListedUnit>, SystemdError> {
        self.dbus.list_units().await
    }

    pub async fn stop_unit(&self, name: &str) -> Result<(), SystemdError> {
        self.dbus.stop_unit(name).await.map(|_| ())
    }

    pub fn is_connection_closed(&self) -> bool {
        self.dbus.is_closed()
    }

    /// Close every watcher channel, then the connection. Any parked
    /// `run_unit` observes its channel closing and fails rather than
    /// hanging.
    pub async fn teardown(&self) {
        self.shutdown.cancel();
        self.state.lock().close_all();
        self.dbus.close().await;
    }

    async fn run_unit<F>(
        &self,
        cancel: &CancellationToken,
        config: &ExecConfig,
        unit_type: UnitType,
        done: F,
    ) -> Result<String, SystemdError>
    where
        F: Fn(&UnitProperties) -> UnitOutcome,
    {
        let (master, pts) = pty::new_pts(&self.ptmx_path)?;
        let tty_path = format!("/dev/pts/{}", pts);
        let props = unit_properties(config, unit_type, &tty_path);

        // Watcher registration must precede the start call; a unit can go
        // active before StartTransientUnit returns and that edge would be
        // lost.
        let (watcher_id, mut rx) = self.state.lock().add(&config.name);

        debug!(unit = %config.name, tty = %tty_path, "starting transient unit");
        if let Err(err) = self.dbus.start_transient_unit(&config.name, &props).await {
            self.state.lock().remove(&config.name, watcher_id);
            return Err(err);
        }

        let waited = await_unit(&mut rx, cancel, done).await;
        self.state.lock().remove(&config.name, watcher_id);
        let output = pty::drain(&master);

        match waited {
            WaitOutcome::Ready => Ok(output),
            WaitOutcome::Failed(detail) => {
                Err(SystemdError::UnitFailed { unit: config.name.clone(), detail, output })
            }
            WaitOutcome::Removed => Err(SystemdError::UnitFailed {
                unit: config.name.clone(),
                detail: "failed to start".to_string(),
                output,
            }),
            WaitOutcome::Cancelled => {
                Err(SystemdError::Cancelled { unit: config.name.clone(), output })
            }
        }
    }
}

/// Wait for the predicate to settle, the watcher channel to close (unit
/// removed / supervisor teardown), or cancellation.
async fn await_unit<F>(
    rx: &mut mpsc::UnboundedReceiver<UnitProperties>,
    cancel: &CancellationToken,
    done: F,
) -> WaitOutcome
where
    F: Fn(&UnitProperties) -> UnitOutcome,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            update = rx.recv() => match update {
                None => return WaitOutcome::Removed,
                Some(props) => match done(&props) {
                    UnitOutcome::Pending => continue,
                    UnitOutcome::Ready => return WaitOutcome::Ready,
                    UnitOutcome::Failed(detail) => return WaitOutcome::Failed(detail),
                },
            },
        }
    }
}

fn service_ready(props: &UnitProperties) -> UnitOutcome {
    if props.active_state == "active" {
        UnitOutcome::Ready
    } else {
        UnitOutcome::Pending
    }
}

fn oneshot_done(props: &UnitProperties) -> UnitOutcome {
    if props.exec_main_code == 0 {
        UnitOutcome::Pending
    } else if props.exec_main_status == 0 {
        UnitOutcome::Ready
    } else {
        UnitOutcome::Failed(format!("exited with status {}", props.exec_main_status))
    }
}

/// ExecStart entry: binary, full argv (argv[0] included), and whether an
/// unclean exit marks the unit failed.
#[derive(Debug, Clone, Serialize, Deserialize, Type, Value)]
struct ExecCommand {
    path: String,
    argv: Vec<String>,
    unclean_is_failure: bool,
}

fn unit_properties(
    config: &ExecConfig,
    unit_type: UnitType,
    tty_path: &str,
) -> Vec<(&'static str, Value<'static>)> {
    let path = config.exec_path.to_string_lossy().into_owned();
    let mut argv = Vec::with_capacity(config.args.len() + 1);
    argv.push(path.clone());
    argv.extend(config.args.iter().cloned());
    let exec = ExecCommand { path, argv, unclean_is_failure: true };

    let mut props: Vec<(&'static str, Value<'static>)> = vec![
        ("Description", Value::from(config.description.clone())),
        ("Type", Value::from(unit_type.as_str())),
        ("StandardOutput", Value::from("tty")),
        ("StandardError", Value::from("tty")),
        ("TTYPath", Value::from(tty_path.to_string())),
        ("ExecStart", Value::from(vec![exec])),
    ];
    if !config.env.is_empty() {
        let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        props.push(("Environment", Value::from(env)));
    }
    if unit_type == UnitType::Oneshot {
        props.push(("RemainAfterExit", Value::from(true)));
    }
    props
}

async fn dispatch(
    mut stream: MessageStream,
    state: Arc<Mutex<WatcherState>>,
    dbus: SystemdDbus,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                None => {
                    debug!("systemd signal stream ended, closing watchers");
                    dbus.mark_closed();
                    state.lock().close_all();
                    break;
                }
                Some(Err(err)) => debug!(error = %err, "undecodable d-bus message"),
                Some(Ok(msg)) => handle_signal(&msg, &state),
            },
        }
    }
}

fn handle_signal(msg: &zbus::Message, state: &Mutex<WatcherState>) {
    let header = msg.header();
    if header.message_type() != zbus::message::Type::Signal {
        return;
    }
    let Some(member) = header.member() else { return };

    match member.as_str() {
        "UnitNew" => {
            if let Ok((name, path)) = msg.body().deserialize::<(String, OwnedObjectPath)>() {
                state.lock().unit_new(name, path.to_string());
            }
        }
        "UnitRemoved" => {
            if let Ok((name, path)) = msg.body().deserialize::<(String, OwnedObjectPath)>() {
                state.lock().unit_removed(&name, path.as_str());
            }
        }
        "PropertiesChanged" => {
            let Some(path) = header.path() else { return };
            let path = path.to_string();
            type Changed = (String, HashMap<String, OwnedValue>, Vec<String>);
            if let Ok((_interface, changed, _invalidated)) = msg.body().deserialize::<Changed>() {
                let props = translate_properties(&changed);
                state.lock().properties_changed(&path, &props);
            }
        }
        _ => {}
    }
}

fn translate_properties(changed: &HashMap<String, OwnedValue>) -> UnitProperties {
    let string = |key: &str| {
        changed
            .get(key)
            .and_then(|v| v.downcast_ref::<&str>().ok())
            .map(str::to_owned)
            .unwrap_or_default()
    };
    let int = |key: &str| changed.get(key).and_then(|v| v.downcast_ref::<i32>().ok()).unwrap_or_default();

    UnitProperties {
        active_state: string("ActiveState"),
        exec_main_code: int("ExecMainCode"),
        exec_main_status: int("ExecMainStatus"),
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
