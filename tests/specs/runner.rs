// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection-loss recovery through the resilient runner.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use s3cd_systemd::{ExecConfig, SupervisorFactory, SystemdError, SystemdRunner, UnitRunner};

struct ClosableSupervisor {
    id: usize,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl UnitRunner for ClosableSupervisor {
    async fn start_service(
        &self,
        _cancel: &CancellationToken,
        _config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        Ok(format!("supervisor-{}", self.id))
    }

    async fn run_oneshot(
        &self,
        _cancel: &CancellationToken,
        _config: &ExecConfig,
    ) -> Result<String, SystemdError> {
        Ok(format!("supervisor-{}", self.id))
    }

    fn is_connection_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn config() -> ExecConfig {
    ExecConfig {
        name: "mount-s3-spec.service".to_string(),
        description: "spec".to_string(),
        exec_path: "/usr/bin/mount-s3".into(),
        args: vec![],
        env: vec![],
    }
}

#[tokio::test]
async fn connection_loss_is_recovered_once() {
    let builds = Arc::new(AtomicUsize::new(0));
    let made: Arc<Mutex<Vec<Arc<ClosableSupervisor>>>> = Arc::new(Mutex::new(Vec::new()));

    let factory: SupervisorFactory = {
        let builds = builds.clone();
        let made = made.clone();
        Arc::new(move || {
            let builds = builds.clone();
            let made = made.clone();
            Box::pin(async move {
                let id = builds.fetch_add(1, Ordering::SeqCst);
                let supervisor =
                    Arc::new(ClosableSupervisor { id, closed: AtomicBool::new(false) });
                made.lock().unwrap().push(supervisor.clone());
                Ok(supervisor as Arc<dyn UnitRunner>)
            })
        })
    };

    let runner = Arc::new(SystemdRunner::new(factory).await.unwrap());
    let cancel = CancellationToken::new();

    // first call runs on the initial supervisor
    assert_eq!(runner.start_service(&cancel, &config()).await.unwrap(), "supervisor-0");

    // the peer closes the socket under us
    made.lock().unwrap()[0].closed.store(true, Ordering::SeqCst);

    // the next call observes the closed connection and rebuilds
    assert_eq!(runner.start_service(&cancel, &config()).await.unwrap(), "supervisor-1");
    assert_eq!(builds.load(Ordering::SeqCst), 2);

    // concurrent callers all land on the same replacement
    let mut handles = Vec::new();
    for _ in 0..4 {
        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            runner.start_service(&cancel, &config()).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), "supervisor-1");
    }
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}
