//! Common test utilities: scripted in-memory workers.
//!
//! The scripted launcher satisfies the manager's `WorkerLauncher` seam
//! without real processes, so the full dispatch/retry/restart machinery
//! can be exercised deterministically. Clone the `assigned`/`spawned`
//! handles out of the launcher before handing it to the manager.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use taskforge_core::{ManagerMessage, TaskId, WorkerId, WorkerReply};
use taskforge_manager::error::ManagerError;
use taskforge_manager::{ManagerConfig, WorkerChannels, WorkerEvent, WorkerLauncher};

/// What a scripted worker does with every task it receives.
#[derive(Clone)]
pub enum Script {
    /// Sleep, then reply `task_complete` with `{"ok": true}`.
    Complete { delay: Duration },
    /// Sleep, then reply `task_error`.
    Fail { delay: Duration, error: String },
    /// Exit immediately when the first task arrives (simulated crash).
    CrashOnTask,
    /// Never answer health probes and sit on tasks forever.
    Unresponsive,
}

pub struct ScriptedLauncher {
    /// One script per spawn, consumed in order; later spawns fall back
    /// to the default.
    scripts: Mutex<VecDeque<Script>>,
    default_script: Script,
    /// Order in which tasks reached workers, fleet-wide.
    pub assigned: Arc<Mutex<Vec<TaskId>>>,
    /// Number of spawns (initial pool + restarts + scale-ups).
    pub spawned: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new(default_script: Script) -> Self {
        Self::with_scripts(default_script, Vec::new())
    }

    pub fn with_scripts(default_script: Script, scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            default_script,
            assigned: Arc::new(Mutex::new(Vec::new())),
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn spawn(
        &self,
        id: WorkerId,
        events: mpsc::Sender<(WorkerId, WorkerEvent)>,
    ) -> Result<WorkerChannels, ManagerError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone());
        let (tx, rx) = mpsc::channel(32);
        let kill = CancellationToken::new();
        self.spawned.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(run_scripted_worker(
            id,
            script,
            events,
            rx,
            kill.clone(),
            self.assigned.clone(),
        ));
        Ok(WorkerChannels { tx, kill })
    }
}

async fn run_scripted_worker(
    id: WorkerId,
    script: Script,
    events: mpsc::Sender<(WorkerId, WorkerEvent)>,
    mut rx: mpsc::Receiver<ManagerMessage>,
    kill: CancellationToken,
    assigned: Arc<Mutex<Vec<TaskId>>>,
) {
    loop {
        tokio::select! {
            _ = kill.cancelled() => {
                let _ = events.send((id, WorkerEvent::Exited { code: Some(137) })).await;
                return;
            }
            msg = rx.recv() => match msg {
                None => {
                    let _ = events.send((id, WorkerEvent::Exited { code: Some(0) })).await;
                    return;
                }
                Some(ManagerMessage::HealthCheck) => {
                    if !matches!(script, Script::Unresponsive) {
                        let _ = events
                            .send((id, WorkerEvent::Reply(WorkerReply::HealthCheckResponse)))
                            .await;
                    }
                }
                Some(ManagerMessage::Shutdown) => {
                    let _ = events.send((id, WorkerEvent::Exited { code: Some(0) })).await;
                    return;
                }
                Some(ManagerMessage::Task { task_id, .. }) => {
                    assigned.lock().unwrap().push(task_id);
                    match &script {
                        Script::Complete { delay } => {
                            tokio::time::sleep(*delay).await;
                            let reply = WorkerReply::TaskComplete {
                                task_id,
                                result: json!({"ok": true}),
                            };
                            let _ = events.send((id, WorkerEvent::Reply(reply))).await;
                        }
                        Script::Fail { delay, error } => {
                            tokio::time::sleep(*delay).await;
                            let reply = WorkerReply::TaskError {
                                task_id,
                                error: error.clone(),
                            };
                            let _ = events.send((id, WorkerEvent::Reply(reply))).await;
                        }
                        Script::CrashOnTask => {
                            let _ = events.send((id, WorkerEvent::Exited { code: Some(1) })).await;
                            return;
                        }
                        Script::Unresponsive => {}
                    }
                }
            }
        }
    }
}

/// Manager config tuned for fast tests: tiny debounce and backoffs,
/// sweep every 20ms, health checks and autoscaling parked out of the
/// way unless a test opts in.
pub fn test_config(dir: &tempfile::TempDir) -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.state_path = dir.path().join("state.json");
    config.persist_debounce = Duration::from_millis(10);
    config.pool.pool_size = 1;
    config.pool.min_workers = 1;
    config.pool.max_workers = 8;
    config.pool.restart_backoff_base = Duration::from_millis(20);
    config.pool.restart_backoff_cap = Duration::from_millis(100);
    config.pool.shutdown_timeout = Duration::from_secs(2);
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.sweep_interval = Duration::from_millis(20);
    config.health_check_interval = Duration::from_secs(60);
    config.autoscale_interval = Duration::from_secs(60);
    config
}
