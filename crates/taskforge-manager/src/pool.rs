//! Supervised worker pool.
//!
//! The pool exclusively owns every [`WorkerHandle`]; no other component
//! mutates `available` or `current_task`. Worker transports are behind
//! the [`WorkerLauncher`] seam so tests can drive the manager with
//! scripted in-memory workers instead of real processes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskforge_core::{ManagerMessage, Task, WorkerId, WorkerReply};

use crate::config::PoolConfig;
use crate::error::ManagerError;

/// An event emitted by one worker's transport, tagged with the worker
/// id before it enters the manager's single inbound channel.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A decoded reply from the worker.
    Reply(WorkerReply),
    /// The transport hit a fault (undecodable line, broken pipe).
    Faulted(String),
    /// The worker process exited. Always the final event for a spawn.
    Exited { code: Option<i32> },
}

/// Channels wired to one spawned worker.
pub struct WorkerChannels {
    /// Envelope sender (manager -> worker).
    pub tx: mpsc::Sender<ManagerMessage>,
    /// Cancelling this force-terminates the worker.
    pub kill: CancellationToken,
}

/// Spawns worker transports.
///
/// Implementations forward every event for the worker into `events`
/// tagged with its id, and must emit a final [`WorkerEvent::Exited`]
/// when the worker is gone, including after a kill.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn spawn(
        &self,
        id: WorkerId,
        events: mpsc::Sender<(WorkerId, WorkerEvent)>,
    ) -> Result<WorkerChannels, ManagerError>;
}

/// Supervisory record for one worker.
pub struct WorkerHandle {
    pub id: WorkerId,
    tx: mpsc::Sender<ManagerMessage>,
    kill: CancellationToken,

    /// False iff a task is in flight on this worker.
    pub available: bool,
    pub current_task: Option<Task>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub restart_count: u32,
    pub consecutive_health_failures: u32,

    /// A cooperative shutdown was requested (autoscaler retirement or
    /// manager shutdown); the coming exit is expected and must not
    /// trigger a restart.
    pub draining: bool,

    /// Transport still up. Cleared on exit; a disconnected handle only
    /// lingers while a restart is pending.
    pub connected: bool,

    pub created_at: DateTime<Utc>,
}

impl WorkerHandle {
    fn new(id: WorkerId, channels: WorkerChannels) -> Self {
        Self {
            id,
            tx: channels.tx,
            kill: channels.kill,
            available: true,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            restart_count: 0,
            consecutive_health_failures: 0,
            draining: false,
            connected: true,
            created_at: Utc::now(),
        }
    }

    /// Send without blocking the control loop; a full or closed channel
    /// means the transport is unusable.
    pub fn try_send(&self, msg: ManagerMessage) -> Result<(), ManagerError> {
        self.tx
            .try_send(msg)
            .map_err(|_| ManagerError::SendFailed(self.id.to_string()))
    }

    /// Force-terminate the worker. The transport still reports the
    /// resulting exit as a normal `Exited` event.
    pub fn force_kill(&self) {
        self.kill.cancel();
    }

    /// Mark the worker busy with `task`, upholding the
    /// `available == false <=> current_task.is_some()` invariant.
    pub fn assign(&mut self, task: Task) {
        self.current_task = Some(task);
        self.available = false;
    }

    /// Mark the worker idle again, returning the in-flight task if any.
    pub fn release(&mut self) -> Option<Task> {
        self.available = true;
        self.current_task.take()
    }
}

/// Owns the worker handles and the launcher.
pub struct WorkerPool<L> {
    launcher: L,
    config: PoolConfig,
    events_tx: mpsc::Sender<(WorkerId, WorkerEvent)>,
    workers: HashMap<WorkerId, WorkerHandle>,
    next_id: u32,
}

impl<L: WorkerLauncher> WorkerPool<L> {
    pub fn new(
        launcher: L,
        config: PoolConfig,
        events_tx: mpsc::Sender<(WorkerId, WorkerEvent)>,
    ) -> Self {
        Self {
            launcher,
            config,
            events_tx,
            workers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Spawn a worker in a fresh slot.
    pub async fn spawn_worker(&mut self) -> Result<WorkerId, ManagerError> {
        self.next_id += 1;
        let id = WorkerId::new(self.next_id);
        let channels = self.launcher.spawn(id, self.events_tx.clone()).await?;
        self.workers.insert(id, WorkerHandle::new(id, channels));
        info!(worker_id = %id, "Worker spawned");
        Ok(id)
    }

    /// Respawn an exited worker in its existing slot. The restart count
    /// carries over (and grows); task statistics carry over too, since
    /// the slot represents the same pool member.
    pub async fn respawn(&mut self, id: WorkerId) -> Result<(), ManagerError> {
        let Some(handle) = self.workers.get_mut(&id) else {
            return Err(ManagerError::Spawn(format!("{id} is not in the pool")));
        };
        handle.restart_count += 1;
        let restart_count = handle.restart_count;
        let tasks_completed = handle.tasks_completed;
        let tasks_failed = handle.tasks_failed;

        let channels = self.launcher.spawn(id, self.events_tx.clone()).await?;
        let mut fresh = WorkerHandle::new(id, channels);
        fresh.restart_count = restart_count;
        fresh.tasks_completed = tasks_completed;
        fresh.tasks_failed = tasks_failed;
        self.workers.insert(id, fresh);
        info!(worker_id = %id, restart_count, "Worker respawned");
        Ok(())
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.workers.get(&id)
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerHandle> {
        self.workers.get_mut(&id)
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<WorkerHandle> {
        self.workers.remove(&id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.values()
    }

    pub fn workers_mut(&mut self) -> impl Iterator<Item = &mut WorkerHandle> {
        self.workers.values_mut()
    }

    /// Workers participating in dispatch: connected and not draining.
    pub fn active_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.connected && !w.draining)
            .count()
    }

    pub fn connected_count(&self) -> usize {
        self.workers.values().filter(|w| w.connected).count()
    }

    /// Pick a worker for dispatch. Lowest id first keeps selection
    /// deterministic for tests.
    pub fn available_worker(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.connected && w.available && !w.draining)
            .map(|w| w.id)
            .min()
    }

    /// Pick a worker the autoscaler may retire: idle, connected, and
    /// not already draining. Never returns a worker with an in-flight
    /// task.
    pub fn idle_worker(&self) -> Option<WorkerId> {
        self.available_worker()
    }

    /// Restart delay for a worker that has already restarted
    /// `restart_count` times: base doubled per restart, capped.
    pub fn restart_backoff(&self, restart_count: u32) -> Duration {
        let base_ms = self.config.restart_backoff_base.as_millis() as u64;
        let exponent = restart_count.min(20);
        Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
            .min(self.config.restart_backoff_cap)
    }

    pub fn max_restarts(&self) -> u32 {
        self.config.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullLauncher;

    #[async_trait]
    impl WorkerLauncher for NullLauncher {
        async fn spawn(
            &self,
            _id: WorkerId,
            _events: mpsc::Sender<(WorkerId, WorkerEvent)>,
        ) -> Result<WorkerChannels, ManagerError> {
            let (tx, _rx) = mpsc::channel(1);
            Ok(WorkerChannels {
                tx,
                kill: CancellationToken::new(),
            })
        }
    }

    fn pool() -> (
        WorkerPool<NullLauncher>,
        mpsc::Receiver<(WorkerId, WorkerEvent)>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(16);
        (
            WorkerPool::new(NullLauncher, PoolConfig::default(), events_tx),
            events_rx,
        )
    }

    #[tokio::test]
    async fn test_spawn_assigns_fresh_ids() {
        let (mut pool, _events) = pool();
        let a = pool.spawn_worker().await.unwrap();
        let b = pool.spawn_worker().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.active_count(), 2);
    }

    #[tokio::test]
    async fn test_assign_release_upholds_invariant() {
        let (mut pool, _events) = pool();
        let id = pool.spawn_worker().await.unwrap();
        let handle = pool.get_mut(id).unwrap();

        let task = Task::new(taskforge_core::TaskId::new(1), "{}", Default::default());
        handle.assign(task);
        assert!(!handle.available);
        assert!(handle.current_task.is_some());

        let returned = handle.release().unwrap();
        assert_eq!(returned.id.value(), 1);
        assert!(handle.available);
        assert!(handle.current_task.is_none());
    }

    #[tokio::test]
    async fn test_busy_or_draining_workers_are_not_dispatch_candidates() {
        let (mut pool, _events) = pool();
        let a = pool.spawn_worker().await.unwrap();
        let b = pool.spawn_worker().await.unwrap();

        pool.get_mut(a).unwrap().assign(Task::new(
            taskforge_core::TaskId::new(1),
            "{}",
            Default::default(),
        ));
        assert_eq!(pool.available_worker(), Some(b));

        pool.get_mut(b).unwrap().draining = true;
        assert_eq!(pool.available_worker(), None);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_respawn_accumulates_restart_count() {
        let (mut pool, _events) = pool();
        let id = pool.spawn_worker().await.unwrap();
        pool.get_mut(id).unwrap().connected = false;

        pool.respawn(id).await.unwrap();
        pool.respawn(id).await.unwrap();

        let handle = pool.get(id).unwrap();
        assert_eq!(handle.restart_count, 2);
        assert!(handle.connected);
        assert!(handle.available);
    }

    #[tokio::test]
    async fn test_restart_backoff_doubles_and_caps() {
        let (pool, _events) = pool();
        // defaults: base 1s, cap 30s
        assert_eq!(pool.restart_backoff(0), Duration::from_secs(1));
        assert_eq!(pool.restart_backoff(1), Duration::from_secs(2));
        assert_eq!(pool.restart_backoff(4), Duration::from_secs(16));
        assert_eq!(pool.restart_backoff(5), Duration::from_secs(30));
        assert_eq!(pool.restart_backoff(30), Duration::from_secs(30));
    }
}
