//! The queue manager: dispatcher, retry routing, and the control loop.
//!
//! All manager state is owned by one [`QueueManager`] instance driven
//! by a single `select!` loop; the only suspension points are worker
//! events, API commands, durable-store writes, and the sweep, health,
//! and autoscale timers. Task execution never happens here - it lives
//! entirely inside the isolated worker processes.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use taskforge_core::{
    DeadLetter, ManagerMessage, Priority, QueueState, Task, TaskId, WorkerId, WorkerReply,
    STATE_VERSION,
};

use crate::autoscaler::{Autoscaler, ScaleDecision};
use crate::cache::{payload_key, ResultCache};
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::health::HealthMonitor;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::pool::{WorkerEvent, WorkerLauncher, WorkerPool};
use crate::queue::PriorityQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{self, StoreHandle};

/// Terminal outcome of a submitted task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// A worker (or the result cache) produced a result.
    Completed(Value),
    /// Retry budget exhausted; the last error is preserved.
    DeadLettered(String),
    /// The manager shut down before the task finished.
    Rejected(String),
}

/// Receipt for a submitted task. The task has been durably enqueued by
/// the time the receipt is returned.
pub struct Submission {
    pub task_id: TaskId,
    /// Resolves when the task reaches a terminal state. Dropping the
    /// receiver is fine; tasks recovered from disk have no waiter.
    pub outcome: oneshot::Receiver<TaskOutcome>,
}

/// Per-worker statistics exposed by [`ManagerHandle::snapshot`].
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: WorkerId,
    pub available: bool,
    pub connected: bool,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub restart_count: u32,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone)]
pub struct ManagerSnapshot {
    pub pending: usize,
    pub scheduled: usize,
    pub dead_letter: usize,
    pub active_workers: usize,
    pub tasks_in_flight: usize,
    pub metrics: MetricsSnapshot,
    pub workers: Vec<WorkerStats>,
}

enum Command {
    Submit {
        payload: String,
        priority: Priority,
        scheduled_for: Option<chrono::DateTime<Utc>>,
        reply: oneshot::Sender<Result<Submission, ManagerError>>,
    },
    Snapshot {
        reply: oneshot::Sender<ManagerSnapshot>,
    },
    DeadLetters {
        reply: oneshot::Sender<Vec<DeadLetter>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable API handle to a running manager.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<Command>,
}

impl ManagerHandle {
    /// Submit a task for immediate dispatch. Resolves once the enqueue
    /// has been handed to the durable store and the covering write
    /// completed.
    pub async fn submit(
        &self,
        payload: impl Into<String>,
        priority: Priority,
    ) -> Result<Submission, ManagerError> {
        self.submit_at(payload, priority, None).await
    }

    /// Submit a task, optionally deferred until `scheduled_for`.
    pub async fn submit_at(
        &self,
        payload: impl Into<String>,
        priority: Priority,
        scheduled_for: Option<chrono::DateTime<Utc>>,
    ) -> Result<Submission, ManagerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Submit {
                payload: payload.into(),
                priority,
                scheduled_for,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ManagerError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ManagerError::ShuttingDown)?
    }

    pub async fn snapshot(&self) -> Result<ManagerSnapshot, ManagerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| ManagerError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ManagerError::ShuttingDown)
    }

    /// The dead-letter list, for manual inspection.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, ManagerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::DeadLetters { reply: reply_tx })
            .await
            .map_err(|_| ManagerError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ManagerError::ShuttingDown)
    }

    /// Graceful shutdown: cooperative signal, bounded wait, force-kill
    /// stragglers, reject unfinished tasks, final state flush.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| ManagerError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ManagerError::ShuttingDown)
    }
}

/// Owns every piece of manager state. See module docs.
pub struct QueueManager<L: WorkerLauncher> {
    config: ManagerConfig,
    queue: PriorityQueue,
    scheduled: Vec<Task>,
    dead_letter: Vec<DeadLetter>,
    task_counter: u64,
    pool: WorkerPool<L>,
    cache: ResultCache,
    metrics: MetricsCollector,
    retry: RetryPolicy,
    health: HealthMonitor,
    autoscaler: Autoscaler,
    store: StoreHandle,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<(WorkerId, WorkerEvent)>,
    waiters: HashMap<TaskId, oneshot::Sender<TaskOutcome>>,
    started: HashMap<TaskId, Instant>,
    restarts_due: Vec<(Instant, WorkerId)>,
    shutting_down: bool,
}

impl<L: WorkerLauncher> QueueManager<L> {
    /// Load durable state, spawn the initial pool, and run the control
    /// loop. The store is loaded before any worker is spawned or any
    /// task dispatched.
    pub async fn start(
        config: ManagerConfig,
        launcher: L,
    ) -> Result<(ManagerHandle, JoinHandle<()>), ManagerError> {
        config.validate()?;

        let state = store::load(&config.state_path)?;
        info!(
            pending = state.pending.len(),
            scheduled = state.scheduled.len(),
            dead_letter = state.dead_letter.len(),
            task_counter = state.task_counter,
            "Queue state loaded"
        );

        let (store_handle, _writer) =
            store::spawn_writer(config.state_path.clone(), config.persist_debounce);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);

        let mut pool = WorkerPool::new(launcher, config.pool.clone(), events_tx);
        for _ in 0..config.pool.pool_size {
            pool.spawn_worker().await?;
        }

        let mut queue = PriorityQueue::new();
        for task in state.pending {
            queue.enqueue(task);
        }

        let mut manager = QueueManager {
            queue,
            scheduled: state.scheduled,
            dead_letter: state.dead_letter,
            task_counter: state.task_counter,
            pool,
            cache: ResultCache::new(config.cache_ttl),
            metrics: MetricsCollector::new(),
            retry: RetryPolicy::new(config.retry.clone()),
            health: HealthMonitor::new(config.health_check_timeout),
            autoscaler: Autoscaler::new(
                config.scale_up_load,
                config.scale_down_load,
                config.pool.min_workers,
                config.pool.max_workers,
            ),
            store: store_handle,
            commands: command_rx,
            events: events_rx,
            waiters: HashMap::new(),
            started: HashMap::new(),
            restarts_due: Vec::new(),
            shutting_down: false,
            config,
        };

        let join = tokio::spawn(async move {
            manager.process_ready();
            manager.run().await;
        });

        Ok((ManagerHandle { tx: command_tx }, join))
    }

    async fn run(mut self) {
        let now = Instant::now();
        let mut sweep = tokio::time::interval_at(
            now + self.config.sweep_interval,
            self.config.sweep_interval,
        );
        let mut health = tokio::time::interval_at(
            now + self.config.health_check_interval,
            self.config.health_check_interval,
        );
        let mut scale = tokio::time::interval_at(
            now + self.config.autoscale_interval,
            self.config.autoscale_interval,
        );

        loop {
            let next_restart = self.restarts_due.iter().map(|(at, _)| *at).min();
            tokio::select! {
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Some((worker_id, event)) = self.events.recv() => {
                    self.handle_worker_event(worker_id, event).await;
                }
                _ = sweep.tick() => self.sweep_scheduled(),
                _ = health.tick() => self.health_tick(),
                _ = scale.tick() => self.autoscale_tick().await,
                _ = tokio::time::sleep_until(
                    next_restart.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
                ), if next_restart.is_some() => {
                    self.restart_due_workers().await;
                }
            }
            if self.shutting_down {
                break;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                payload,
                priority,
                scheduled_for,
                reply,
            } => self.submit(payload, priority, scheduled_for, reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.build_snapshot());
            }
            Command::DeadLetters { reply } => {
                let _ = reply.send(self.dead_letter.clone());
            }
            Command::Shutdown { reply } => {
                self.run_shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn submit(
        &mut self,
        payload: String,
        priority: Priority,
        scheduled_for: Option<chrono::DateTime<Utc>>,
        reply: oneshot::Sender<Result<Submission, ManagerError>>,
    ) {
        self.task_counter += 1;
        let task_id = TaskId::new(self.task_counter);
        let mut task = Task::new(task_id, payload, priority);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.waiters.insert(task_id, outcome_tx);
        self.metrics.incr_submitted();

        let now = Utc::now();
        match scheduled_for {
            Some(at) if at > now => {
                task.scheduled_for = Some(at);
                debug!(task_id = %task_id, scheduled_for = %at, "Task deferred");
                self.scheduled.push(task);
            }
            _ => {
                info!(task_id = %task_id, priority = %priority, "Task submitted");
                self.queue.enqueue(task);
            }
        }

        // the receipt resolves once the covering durable write lands
        let ack = self.store.save_acked(self.snapshot_state());
        tokio::spawn(async move {
            if let Ok(Err(e)) = ack.await {
                warn!(
                    task_id = %task_id,
                    error = %e,
                    "Enqueue persist failed; task accepted from memory only"
                );
            }
            let _ = reply.send(Ok(Submission {
                task_id,
                outcome: outcome_rx,
            }));
        });

        self.process_ready();
    }

    /// Match ready tasks to available workers, consulting the result
    /// cache first. Within a tier, dispatch follows submission order;
    /// across tiers, high strictly precedes normal and low.
    fn process_ready(&mut self) {
        if self.shutting_down {
            return;
        }
        let mut changed = false;
        loop {
            let Some(task) = self.queue.dequeue() else {
                break;
            };

            let key = payload_key(&task.payload);
            if let Some(result) = self.cache.get(&key) {
                // a cache hit completes the task without a worker slot
                self.metrics.incr_cache_hits();
                self.metrics.incr_completed();
                info!(task_id = %task.id, "Task served from result cache");
                if let Some(waiter) = self.waiters.remove(&task.id) {
                    let _ = waiter.send(TaskOutcome::Completed(result));
                }
                changed = true;
                continue;
            }

            let Some(worker_id) = self.pool.available_worker() else {
                self.queue.requeue_front(task);
                break;
            };
            let task_id = task.id;
            let payload = task.payload.clone();
            let Some(handle) = self.pool.get_mut(worker_id) else {
                self.queue.requeue_front(task);
                break;
            };
            handle.assign(task);
            match handle.try_send(ManagerMessage::Task { task_id, payload }) {
                Ok(()) => {
                    self.started.insert(task_id, Instant::now());
                    debug!(task_id = %task_id, worker_id = %worker_id, "Task dispatched");
                    changed = true;
                }
                Err(_) => {
                    warn!(worker_id = %worker_id, "Worker channel unusable; rolling back dispatch");
                    if let Some(task) = handle.release() {
                        self.queue.requeue_front(task);
                    }
                    handle.connected = false;
                    // the transport's exit event drives the restart
                }
            }
        }
        if changed {
            self.persist();
        }
    }

    async fn handle_worker_event(&mut self, worker_id: WorkerId, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply(WorkerReply::TaskComplete { task_id, result }) => {
                self.on_task_complete(worker_id, task_id, result);
            }
            WorkerEvent::Reply(WorkerReply::TaskError { task_id, error }) => {
                self.on_task_error(worker_id, task_id, error);
            }
            WorkerEvent::Reply(WorkerReply::HealthCheckResponse) => {
                self.on_health_response(worker_id);
            }
            WorkerEvent::Faulted(reason) => {
                warn!(worker_id = %worker_id, reason = %reason, "Worker transport fault");
            }
            WorkerEvent::Exited { code } => self.on_worker_exit(worker_id, code),
        }
    }

    fn on_task_complete(&mut self, worker_id: WorkerId, task_id: TaskId, result: Value) {
        let Some(handle) = self.pool.get_mut(worker_id) else {
            warn!(worker_id = %worker_id, task_id = %task_id, "Completion from unknown worker");
            return;
        };
        let Some(task) = handle.release() else {
            warn!(worker_id = %worker_id, task_id = %task_id, "Completion from idle worker");
            return;
        };
        if task.id != task_id {
            warn!(
                worker_id = %worker_id,
                expected = %task.id,
                reported = %task_id,
                "Completion for a stale task id"
            );
        }
        handle.tasks_completed += 1;

        self.cache.set(payload_key(&task.payload), result.clone());
        if let Some(dispatched_at) = self.started.remove(&task.id) {
            self.metrics.record_duration(dispatched_at.elapsed());
        }
        self.metrics.incr_completed();
        info!(task_id = %task.id, worker_id = %worker_id, "Task completed");
        if let Some(waiter) = self.waiters.remove(&task.id) {
            let _ = waiter.send(TaskOutcome::Completed(result));
        }

        self.persist();
        self.process_ready();
    }

    fn on_task_error(&mut self, worker_id: WorkerId, task_id: TaskId, error: String) {
        let Some(handle) = self.pool.get_mut(worker_id) else {
            warn!(worker_id = %worker_id, task_id = %task_id, "Error report from unknown worker");
            return;
        };
        let Some(mut task) = handle.release() else {
            warn!(worker_id = %worker_id, task_id = %task_id, "Error report from idle worker");
            return;
        };
        handle.tasks_failed += 1;
        self.started.remove(&task.id);
        self.metrics.incr_failed();

        task.retry_count += 1;
        match self.retry.after_failure(task.retry_count) {
            RetryDecision::Retry { delay } => {
                let resume_at =
                    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Task failed; retry scheduled"
                );
                task.scheduled_for = Some(resume_at);
                self.metrics.incr_retried();
                self.scheduled.push(task);
            }
            RetryDecision::GiveUp => {
                warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    error = %error,
                    "Retry budget exhausted; task dead-lettered"
                );
                self.metrics.incr_dead_lettered();
                if let Some(waiter) = self.waiters.remove(&task.id) {
                    let _ = waiter.send(TaskOutcome::DeadLettered(error.clone()));
                }
                self.dead_letter.push(DeadLetter::new(task, error));
            }
        }

        self.persist();
        self.process_ready();
    }

    fn on_health_response(&mut self, worker_id: WorkerId) {
        if !self.health.on_response(worker_id) {
            debug!(worker_id = %worker_id, "Unsolicited health response");
            return;
        }
        if let Some(handle) = self.pool.get_mut(worker_id) {
            handle.consecutive_health_failures = 0;
        }
    }

    /// A worker process exited. A crash is a worker-lifecycle event:
    /// the in-flight task goes straight back to the pending set with
    /// its retry budget untouched.
    fn on_worker_exit(&mut self, worker_id: WorkerId, code: Option<i32>) {
        self.health.forget(worker_id);
        let (released, draining, restart_count) = {
            let Some(handle) = self.pool.get_mut(worker_id) else {
                return;
            };
            handle.connected = false;
            (handle.release(), handle.draining, handle.restart_count)
        };

        if let Some(task) = released {
            warn!(
                worker_id = %worker_id,
                task_id = %task.id,
                exit_code = ?code,
                "Worker exited mid-task; requeueing task"
            );
            self.queue.requeue_front(task);
            self.persist();
        }

        if draining || self.shutting_down {
            info!(worker_id = %worker_id, exit_code = ?code, "Worker retired");
            self.pool.remove(worker_id);
        } else if restart_count < self.pool.max_restarts() {
            let delay = self.pool.restart_backoff(restart_count);
            info!(
                worker_id = %worker_id,
                exit_code = ?code,
                restart_count,
                delay_ms = delay.as_millis() as u64,
                "Worker exited; restart scheduled"
            );
            self.restarts_due.push((Instant::now() + delay, worker_id));
        } else {
            error!(
                worker_id = %worker_id,
                restart_count,
                "worker_failed: restart budget exhausted; abandoning slot"
            );
            self.metrics.incr_workers_failed();
            self.pool.remove(worker_id);
        }

        self.process_ready();
    }

    async fn restart_due_workers(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();
        self.restarts_due.retain(|&(at, worker_id)| {
            if at <= now {
                due.push(worker_id);
                false
            } else {
                true
            }
        });

        for worker_id in due {
            match self.pool.respawn(worker_id).await {
                Ok(()) => {
                    self.metrics.incr_worker_restarts();
                    info!(worker_id = %worker_id, "Worker restarted");
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Worker respawn failed");
                    let Some(handle) = self.pool.get(worker_id) else {
                        continue;
                    };
                    if handle.restart_count < self.pool.max_restarts() {
                        let delay = self.pool.restart_backoff(handle.restart_count);
                        self.restarts_due.push((Instant::now() + delay, worker_id));
                    } else {
                        error!(
                            worker_id = %worker_id,
                            "worker_failed: restart budget exhausted; abandoning slot"
                        );
                        self.metrics.incr_workers_failed();
                        self.pool.remove(worker_id);
                    }
                }
            }
        }
        self.process_ready();
    }

    /// Move due scheduled tasks back into the queue.
    fn sweep_scheduled(&mut self) {
        let now = Utc::now();
        if !self.scheduled.iter().any(|t| t.is_due(now)) {
            return;
        }
        let (due, waiting): (Vec<Task>, Vec<Task>) =
            self.scheduled.drain(..).partition(|t| t.is_due(now));
        self.scheduled = waiting;
        for task in due {
            debug!(task_id = %task.id, "Scheduled task due");
            self.queue.enqueue(task);
        }
        self.persist();
        self.process_ready();
    }

    fn health_tick(&mut self) {
        let connected: Vec<WorkerId> = self
            .pool
            .workers()
            .filter(|w| w.connected)
            .map(|w| w.id)
            .collect();
        let round = self.health.tick(&connected, Instant::now());

        for worker_id in round.timed_out {
            let Some(handle) = self.pool.get_mut(worker_id) else {
                continue;
            };
            handle.consecutive_health_failures += 1;
            warn!(
                worker_id = %worker_id,
                failures = handle.consecutive_health_failures,
                "Health check timed out"
            );
            if handle.consecutive_health_failures >= self.config.health_failure_threshold {
                error!(worker_id = %worker_id, "Worker unresponsive; forcing termination");
                handle.force_kill();
                // the exit event drives requeue and restart
            }
        }

        for worker_id in round.probe {
            let Some(handle) = self.pool.get(worker_id) else {
                continue;
            };
            if handle.try_send(ManagerMessage::HealthCheck).is_err() {
                self.health.forget(worker_id);
            }
        }
    }

    async fn autoscale_tick(&mut self) {
        let pending = self.queue.len();
        let active = self.pool.active_count();
        match self.autoscaler.evaluate(pending, active) {
            ScaleDecision::Grow => match self.pool.spawn_worker().await {
                Ok(worker_id) => {
                    info!(worker_id = %worker_id, pending, active, "Scaling up");
                    self.process_ready();
                }
                Err(e) => warn!(error = %e, "Scale-up spawn failed"),
            },
            ScaleDecision::Shrink => {
                // only ever retire an idle worker
                if let Some(worker_id) = self.pool.idle_worker() {
                    info!(worker_id = %worker_id, pending, active, "Scaling down; retiring idle worker");
                    if let Some(handle) = self.pool.get_mut(worker_id) {
                        handle.draining = true;
                        if handle.try_send(ManagerMessage::Shutdown).is_err() {
                            handle.force_kill();
                        }
                    }
                }
            }
            ScaleDecision::Hold => {}
        }
    }

    async fn run_shutdown(&mut self) {
        info!("Manager shutting down");
        self.shutting_down = true;

        for handle in self.pool.workers_mut() {
            handle.draining = true;
            if handle.connected {
                let _ = handle.try_send(ManagerMessage::Shutdown);
            }
        }

        // bounded wait for cooperative exits; completions arriving in
        // the grace period still resolve normally
        let deadline = Instant::now() + self.config.pool.shutdown_timeout;
        while self.pool.connected_count() > 0 {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some((worker_id, event))) => self.handle_worker_event(worker_id, event).await,
                Ok(None) | Err(_) => break,
            }
        }

        let stragglers: Vec<WorkerId> = self
            .pool
            .workers()
            .filter(|w| w.connected)
            .map(|w| w.id)
            .collect();
        for worker_id in stragglers {
            warn!(worker_id = %worker_id, "Worker did not exit in time; force-terminating");
            if let Some(handle) = self.pool.get_mut(worker_id) {
                handle.force_kill();
                // keep the interrupted task recoverable
                if let Some(task) = handle.release() {
                    self.queue.requeue_front(task);
                }
            }
        }

        // queued-but-unassigned tasks are rejected, not silently
        // dropped; they stay persisted and are recovered on restart
        for (task_id, waiter) in self.waiters.drain() {
            debug!(task_id = %task_id, "Rejecting unfinished task at shutdown");
            let _ = waiter.send(TaskOutcome::Rejected("manager shutting down".to_string()));
        }

        let state = self.snapshot_state();
        if let Err(e) = self.store.flush(state).await {
            error!(error = %e, "Final state flush failed");
        }
        info!("Shutdown complete");
    }

    fn build_snapshot(&mut self) -> ManagerSnapshot {
        self.metrics.set_persist_errors(self.store.persist_errors());
        let workers: Vec<WorkerStats> = self
            .pool
            .workers()
            .map(|w| WorkerStats {
                id: w.id,
                available: w.available,
                connected: w.connected,
                tasks_completed: w.tasks_completed,
                tasks_failed: w.tasks_failed,
                restart_count: w.restart_count,
            })
            .collect();
        ManagerSnapshot {
            pending: self.queue.len(),
            scheduled: self.scheduled.len(),
            dead_letter: self.dead_letter.len(),
            active_workers: self.pool.active_count(),
            tasks_in_flight: workers.iter().filter(|w| !w.available).count(),
            metrics: self.metrics.snapshot(),
            workers,
        }
    }

    fn snapshot_state(&self) -> QueueState {
        QueueState {
            version: STATE_VERSION,
            pending: self.queue.snapshot(),
            scheduled: self.scheduled.clone(),
            dead_letter: self.dead_letter.clone(),
            task_counter: self.task_counter,
        }
    }

    fn persist(&mut self) {
        self.store.save(self.snapshot_state());
    }
}
