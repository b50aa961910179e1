//! Durable queue state persistence.
//!
//! The on-disk copy is the authoritative crash-recovery record. All
//! writes go through a single writer task: mutations within the
//! debounce window coalesce into one write, and each write serializes
//! to a temporary file that is atomically renamed over the previous
//! state, so a crash mid-write never corrupts the durable copy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use taskforge_core::{CoreError, QueueState, STATE_VERSION};

use crate::error::StoreError;

/// Acknowledgement that the write covering a request landed (or why it
/// did not). Errors cross the channel as strings; the writer has
/// already logged them.
pub type PersistAck = oneshot::Receiver<Result<(), String>>;

struct PersistRequest {
    state: QueueState,
    ack: Option<oneshot::Sender<Result<(), String>>>,
    /// Skip the debounce window and write immediately.
    urgent: bool,
}

/// Read the durable state, or start fresh if none exists yet.
pub fn load(path: &Path) -> Result<QueueState, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No queue state on disk; starting fresh");
            return Ok(QueueState::new());
        }
        Err(e) => return Err(e.into()),
    };
    let state: QueueState = serde_json::from_slice(&bytes)?;
    if state.version != STATE_VERSION {
        return Err(CoreError::StateVersion {
            found: state.version,
            expected: STATE_VERSION,
        }
        .into());
    }
    Ok(state)
}

/// Serialize to a sibling temporary file and atomically rename it over
/// the previous state file.
fn write_atomic(path: &Path, state: &QueueState) -> Result<(), StoreError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let tmp = match dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new_in(".")?,
    };
    serde_json::to_writer(&tmp, state)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Handle to the single-writer persistence task.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<PersistRequest>,
    writes: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl StoreHandle {
    /// Queue a debounced write. Fire-and-forget; failures are logged by
    /// the writer and retried on the next mutation.
    pub fn save(&self, state: QueueState) {
        let _ = self.tx.send(PersistRequest {
            state,
            ack: None,
            urgent: false,
        });
    }

    /// Queue a debounced write and receive an ack once the write that
    /// covers it completes.
    pub fn save_acked(&self, state: QueueState) -> PersistAck {
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self.tx.send(PersistRequest {
            state,
            ack: Some(ack_tx),
            urgent: false,
        });
        ack_rx
    }

    /// Write immediately, bypassing the debounce window. Used at
    /// shutdown.
    pub async fn flush(&self, state: QueueState) -> Result<(), String> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let send = self.tx.send(PersistRequest {
            state,
            ack: Some(ack_tx),
            urgent: true,
        });
        if send.is_err() {
            return Err("store writer is gone".to_string());
        }
        ack_rx
            .await
            .unwrap_or_else(|_| Err("store writer dropped the ack".to_string()))
    }

    /// Completed writes so far.
    pub fn writes_completed(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Failed writes so far.
    pub fn persist_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Spawn the single-writer task.
pub fn spawn_writer(path: PathBuf, debounce: Duration) -> (StoreHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let writes = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let handle = StoreHandle {
        tx,
        writes: writes.clone(),
        errors: errors.clone(),
    };
    let join = tokio::spawn(writer_loop(path, debounce, rx, writes, errors));
    (handle, join)
}

async fn writer_loop(
    path: PathBuf,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<PersistRequest>,
    writes: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
) {
    let mut pending: Option<QueueState> = None;
    let mut acks: Vec<oneshot::Sender<Result<(), String>>> = Vec::new();

    loop {
        let request = if pending.is_some() {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(request) => request,
                Err(_) => {
                    // quiet window elapsed
                    flush_pending(&path, &mut pending, &mut acks, &writes, &errors);
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match request {
            Some(request) => {
                let urgent = request.urgent;
                pending = Some(request.state);
                if let Some(ack) = request.ack {
                    acks.push(ack);
                }
                if urgent {
                    flush_pending(&path, &mut pending, &mut acks, &writes, &errors);
                }
            }
            None => {
                flush_pending(&path, &mut pending, &mut acks, &writes, &errors);
                break;
            }
        }
    }
    debug!(path = %path.display(), "Store writer stopped");
}

fn flush_pending(
    path: &Path,
    pending: &mut Option<QueueState>,
    acks: &mut Vec<oneshot::Sender<Result<(), String>>>,
    writes: &Arc<AtomicU64>,
    errors: &Arc<AtomicU64>,
) {
    let Some(state) = pending.take() else {
        return;
    };
    let result = match write_atomic(path, &state) {
        Ok(()) => {
            writes.fetch_add(1, Ordering::Relaxed);
            debug!(
                pending = state.pending.len(),
                scheduled = state.scheduled.len(),
                dead_letter = state.dead_letter.len(),
                "Queue state persisted"
            );
            Ok(())
        }
        Err(e) => {
            // in-memory state stays authoritative; the next mutation
            // retries the write
            errors.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, path = %path.display(), "Failed to persist queue state");
            Err(e.to_string())
        }
    };
    for ack in acks.drain(..) {
        let _ = ack.send(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::{Priority, Task, TaskId};

    fn sample_state() -> QueueState {
        let mut state = QueueState::new();
        let id = state.next_task_id();
        state
            .pending
            .push(Task::new(id, r#"{"n":1}"#, Priority::High));
        state
    }

    #[test]
    fn test_load_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state = load(&dir.path().join("missing.json")).unwrap();
        assert_eq!(state, QueueState::new());
    }

    #[test]
    fn test_write_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = sample_state();

        write_atomic(&path, &state).unwrap();
        assert_eq!(load(&path).unwrap(), state);

        // second write replaces the first atomically
        let mut next = state.clone();
        next.pending.clear();
        next.dead_letter.push(taskforge_core::DeadLetter::new(
            Task::new(TaskId::new(2), "{}", Priority::Low),
            "gave up",
        ));
        write_atomic(&path, &next).unwrap();
        assert_eq!(load(&path).unwrap(), next);
    }

    #[test]
    fn test_load_rejects_foreign_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = sample_state();
        state.version = STATE_VERSION + 1;
        write_atomic(&path, &state).unwrap();

        assert!(matches!(
            load(&path),
            Err(StoreError::Core(CoreError::StateVersion { .. }))
        ));
    }

    #[tokio::test]
    async fn test_rapid_saves_coalesce_into_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let (handle, _join) = spawn_writer(path.clone(), Duration::from_millis(50));

        for _ in 0..5 {
            handle.save(sample_state());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.writes_completed(), 1);

        // a later mutation gets its own write
        handle.save(sample_state());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.writes_completed(), 2);
    }

    #[tokio::test]
    async fn test_save_acked_resolves_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let (handle, _join) = spawn_writer(path.clone(), Duration::from_millis(10));

        let state = sample_state();
        handle.save_acked(state.clone()).await.unwrap().unwrap();
        assert_eq!(load(&path).unwrap(), state);
    }

    #[tokio::test]
    async fn test_flush_writes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        // debounce far longer than the test; flush must not wait for it
        let (handle, _join) = spawn_writer(path.clone(), Duration::from_secs(60));

        handle.flush(sample_state()).await.unwrap();
        assert_eq!(handle.writes_completed(), 1);
        assert!(path.exists());
    }
}
