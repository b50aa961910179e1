//! Child-process worker transport.
//!
//! Spawns the worker program with piped stdio and pumps newline-
//! delimited JSON envelopes: a writer task feeds stdin, a reader task
//! decodes stdout lines into worker events, stderr is surfaced into the
//! manager's logs, and the exit status arrives as the final event.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taskforge_core::{ManagerMessage, WorkerId, WorkerReply};

use crate::error::ManagerError;
use crate::pool::{WorkerChannels, WorkerEvent, WorkerLauncher};

/// Launches real worker processes.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn spawn(
        &self,
        id: WorkerId,
        events: mpsc::Sender<(WorkerId, WorkerEvent)>,
    ) -> Result<WorkerChannels, ManagerError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--worker-id")
            .arg(id.value().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ManagerError::Spawn(format!("{}: {e}", self.program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ManagerError::Spawn("worker stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ManagerError::Spawn("worker stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ManagerError::Spawn("worker stderr not piped".to_string()))?;

        let (tx, mut outbound_rx) = mpsc::channel::<ManagerMessage>(32);
        let kill = CancellationToken::new();

        // stdin writer: one JSON envelope per line
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = outbound_rx.recv().await {
                let mut line = match serde_json::to_string(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(worker_id = %id, error = %e, "Failed to encode envelope");
                        continue;
                    }
                };
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // stderr logger
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!(worker_id = %id, stderr = %trimmed, "Worker stderr");
                }
            }
        });

        // stdout reader: decode replies, report undecodable lines
        let reader_events = events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let event = match serde_json::from_str::<WorkerReply>(trimmed) {
                    Ok(reply) => WorkerEvent::Reply(reply),
                    Err(e) => {
                        let preview: String = trimmed.chars().take(120).collect();
                        WorkerEvent::Faulted(format!("undecodable line `{preview}`: {e}"))
                    }
                };
                if reader_events.send((id, event)).await.is_err() {
                    break;
                }
            }
        });

        // exit waiter; also carries out force-kills
        let kill_watch = kill.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = kill_watch.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await.ok().and_then(|s| s.code())
                }
            };
            let _ = events.send((id, WorkerEvent::Exited { code })).await;
        });

        Ok(WorkerChannels { tx, kill })
    }
}
