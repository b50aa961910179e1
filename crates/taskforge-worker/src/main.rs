//! taskforge Reference Worker
//!
//! Speaks the manager envelope as newline-delimited JSON: requests on
//! stdin, replies on stdout. Logs go to stderr so stdout stays a clean
//! protocol stream. Task execution runs in a spawned task so health
//! probes are answered while work is in flight; on `shutdown` the
//! worker starts no new work, lets the in-flight task finish, and exits
//! cleanly.

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use taskforge_core::{ManagerMessage, WorkerReply};

mod executor;

/// taskforge worker process.
#[derive(Debug, Parser)]
#[command(name = "taskforge-worker", version)]
struct Args {
    /// Pool slot id assigned by the manager (used for logging only).
    #[arg(long, default_value_t = 0)]
    worker_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol; tracing must stay on stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!(worker_id = args.worker_id, "Worker started");

    let (reply_tx, mut reply_rx) = mpsc::channel::<WorkerReply>(32);

    // stdout writer: one JSON envelope per line
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = reply_rx.recv().await {
            let mut line = match serde_json::to_string(&reply) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to encode reply");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ManagerMessage>(trimmed) {
            Ok(ManagerMessage::Task { task_id, payload }) => {
                info!(task_id = %task_id, "Task received");
                let tx = reply_tx.clone();
                tokio::spawn(async move {
                    let reply = match executor::execute(&payload).await {
                        Ok(result) => WorkerReply::TaskComplete { task_id, result },
                        Err(e) => WorkerReply::TaskError {
                            task_id,
                            error: e.to_string(),
                        },
                    };
                    if tx.send(reply).await.is_err() {
                        warn!(task_id = %task_id, "Reply channel closed before task finished");
                    }
                });
            }
            Ok(ManagerMessage::HealthCheck) => {
                if reply_tx.send(WorkerReply::HealthCheckResponse).await.is_err() {
                    break;
                }
            }
            Ok(ManagerMessage::Shutdown) => {
                info!("Shutdown requested; finishing in-flight work");
                break;
            }
            Err(e) => {
                // a closed envelope set: unknown types are reported,
                // never silently skipped
                error!(error = %e, "Undecodable envelope");
            }
        }
    }

    // let any in-flight task drain through the writer before exiting
    drop(reply_tx);
    let _ = writer.await;
    info!("Worker exiting");
    Ok(())
}
