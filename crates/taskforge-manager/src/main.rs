//! taskforge Manager Daemon

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use taskforge_manager::{ManagerConfig, ProcessLauncher, QueueManager};

/// Supervised worker-pool task queue manager.
#[derive(Debug, Parser)]
#[command(name = "taskforge-manager", version)]
struct Args {
    /// Path of the durable queue state file.
    #[arg(long, default_value = "taskforge-state.json")]
    state_path: PathBuf,

    /// Worker program the pool spawns.
    #[arg(long, default_value = "taskforge-worker")]
    worker_program: PathBuf,

    /// Extra arguments passed to every worker.
    #[arg(long)]
    worker_arg: Vec<String>,

    /// Number of workers spawned at startup.
    #[arg(long, default_value_t = 4)]
    pool_size: usize,

    /// Autoscaler lower bound.
    #[arg(long, default_value_t = 1)]
    min_workers: usize,

    /// Autoscaler upper bound.
    #[arg(long, default_value_t = 8)]
    max_workers: usize,

    /// Failed attempts allowed before a task is dead-lettered.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = ManagerConfig::default();
    config.state_path = args.state_path;
    config.worker_program = args.worker_program.clone();
    config.worker_args = args.worker_arg.clone();
    config.pool.pool_size = args.pool_size;
    config.pool.min_workers = args.min_workers;
    config.pool.max_workers = args.max_workers;
    config.retry.max_retries = args.max_retries;

    // configuration errors at startup are fatal
    config.validate()?;

    info!(
        state_path = %config.state_path.display(),
        worker_program = %config.worker_program.display(),
        pool_size = config.pool.pool_size,
        "Starting taskforge manager"
    );

    let launcher = ProcessLauncher::new(args.worker_program, args.worker_arg);
    let (handle, join) = QueueManager::start(config, launcher).await?;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received; shutting down");

    handle.shutdown().await?;
    join.await?;
    Ok(())
}
