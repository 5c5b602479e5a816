use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unique_task::{Coordinator, CoordinatorConfig, RedisLeaseStore};

/// Prints a greeting every second, from only one of however many copies of
/// this program are running against the same Redis.
#[derive(Parser)]
#[command(name = "unique-task-demo", version, about, long_about = None)]
struct Cli {
    /// Lock key shared by every copy
    #[arg(long, default_value = "hello_world")]
    name: String,

    /// Lease duration in seconds
    #[arg(long, default_value_t = 1.0)]
    lease_duration: f64,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,

    /// Verbose mode (-v, -vv)
    #[arg(short, action = ArgAction::Count)]
    verbosity: u8,
}

async fn greet() -> anyhow::Result<()> {
    loop {
        info!("Hello from the unique task!");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let lease_duration = Duration::try_from_secs_f64(cli.lease_duration)?;
    let config = CoordinatorConfig::new(cli.name)
        .with_lease_duration(lease_duration)
        .with_error_handler(|err| error!(error = %err, "coordinator recovered from an error"));

    let store = Arc::new(RedisLeaseStore::connect(&cli.redis_url).await?);
    let coordinator = Coordinator::new(config, store)?;
    info!(key = coordinator.name(), instance = %coordinator.id(), "competing for the lease");

    let handle = coordinator.run(greet);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
