//! Binary entry point: load configuration, build the cluster topology,
//! and serve the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gantry_scheduler::api::{create_router, AppState};
use gantry_scheduler::client::{HttpResourceManagerClient, NullResourceManagerClient, ResourceManagerClient};
use gantry_scheduler::config::ClusterConfig;
use gantry_scheduler::scheduler::{Handler, SchedulerConfig};

#[derive(Debug, Parser)]
#[command(name = "gantry-scheduler", about = "Topology-aware batch job scheduler")]
struct Cli {
    /// Path to the cluster config JSON file (rack_cap, simtype).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP API on.
    #[arg(long, default_value = "0.0.0.0:9091")]
    listen: String,

    /// Base URL of a resource manager to notify on allocation. If
    /// unset, allocations are only logged.
    #[arg(long)]
    resource_manager_url: Option<String>,

    /// Seed for the random machine picker used under the `none` policy.
    #[arg(long, default_value_t = 0)]
    rng_seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();

    if cli.config.is_none() {
        info!("no --config given, using default topology");
    }
    let cluster_config = ClusterConfig::load(cli.config.as_deref())?;
    let topology = cluster_config.build_topology()?;

    let client: Arc<dyn ResourceManagerClient> = match &cli.resource_manager_url {
        Some(url) => Arc::new(HttpResourceManagerClient::new(url.clone())),
        None => Arc::new(NullResourceManagerClient),
    };

    let scheduler_config = SchedulerConfig { policy: cluster_config.policy, rng_seed: cli.rng_seed };
    let handler = Handler::new(topology, scheduler_config, client);

    let state = Arc::new(AppState { handler: Mutex::new(handler) });
    let app = create_router(state);

    info!(listen = %cli.listen, policy = ?cluster_config.policy, "starting gantry-scheduler");
    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
