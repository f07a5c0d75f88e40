//! etcd-pilot CLI
//!
//! Deploys etcd members as containers on direct or SSH-reachable hosts and
//! keeps the live cluster membership in line with the configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ep_core::config::{default_config_path, default_state_path, load_config, load_state};
use ep_etcd::{Cluster, ClusterConfig, ClusterDefaults, ContainersState};
use etcd_pilot::commands;
use etcd_pilot::deployer::StateFileDeployer;

#[derive(Parser)]
#[command(name = "etcd-pilot")]
#[command(author, version, about = "Deploy and reconcile etcd cluster members")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the cluster configuration (TOML)
    #[arg(short, long, global = true, env = "ETCD_PILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the recorded container state (JSON)
    #[arg(short, long, global = true, env = "ETCD_PILOT_STATE")]
    state: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the members and containers a reconcile would deploy
    Plan {
        /// Print the desired container state as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the live cluster members
    Members,

    /// Add and remove live members, then record the desired state
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let state_path = cli.state.unwrap_or_else(default_state_path);
    let cluster = load_cluster(&config_path, &state_path)?;

    match cli.command {
        Commands::Plan { json } => commands::plan_command(&cluster, json),
        Commands::Members => commands::members_command(&cluster).await,
        Commands::Reconcile => {
            commands::reconcile_command(&cluster, &StateFileDeployer::new(state_path)).await
        }
    }
}

/// Read the configuration and the recorded state, and resolve the cluster
fn load_cluster(config_path: &Path, state_path: &Path) -> Result<Cluster> {
    let mut config: ClusterConfig = load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let recorded: Option<ContainersState> = load_state(state_path)
        .with_context(|| format!("Failed to load state from {}", state_path.display()))?;
    if let Some(state) = recorded {
        if !config.state.is_empty() {
            tracing::warn!(
                "Ignoring inline state in {}, using {}",
                config_path.display(),
                state_path.display()
            );
        }
        config.state = state;
    }

    tracing::debug!(
        "Loaded {} members, {} deployed",
        config.members.len(),
        config.state.len()
    );

    Cluster::new(config, &ClusterDefaults::default()).context("Invalid cluster configuration")
}
