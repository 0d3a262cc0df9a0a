//! # Quantix Migration Node
//!
//! Runs on each compute host. Peers call its preflight endpoint before
//! migrating a workload here; operators (or the control plane) ask it to
//! migrate workloads away.
//!
//! ## Usage
//! ```bash
//! quantix-migrate-node --config /etc/quantix/migrate.yaml serve
//! quantix-migrate-node --peer host2=http://10.0.0.2:9190 \
//!     migrate --workload i-12345 --destination host2
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use quantix_migrate::{MigrationOutcome, RequestContext, WorkloadId};

mod cli;
mod config;
mod node;
mod server;
mod transport;

use cli::{Args, Command};
use config::Config;
use node::Node;

const DEFAULT_CONFIG_PATH: &str = "/etc/quantix/migrate.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.log_json {
        quantix_migrate_common::init_logging_json(&args.log_level)?;
    } else {
        quantix_migrate_common::init_logging(&args.log_level)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Quantix migration node"
    );

    let config = load_config(&args)?;
    let node = Node::build(&config)?;

    match args.command {
        Command::Serve { .. } => {
            let addr: SocketAddr = config
                .server
                .listen_address
                .parse()
                .with_context(|| format!("Invalid listen address: {}", config.server.listen_address))?;

            let state = Arc::new(server::AppState {
                hostname: node.hostname,
                endpoint: node.endpoint,
                coordinator: node.coordinator,
            });

            if let Err(e) = server::run(addr, state).await {
                error!(error = %e, "Server failed");
                return Err(e);
            }
        }
        Command::Migrate {
            workload,
            destination,
        } => {
            let ctx = RequestContext::admin();
            let outcome = node
                .coordinator
                .migrate(&ctx, &WorkloadId::new(workload), &destination)
                .await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if !matches!(outcome, MigrationOutcome::Completed { .. }) {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(config_path) => match Config::load(config_path) {
            Ok(cfg) => {
                info!(config_path = %config_path, "Configuration loaded");
                Ok(cfg.with_cli_overrides(args))
            }
            Err(e) => {
                error!(error = %e, path = %config_path, "Failed to load configuration");
                Err(e)
            }
        },
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => {
                info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                Ok(cfg.with_cli_overrides(args))
            }
            Err(_) => {
                info!("No config file found, using CLI arguments and defaults");
                Ok(Config::default_with_cli(args))
            }
        },
    }
}
