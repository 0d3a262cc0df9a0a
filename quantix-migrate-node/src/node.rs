//! Node assembly.
//!
//! Every node plays both roles: it runs a [`PreflightEndpoint`] for peers
//! migrating workloads in, and a [`MigrationCoordinator`] for workloads it
//! moves out. Collaborators are the in-memory backends, seeded from the
//! configured inventory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use quantix_migrate::mock::{Inventory, MockDriver, MockNetwork, MockStore};
use quantix_migrate::{MigrationCoordinator, PreflightEndpoint, PreflightValidator};

use crate::config::Config;
use crate::transport::HttpChannel;

/// The wired-up services of one node.
pub struct Node {
    pub hostname: String,
    pub endpoint: Arc<PreflightEndpoint>,
    pub coordinator: Arc<MigrationCoordinator>,
}

impl Node {
    pub fn build(config: &Config) -> Result<Self> {
        let hostname = config.node.get_hostname();

        let inventory = match config.inventory {
            Some(ref path) => load_inventory(path)?,
            None => Inventory::default(),
        };
        let store = Arc::new(MockStore::from_inventory(inventory));
        let driver = Arc::new(MockDriver::new());
        let network = Arc::new(MockNetwork::new());

        let validator = Arc::new(PreflightValidator::new(
            store.clone(),
            driver.clone(),
            network,
        ));
        let endpoint = Arc::new(PreflightEndpoint::new(
            hostname.clone(),
            validator,
            config.migration.endpoint.clone(),
        ));

        let channel = Arc::new(
            HttpChannel::new(
                config.peers.clone(),
                Duration::from_secs(config.server.peer_timeout_secs),
            )
            .with_context(|| format!("Failed to create peer channel for {}", hostname))?,
        );
        let coordinator = Arc::new(MigrationCoordinator::new(
            store,
            driver,
            channel,
            config.migration.coordinator.clone(),
        ));

        info!(
            hostname = %hostname,
            peers = config.peers.len(),
            poll_attempts = coordinator.config().preflight_poll_attempts,
            poll_budget_ms = coordinator.config().poll_budget().as_millis() as u64,
            "Migration node assembled"
        );

        Ok(Self {
            hostname,
            endpoint,
            coordinator,
        })
    }
}

/// Read a YAML inventory file.
pub fn load_inventory<P: AsRef<Path>>(path: P) -> Result<Inventory> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse inventory file: {}", path.display()))
}
