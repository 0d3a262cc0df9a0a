//! Configuration management for the migration node.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use quantix_migrate::{CoordinatorConfig, EndpointConfig};

use crate::cli::{Args, Command};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Node-specific configuration
    pub node: NodeConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Coordinator and preflight tunables
    pub migration: MigrationConfig,
    /// Peer host name to base URL (e.g. `host2: http://10.0.0.2:9190`)
    pub peers: HashMap<String, String>,
    /// Inventory file seeding the in-memory store
    pub inventory: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Defaults plus CLI overrides, for running without a config file.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref hostname) = args.hostname {
            self.node.hostname = Some(hostname.clone());
        }

        if let Some(ref inventory) = args.inventory {
            self.inventory = Some(inventory.clone());
        }

        for (host, url) in &args.peers {
            self.peers.insert(host.clone(), url.clone());
        }

        if let Command::Serve { listen: Some(ref listen) } = args.command {
            self.server.listen_address = listen.clone();
        }

        self
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    /// Host name peers use for this node (auto-detected if not set)
    pub hostname: Option<String>,
}

impl NodeConfig {
    /// Get the hostname, detecting it if not set.
    pub fn get_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on for peer RPC
    pub listen_address: String,
    /// Per-request timeout for calls to peers, in seconds
    pub peer_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9190".to_string(),
            peer_timeout_secs: 30,
        }
    }
}

/// Live-migration tunables.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MigrationConfig {
    #[serde(flatten)]
    pub coordinator: CoordinatorConfig,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}
