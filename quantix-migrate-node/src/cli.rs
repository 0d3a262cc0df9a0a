//! Command-line argument parsing.

use clap::{Parser, Subcommand};

/// Quantix migration node - live-migration coordinator and preflight endpoint
#[derive(Parser, Debug)]
#[command(name = "quantix-migrate-node")]
#[command(about = "Quantix migration node - live-migration coordinator and preflight endpoint")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Host name this node answers for (auto-detected if not set)
    #[arg(long)]
    pub hostname: Option<String>,

    /// YAML inventory seeding the in-memory store
    #[arg(long)]
    pub inventory: Option<String>,

    /// Peer address as HOST=URL (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve peer RPC and migration status over HTTP
    Serve {
        /// Listen address for the HTTP server
        #[arg(long)]
        listen: Option<String>,
    },
    /// Live-migrate one workload away from this host and exit
    Migrate {
        /// Workload identifier (e.g. i-12345)
        #[arg(long)]
        workload: String,

        /// Destination host name
        #[arg(long)]
        destination: String,
    },
}

fn parse_peer(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(host, url)| !host.is_empty() && !url.is_empty())
        .map(|(host, url)| (host.to_string(), url.to_string()))
        .ok_or_else(|| format!("expected HOST=URL, got `{}`", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        assert_eq!(
            parse_peer("host2=http://10.0.0.2:9190").unwrap(),
            ("host2".to_string(), "http://10.0.0.2:9190".to_string())
        );
        assert!(parse_peer("host2").is_err());
        assert!(parse_peer("=http://x").is_err());
    }

    #[test]
    fn test_migrate_subcommand() {
        let args = Args::try_parse_from([
            "quantix-migrate-node",
            "--peer",
            "host2=http://127.0.0.1:9190",
            "migrate",
            "--workload",
            "i-12345",
            "--destination",
            "host2",
        ])
        .unwrap();

        assert_eq!(args.peers.len(), 1);
        match args.command {
            Command::Migrate { workload, destination } => {
                assert_eq!(workload, "i-12345");
                assert_eq!(destination, "host2");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
