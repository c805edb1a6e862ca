//! Operator CLI for the proxy pool.
//!
//! ```text
//! proxy-pool validate --config client.toml
//! proxy-pool discover --config client.toml [--datacenter vla]
//! ```
//!
//! `validate` loads and checks a client configuration. `discover` runs one
//! discovery round per datacenter and prints the proxies each source
//! returns as JSON. Datacenters discovered over RPC are reported as errors,
//! since the CLI has no transport to reach the proxies.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use proxy_pool::config::{load_config, ClientConfig};
use proxy_pool::discovery::source_from_config;
use proxy_pool::observability::logging::init_logging;
use proxy_pool::observability::metrics::init_metrics;

#[derive(Parser)]
#[command(name = "proxy-pool")]
#[command(about = "Inspect RPC proxy pool configuration and discovery", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a client configuration
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run one discovery round and print the proxies found
    Discover {
        #[arg(short, long)]
        config: PathBuf,

        /// Only query this datacenter
        #[arg(short, long)]
        datacenter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            let loaded = load_config(&config)?;
            init_logging(&loaded.observability.log_level);
            tracing::info!(path = %config.display(), "Configuration loaded");
            println!(
                "{}: ok ({} datacenter(s), local: {})",
                config.display(),
                loaded.datacenters.len(),
                loaded.local_datacenter.as_deref().unwrap_or("none")
            );
        }
        Commands::Discover { config, datacenter } => {
            let loaded = load_config(&config)?;
            init_logging(&loaded.observability.log_level);
            if loaded.observability.metrics_enabled {
                match loaded.observability.metrics_address.parse() {
                    Ok(addr) => init_metrics(addr)?,
                    Err(_) => tracing::error!(
                        metrics_address = %loaded.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }
            let report = discover(&loaded, datacenter.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn discover(
    config: &ClientConfig,
    only: Option<&str>,
) -> Result<BTreeMap<String, serde_json::Value>, Box<dyn std::error::Error>> {
    let selected: Vec<_> = config
        .datacenters
        .iter()
        .filter(|dc| only.map_or(true, |name| dc.name == name))
        .collect();
    if selected.is_empty() {
        return Err(format!("unknown datacenter '{}'", only.unwrap_or_default()).into());
    }

    let mut report = BTreeMap::new();
    for dc in selected {
        // No transport here, so `rpc` sources cannot be queried.
        let source = match source_from_config(&dc.source, config.discovery.fetch_timeout(), None) {
            Ok(source) => source,
            Err(error) => {
                report.insert(dc.name.clone(), json!({ "error": error.to_string() }));
                continue;
            }
        };
        tracing::info!(datacenter = %dc.name, source = %source.describe(), "Discovering proxies");

        let entry = match tokio::time::timeout(config.discovery.fetch_timeout(), source.fetch()).await {
            Ok(Ok(proxies)) => json!({ "source": source.describe(), "proxies": proxies }),
            Ok(Err(error)) => json!({ "source": source.describe(), "error": error.to_string() }),
            Err(_) => json!({ "source": source.describe(), "error": "timed out" }),
        };
        source.close();
        report.insert(dc.name.clone(), entry);
    }
    Ok(report)
}
