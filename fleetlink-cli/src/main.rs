#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fleetlink_core::bulk::{read_all, Bundle};
use fleetlink_core::config::load_from_path;
use fleetlink_core::discovery::discover;
use fleetlink_core::progress::ProgressNode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Discover and read a fleet of power-distribution devices")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "fleetlink.toml")]
    config: PathBuf,

    /// Mnemonics to read from every discovered device, comma-separated
    #[arg(short, long, value_delimiter = ',', default_value = "device_type,firmware_version")]
    mnemonics: Vec<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(interfaces = cfg.interfaces.len(), "configuration loaded");

    let discovery_progress = ProgressNode::root(false);
    let outcome = discover(&cfg, &discovery_progress).await;
    info!(
        found = outcome.fleet.len(),
        unknown = outcome.unknown.len(),
        renumber = outcome.renumber.len(),
        "discovery complete"
    );

    if outcome.fleet.is_empty() {
        return;
    }

    let mut by_ip: std::collections::HashMap<String, Vec<fleetlink_core::Device>> = std::collections::HashMap::new();
    for device in outcome.fleet {
        by_ip.entry(device.ip.clone()).or_default().push(device);
    }

    let bundles: Vec<Bundle> = by_ip
        .into_iter()
        .map(|(ip, devices)| {
            let iface = cfg
                .interfaces
                .iter()
                .find(|i| i.ip == ip)
                .cloned()
                .unwrap_or_else(|| default_interface_for(&ip));
            let communicator = fleetlink_core::discovery::build_communicator(&cfg, &iface);
            Bundle {
                communicator: Arc::new(communicator),
                devices,
            }
        })
        .collect();

    let read_progress = ProgressNode::root(false);
    let results = read_all(bundles, &cli.mnemonics, &read_progress).await;

    for (uid, (device, outcome)) in results {
        match outcome {
            fleetlink_core::bulk::ReadOutcome::Data(values) => {
                info!(uid, variant = device.variant.tag(), ?values, "read ok");
            }
            fleetlink_core::bulk::ReadOutcome::Failed => {
                error!(uid, "read failed");
            }
        }
    }
}

fn default_interface_for(ip: &str) -> fleetlink_core::InterfaceConfig {
    fleetlink_core::InterfaceConfig {
        ip: ip.to_string(),
        hfp_port: 80,
        hfp_user: "admin".to_string(),
        hfp_pass: String::new(),
        bfp_key: String::new(),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
