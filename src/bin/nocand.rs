//! NoCAN gateway daemon
//!
//! Opens the configured serial adapters and routes bus traffic until every
//! link has stopped.

use clap::Parser;
use nocan_gateway::{Gateway, GatewayConfig, InterfaceConfig, NodeRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// NoCAN bus gateway
#[derive(Parser, Debug)]
#[command(name = "nocand", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device of an adapter, may be repeated
    #[arg(short, long, value_name = "DEVICE")]
    interface: Vec<String>,

    /// Log every message received from the bus
    #[arg(long)]
    log_port: bool,
}

fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    info!("NoCAN gateway starting");

    let mut config = match &args.config {
        Some(path) => match GatewayConfig::load_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config file");
                config
            }
            Err(e) => {
                error!("Failed to load configuration from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            info!("No config file given, using defaults");
            GatewayConfig::default()
        }
    };

    for device in args.interface {
        config.add_interface(InterfaceConfig::new(device));
    }
    if args.log_port {
        config.log_port = true;
    }

    let registry = Arc::new(NodeRegistry::new());
    let gateway = match Gateway::from_config(&config, registry) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to start gateway: {}", e);
            std::process::exit(1);
        }
    };

    for link in gateway.links() {
        info!(device = link.device(), state = ?link.state(), "Link running");
    }

    gateway.wait();

    info!("NoCAN gateway stopped");
}
