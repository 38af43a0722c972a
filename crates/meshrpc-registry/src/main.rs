// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! meshrpc registry server
//!
//! # Usage
//!
//! ```bash
//! # Start server on default port (2181)
//! meshrpc-registry
//!
//! # Custom port and config
//! meshrpc-registry --port 2281 --config registry.json
//! ```

use clap::Parser;
use meshrpc_registry::{RegistryServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// meshrpc registry - provider address publication and change notification
#[derive(Parser, Debug)]
#[command(name = "meshrpc-registry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "2181")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entry lease duration in milliseconds
    #[arg(long, default_value = "30000")]
    lease_duration: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            lease_duration_ms: args.lease_duration,
            ..Default::default()
        }
    };

    let addr = SocketAddr::new(config.bind_address, config.port);

    info!("+----------------------------------------------------+");
    info!(
        "|       meshrpc registry v{}                     |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:     {:38} |", addr);
    info!("|  Lease:    {:38} |", format!("{}ms", config.lease_duration_ms));
    info!("|  Sessions: {:38} |", config.max_sessions);
    info!("+----------------------------------------------------+");

    let server = RegistryServer::new(config)?;

    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Registry server stopped");
    Ok(())
}
