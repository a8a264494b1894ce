// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Posewire relay CLI
//!
//! # Usage
//!
//! ```bash
//! # Default port, all interfaces
//! posewire-relay
//!
//! # Loopback only, custom port
//! posewire-relay --listen 127.0.0.1 --port 7000
//!
//! # Using configuration file
//! posewire-relay --config relay.toml
//! ```

use clap::{Parser, Subcommand};
use posewire_relay::{Relay, RelayConfig, RelayStatsSnapshot};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Posewire relay
#[derive(Parser, Debug)]
#[command(name = "posewire-relay")]
#[command(about = "Role-aware relay between pose posers, hosts and managers")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, conflicts_with = "config")]
    listen: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long, conflicts_with = "config")]
    port: Option<u16>,

    /// Largest accepted frame (bytes)
    #[arg(long, conflicts_with = "config")]
    max_frame_size: Option<usize>,

    /// Maximum connected peers
    #[arg(long, conflicts_with = "config")]
    max_peers: Option<usize>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "relay.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let relay = Relay::bind(config.clone())?;
    let handle = relay.handle();

    println!("Posewire Relay v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Listening on {}", relay.local_addr());
    println!("Press Ctrl+C to stop...");
    println!();

    let stopper = handle.clone();
    ctrlc::set_handler(move || {
        println!("\nShutting down...");
        stopper.stop();
    })?;

    relay.run()?;

    println!("\nFinal Statistics:");
    print_stats(&handle.stats());
    Ok(())
}

fn build_config(args: &Args) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(size) = args.max_frame_size {
        config.max_frame_size = size;
        config.max_pending_bytes = config.max_pending_bytes.max(size);
    }
    if let Some(peers) = args.max_peers {
        config.max_peers = peers;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig {
        name: "example-relay".into(),
        ..Default::default()
    };

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# Posewire Relay Configuration
# Generated by posewire-relay gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match RelayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Relay:          {}", config.name);
            println!("Listen:         {}", config.listen_addr());
            println!("Max frame size: {}", format_bytes(config.max_frame_size as u64));
            println!("Max backlog:    {}", format_bytes(config.max_pending_bytes as u64));
            println!("Max peers:      {}", config.max_peers);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &RelayStatsSnapshot) {
    println!(
        "  {} connections ({} refused), {} frames routed, {}, {} dropped, {} oversized",
        stats.connections_accepted,
        stats.connections_refused,
        stats.frames_routed,
        format_bytes(stats.bytes_routed),
        stats.frames_dropped,
        stats.oversized_frames
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
