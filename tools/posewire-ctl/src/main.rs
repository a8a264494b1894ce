// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! posewire-ctl - one-shot control messages
//!
//! Connects under the manager role, sends a single message and prints the
//! reply. Exits non-zero when the reply is not `2000`.
//!
//! ```bash
//! posewire-ctl ipd 0.063
//! posewire-ctl topology "h c c t"
//! posewire-ctl distortion 0.22 0.24 1.0 1.0
//! posewire-ctl --port 7000 self-pose -- 0.0 1.2 -0.5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use posewire::{ControlClient, ControlMessage, ControlReply, LinkConfig, Topology, DEFAULT_PORT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Posewire control client
#[derive(Parser, Debug)]
#[command(name = "posewire-ctl")]
#[command(version)]
#[command(about = "Send a control message to posewire managers")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Server address
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST), global = true)]
    server: IpAddr,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    /// Reply timeout in milliseconds
    #[arg(short, long, default_value = "2000", global = true)]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inter-pupillary distance (meters)
    Ipd { meters: f32 },

    /// Replace the device topology (e.g. "h c c t")
    Topology { descriptor: String },

    /// Pose prediction offset (seconds)
    PoseTimeOffset {
        #[arg(allow_negative_numbers = true)]
        seconds: f32,
    },

    /// Lens distortion coefficients and zoom
    Distortion {
        #[arg(allow_negative_numbers = true)]
        k1: f32,
        #[arg(allow_negative_numbers = true)]
        k2: f32,
        zoom_width: f32,
        zoom_height: f32,
    },

    /// Gap between the eye viewports (pixels)
    EyeGap {
        #[arg(allow_negative_numbers = true)]
        pixels: i32,
    },

    /// Position of the tracking reference
    SelfPose {
        #[arg(allow_negative_numbers = true)]
        x: f32,
        #[arg(allow_negative_numbers = true)]
        y: f32,
        #[arg(allow_negative_numbers = true)]
        z: f32,
    },
}

impl Command {
    fn to_message(&self) -> Result<ControlMessage> {
        Ok(match self {
            Command::Ipd { meters } => ControlMessage::Ipd(*meters),
            Command::Topology { descriptor } => ControlMessage::TopologyUpdate(
                Topology::parse(descriptor).context("invalid topology")?,
            ),
            Command::PoseTimeOffset { seconds } => ControlMessage::PoseTimeOffset(*seconds),
            Command::Distortion {
                k1,
                k2,
                zoom_width,
                zoom_height,
            } => ControlMessage::Distortion {
                k1: *k1,
                k2: *k2,
                zoom_width: *zoom_width,
                zoom_height: *zoom_height,
            },
            Command::EyeGap { pixels } => ControlMessage::EyeGap(*pixels),
            Command::SelfPose { x, y, z } => ControlMessage::SetSelfPose([*x, *y, *z]),
        })
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the manager accepted the message.
fn run(args: &Args) -> Result<bool> {
    let message = args.command.to_message()?;
    // Encode up front so a bad value fails before connecting.
    message.encode().context("cannot encode message")?;

    let server = SocketAddr::new(args.server, args.port);
    let config = LinkConfig::default().with_server(server);
    let mut client = ControlClient::connect(&config)
        .with_context(|| format!("cannot connect to {}", server))?
        .with_reply_timeout(Duration::from_millis(args.timeout));

    log::debug!("sending type {} to {}", message.message_type(), server);
    let reply = client.send(&message).context("no reply")?;
    client.close()?;

    let accepted = reply.is_ok();
    match &reply {
        ControlReply::Ok => println!("{} {}", "OK".green().bold(), reply.as_str()),
        ControlReply::Rejected => println!("{} {}", "REJECTED".red().bold(), reply.as_str()),
        ControlReply::Other(_) => println!("{} {}", "REPLY".yellow().bold(), reply.as_str()),
    }
    Ok(accepted)
}
