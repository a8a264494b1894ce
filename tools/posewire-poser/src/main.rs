// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! posewire-poser - synthetic pose source
//!
//! Connects as a poser and animates every device of the topology:
//! the headset orbits the origin, controllers swing at arm's length and
//! pulse their triggers, trackers sit still on the floor.
//!
//! ```bash
//! posewire-poser --topology "h c c t" --rate 90 --duration 30
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use posewire::{BasePose, DeviceKind, LinkConfig, PoseBoard, PoserLink, Topology, DEFAULT_PORT};
use std::f32::consts::TAU;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Orbit period of the headset, seconds.
const ORBIT_PERIOD: f32 = 8.0;
const ORBIT_RADIUS: f32 = 0.5;
const EYE_HEIGHT: f32 = 1.7;
/// Swing period of the controllers, seconds.
const SWING_PERIOD: f32 = 2.0;

/// Synthetic pose source
#[derive(Parser, Debug)]
#[command(name = "posewire-poser")]
#[command(version)]
#[command(about = "Stream an animated device topology to a posewire host")]
struct Args {
    /// Device topology (e.g. "h c c t")
    #[arg(short, long, default_value = "h c c")]
    topology: String,

    /// Frames per second
    #[arg(short, long, default_value = "100")]
    rate: f64,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Server address
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    server: IpAddr,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if !(args.rate > 0.0 && args.rate.is_finite()) {
        bail!("rate must be a positive number, got {}", args.rate);
    }
    let topology = Topology::parse(&args.topology).context("invalid topology")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let config = LinkConfig::default()
        .with_server(SocketAddr::new(args.server, args.port))
        .with_rate(args.rate);
    let link = PoserLink::new(topology.clone(), config);
    let board = link.board();
    place_devices(&board, 0.0);
    link.start()
        .with_context(|| format!("cannot connect to {}:{}", args.server, args.port))?;

    if !args.quiet {
        eprintln!(
            "{} Streaming {} ({} bytes/frame) to {} at {} Hz",
            ">>>".green().bold(),
            topology.expanded().as_str().cyan(),
            topology.frame_len(),
            SocketAddr::new(args.server, args.port),
            args.rate
        );
        eprintln!("{}", "    Press Ctrl+C to stop".dimmed());
    }

    let deadline = args.duration.map(|s| Instant::now() + Duration::from_secs_f64(s));
    let tick = Duration::from_secs_f64(1.0 / args.rate);
    let start = Instant::now();
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if link.state().is_terminal() {
            eprintln!("{} server closed the connection", "!!!".yellow().bold());
            break;
        }

        place_devices(&board, start.elapsed().as_secs_f32());

        if let Some(msg) = link.last_message() {
            log::debug!("host message: {}", String::from_utf8_lossy(&msg));
        }
        if !args.quiet && last_report.elapsed() >= Duration::from_secs(1) {
            let m = link.metrics().snapshot();
            eprintln!(
                "    {} frames, {} bytes, {} send errors",
                m.frames_sent, m.bytes_sent, m.send_errors
            );
            last_report = Instant::now();
        }

        thread::sleep(tick);
    }

    link.stop()?;

    let m = link.metrics().snapshot();
    println!(
        "{} {} frames ({} bytes) in {:.1}s, {} messages received",
        "Done:".green().bold(),
        m.frames_sent,
        m.bytes_sent,
        m.uptime.as_secs_f64(),
        m.frames_received
    );
    Ok(())
}

/// Yaw rotation about +Y in wire order.
fn yaw(angle: f32) -> [f32; 4] {
    let half = angle / 2.0;
    [half.cos(), 0.0, half.sin(), 0.0]
}

fn place_devices(board: &PoseBoard, t: f32) {
    let topology = board.topology();
    let orbit = TAU * t / ORBIT_PERIOD;
    let swing = (TAU * t / SWING_PERIOD).sin();
    let head = [ORBIT_RADIUS * orbit.cos(), EYE_HEIGHT, ORBIT_RADIUS * orbit.sin()];
    let mut hand = 0usize;
    let mut tracker = 0usize;

    for (index, kind) in topology.kinds().iter().enumerate() {
        match kind {
            DeviceKind::Headset => {
                board.update_pose(index, |p| {
                    p.position = head;
                    p.orientation = yaw(-orbit);
                    p.velocity = [
                        -ORBIT_RADIUS * TAU / ORBIT_PERIOD * orbit.sin(),
                        0.0,
                        ORBIT_RADIUS * TAU / ORBIT_PERIOD * orbit.cos(),
                    ];
                    p.angular_velocity = [0.0, -TAU / ORBIT_PERIOD, 0.0];
                });
            }
            DeviceKind::Controller => {
                let side = if hand % 2 == 0 { -0.25 } else { 0.25 };
                let phase = if hand % 2 == 0 { swing } else { -swing };
                board.update_pose(index, |p| {
                    p.position = [head[0] + side, EYE_HEIGHT - 0.5, head[2] - 0.3 + 0.2 * phase];
                    p.orientation = yaw(0.4 * phase);
                });
                board.update_inputs(index, |i| {
                    i.trigger_value = 0.5 * (1.0 + phase);
                    i.trigger_click = if i.trigger_value > 0.9 { 1.0 } else { 0.0 };
                });
                hand += 1;
            }
            DeviceKind::Tracker => {
                let angle = tracker as f32 * 0.5;
                board.update_pose(index, |p| {
                    *p = BasePose::at([angle.cos(), 0.0, angle.sin()]);
                });
                tracker += 1;
            }
        }
    }
}
