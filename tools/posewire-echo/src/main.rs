// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! posewire-echo - print received pose frames
//!
//! Connects as a host and decodes each frame against the given topology.
//!
//! ```bash
//! posewire-echo --topology "h c c" --every 10
//! posewire-echo --topology "h t t" --json -n 100
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use posewire::{HostLink, LinkConfig, PoseRecord, Topology, DEFAULT_PORT};
use std::io::IsTerminal;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Pose frame echo
#[derive(Parser, Debug)]
#[command(name = "posewire-echo")]
#[command(version)]
#[command(about = "Print pose frames streamed by a posewire poser")]
struct Args {
    /// Expected device topology (e.g. "h c c")
    #[arg(short, long, default_value = "h c c")]
    topology: String,

    /// Print only every Nth frame
    #[arg(short, long, default_value = "1")]
    every: u64,

    /// Stop after this many printed frames (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// One JSON object per frame
    #[arg(long)]
    json: bool,

    /// Server address
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    server: IpAddr,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Quiet mode - only output frames, no headers
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&args) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let topology = Topology::parse(&args.topology).context("invalid topology")?;
    let server = SocketAddr::new(args.server, args.port);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let every = args.every.max(1);
    let limit = args.count;
    let json = args.json;
    let seen = Arc::new(AtomicU64::new(0));
    let printed = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let sink_seen = seen.clone();
    let sink_printed = printed.clone();
    let sink_running = running.clone();
    let link = HostLink::new(topology.clone(), LinkConfig::default().with_server(server))
        .with_pose_sink(move |records: &[PoseRecord]| {
            let seq = sink_seen.fetch_add(1, Ordering::Relaxed);
            if seq % every != 0 || !sink_running.load(Ordering::Relaxed) {
                return;
            }
            if json {
                print_json(seq, start.elapsed(), records);
            } else {
                print_pretty(seq, start.elapsed(), records);
            }
            let n = sink_printed.fetch_add(1, Ordering::Relaxed) + 1;
            if limit > 0 && n >= limit {
                sink_running.store(false, Ordering::SeqCst);
            }
        });

    link.start()
        .with_context(|| format!("cannot connect to {}", server))?;

    if !args.quiet {
        eprintln!(
            "{} Listening for {} ({} bytes/frame) via {}",
            ">>>".green().bold(),
            topology.expanded().as_str().cyan(),
            topology.frame_len(),
            server
        );
        eprintln!("{}", "Press Ctrl+C to stop".dimmed());
        eprintln!();
    }

    while running.load(Ordering::SeqCst) && !link.state().is_terminal() {
        thread::sleep(Duration::from_millis(50));
    }

    if link.state().is_terminal() && !args.quiet {
        eprintln!("{} poser or server closed the connection", "!!!".yellow().bold());
    }
    link.stop()?;

    if !args.quiet {
        let m = link.metrics().snapshot();
        eprintln!(
            "\n{} Received {} frame(s), printed {}, dropped {}, resyncs {}",
            "---".dimmed(),
            seen.load(Ordering::Relaxed),
            printed.load(Ordering::Relaxed),
            m.frames_dropped,
            m.resyncs
        );
    }
    Ok(())
}

fn print_pretty(seq: u64, elapsed: Duration, records: &[PoseRecord]) {
    println!(
        "{} {}",
        format!("[{:>9.3}s]", elapsed.as_secs_f64()).dimmed(),
        format!("#{}", seq).yellow()
    );
    for (i, record) in records.iter().enumerate() {
        let base = record.base();
        let [w, x, y, z] = base.orientation;
        println!(
            "  {:>2} {:<10} pos [{:>7.3} {:>7.3} {:>7.3}]  rot [{:>6.3} {:>6.3} {:>6.3} {:>6.3}]",
            i,
            record.kind().to_string().as_str().cyan(),
            base.position[0],
            base.position[1],
            base.position[2],
            w,
            x,
            y,
            z
        );
        if let PoseRecord::Controller(c) = record {
            let inputs = &c.inputs;
            println!(
                "     {} trigger {:.2} grip {:.0} pad ({:.2}, {:.2}) menu {:.0} system {:.0}",
                "inputs".dimmed(),
                inputs.trigger_value,
                inputs.grip,
                inputs.trackpad_x,
                inputs.trackpad_y,
                inputs.menu,
                inputs.system
            );
        }
    }
}

fn print_json(seq: u64, elapsed: Duration, records: &[PoseRecord]) {
    let line = serde_json::json!({
        "seq": seq,
        "t": elapsed.as_secs_f64(),
        "devices": records,
    });
    println!("{}", line);
}
