// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Posewire links talking through a live relay.

use posewire::{
    ControlClient, ControlMessage, ControlReply, HostLink, LinkConfig, ManagerLink, PoseRecord,
    PoserLink, Topology,
};
use posewire_relay::{Relay, RelayConfig, RelayHandle, RelayStatsSnapshot};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn start_relay() -> (RelayHandle, thread::JoinHandle<Result<(), posewire_relay::RelayError>>) {
    Relay::bind(RelayConfig::loopback()).unwrap().spawn().unwrap()
}

fn link_config(relay: &RelayHandle) -> LinkConfig {
    LinkConfig::default()
        .with_server(relay.local_addr())
        .with_send_interval(Duration::from_millis(2))
        .with_close_interval(Duration::from_millis(20))
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < WAIT, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn wait_stats<F: Fn(&RelayStatsSnapshot) -> bool>(relay: &RelayHandle, cond: F) {
    wait_until("relay stats", || cond(&relay.stats()));
}

#[test]
fn poser_and_host_exchange_through_relay() {
    let (relay, thread) = start_relay();
    let topology = Topology::parse("h c c").unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let host = HostLink::new(topology.clone(), link_config(&relay)).with_pose_sink(
        move |records: &[PoseRecord]| {
            assert_eq!(records.len(), 3);
            counter.fetch_add(1, Ordering::Relaxed);
        },
    );
    host.start().unwrap();
    wait_stats(&relay, |s| s.handshakes == 1);

    let poser = PoserLink::new(topology, link_config(&relay));
    poser.board().update_inputs(1, |i| i.trigger_value = 0.5);
    poser.start().unwrap();

    wait_until("pose frames", || received.load(Ordering::Relaxed) >= 5);
    let latest = host.latest().unwrap();
    match &latest[1] {
        PoseRecord::Controller(c) => assert_eq!(c.inputs.trigger_value, 0.5),
        other => panic!("expected controller, got {other:?}"),
    }
    assert_eq!(host.metrics().frames_dropped(), 0);

    host.send_message(b"rumble 1").unwrap();
    wait_until("host message", || poser.last_message().is_some());
    assert_eq!(poser.last_message().unwrap(), b"rumble 1");

    // The relay drops the poser on CLOSE; the host stays connected.
    poser.stop().unwrap();
    wait_stats(&relay, |s| s.connections_closed == 1);
    assert!(host.state().is_operational());

    relay.stop();
    thread.join().unwrap().unwrap();
    host.wait().unwrap();
}

#[test]
fn control_traffic_stays_off_the_pose_channel() {
    let (relay, thread) = start_relay();

    let host = HostLink::new(Topology::parse("h").unwrap(), link_config(&relay));
    host.start().unwrap();
    let manager = ManagerLink::new(link_config(&relay), |msg: &ControlMessage| match msg {
        ControlMessage::Ipd(_) => ControlReply::Ok,
        _ => ControlReply::Rejected,
    })
    .with_topology_handle(host.topology_handle());
    manager.start().unwrap();
    wait_stats(&relay, |s| s.handshakes == 2);

    let mut client = ControlClient::connect(&link_config(&relay)).unwrap();
    wait_stats(&relay, |s| s.handshakes == 3);

    assert_eq!(
        client.send(&ControlMessage::Ipd(0.064)).unwrap(),
        ControlReply::Ok
    );
    assert_eq!(
        client
            .send(&ControlMessage::TopologyUpdate(Topology::parse("h t").unwrap()))
            .unwrap(),
        ControlReply::Rejected
    );
    // the update is applied before the handler decides on the reply
    assert_eq!(host.topology().descriptor(), "h t");

    assert_eq!(manager.metrics().frames_received(), 2);
    assert_eq!(host.metrics().frames_received(), 0);

    client.close().unwrap();
    manager.stop().unwrap();
    host.stop().unwrap();
    relay.stop();
    thread.join().unwrap().unwrap();
}

#[test]
fn close_line_is_not_forwarded() {
    let (relay, thread) = start_relay();

    let mut host = TcpStream::connect(relay.local_addr()).unwrap();
    host.write_all(b"hello\n").unwrap();
    host.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    wait_stats(&relay, |s| s.handshakes == 1);

    let mut poser = TcpStream::connect(relay.local_addr()).unwrap();
    poser.write_all(b"holla\nx\t\r\nCLOSE\n").unwrap();
    wait_stats(&relay, |s| s.connections_closed == 1);

    let mut buf = [0u8; 64];
    let n = host.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"x\t\r\n");
    assert!(host.read(&mut buf).is_err());

    relay.stop();
    thread.join().unwrap().unwrap();
}
