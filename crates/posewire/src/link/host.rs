// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host side of a link: decodes pose frames against the live topology.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{LinkCore, LinkState, Wiring, RECEIVE_ROLE};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::frame::{frame_payload, ReceiveBuffer};
use crate::handshake::PeerRole;
use crate::metrics::LinkMetrics;
use crate::pose::PoseRecord;
use crate::receiver::{PoseDecoder, ReceiverEngine, TopologySlot};
use crate::registry::ThreadRegistry;
use crate::stream::ByteStream;
use crate::topology::Topology;

type BoxedPoseSink = Box<dyn FnMut(&[PoseRecord]) + Send>;

/// Handle for changing the topology of a running [`HostLink`] from another
/// thread, e.g. a [`ManagerLink`](super::ManagerLink) applying a
/// `TopologyUpdate`.
#[derive(Clone, Debug)]
pub struct TopologyHandle {
    slot: Arc<TopologySlot>,
}

impl TopologyHandle {
    /// Install `topology`. Bytes already buffered for the old one are dropped.
    pub fn update(&self, topology: Topology) {
        log::info!("[link] topology -> {}", topology.expanded());
        self.slot.replace(topology);
    }

    pub fn current(&self) -> Arc<Topology> {
        self.slot.current()
    }
}

/// Active host (driver) connection.
pub struct HostLink {
    core: LinkCore,
    slot: Arc<TopologySlot>,
    sink: Mutex<Option<BoxedPoseSink>>,
    latest: Arc<Mutex<Option<Vec<PoseRecord>>>>,
}

impl HostLink {
    pub fn new(topology: Topology, config: LinkConfig) -> Self {
        Self {
            core: LinkCore::new("host", PeerRole::Driver, config),
            slot: Arc::new(TopologySlot::new(topology)),
            sink: Mutex::new(None),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Called on the `receive` thread with every decoded frame.
    pub fn with_pose_sink<F>(self, sink: F) -> Self
    where
        F: FnMut(&[PoseRecord]) + Send + 'static,
    {
        *self.sink.lock() = Some(Box::new(sink));
        self
    }

    /// Records of the last decoded frame.
    pub fn latest(&self) -> Option<Vec<PoseRecord>> {
        self.latest.lock().clone()
    }

    pub fn topology(&self) -> Arc<Topology> {
        self.slot.current()
    }

    pub fn topology_handle(&self) -> TopologyHandle {
        TopologyHandle {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Switch to a new topology. Any partially buffered frame is dropped.
    pub fn update_topology(&self, topology: Topology) -> Result<()> {
        if self.core.registry().is_none() {
            return Err(Error::StartBeforeReady("update_topology"));
        }
        self.topology_handle().update(topology);
        Ok(())
    }

    /// Push a free-form message back to the poser.
    ///
    /// `payload` must not contain the frame terminator.
    pub fn send_message(&self, payload: &[u8]) -> Result<()> {
        self.core
            .write_frame("send_message", &frame_payload(payload))
    }

    /// Connect to the configured server and start receiving.
    pub fn start(&self) -> Result<()> {
        self.core.start(|registry, wiring| self.register_roles(registry, wiring))
    }

    /// Start on an already connected stream.
    pub fn start_with_stream<S: ByteStream + 'static>(&self, stream: S) -> Result<()> {
        self.core
            .start_on(Box::new(stream), |registry, wiring| {
                self.register_roles(registry, wiring)
            })
    }

    fn register_roles(&self, registry: &ThreadRegistry, wiring: &Wiring) -> Result<()> {
        let config = self.core.config();
        let latest = Arc::clone(&self.latest);
        let mut user = self.sink.lock().take();
        let sink = move |records: &[PoseRecord]| {
            if let Some(sink) = user.as_mut() {
                sink(records);
            }
            *latest.lock() = Some(records.to_vec());
        };

        let buffer = ReceiveBuffer::for_frame_len(
            self.slot.current().frame_len(),
            config.recv_buffer_frames,
        );
        let receiver = ReceiverEngine::new(
            wiring.reader()?,
            buffer,
            PoseDecoder::new(Arc::clone(&self.slot), sink),
            self.core.metrics(),
        )
        .with_topology(Arc::clone(&self.slot));
        registry.register(RECEIVE_ROLE, config.recv_interval, receiver)
    }

    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    pub fn wait(&self) -> Result<()> {
        self.core.wait()
    }

    pub fn state(&self) -> LinkState {
        self.core.state()
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        self.core.metrics()
    }

    pub fn registry(&self) -> Option<Arc<ThreadRegistry>> {
        self.core.registry()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use crate::pose::{BasePose, ControllerPose, DeviceKind};
    use crate::stream::mock::MockStream;
    use std::time::Duration;

    fn fast_config() -> LinkConfig {
        LinkConfig::default().with_close_interval(Duration::from_millis(5))
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_decodes_frames_in_order() {
        let mock = MockStream::new().with_chunk(7);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let frames_in = Arc::clone(&frames);
        let link = HostLink::new(Topology::parse("h c").unwrap(), fast_config())
            .with_pose_sink(move |r: &[PoseRecord]| frames_in.lock().push(r.to_vec()));
        link.start_with_stream(mock.clone()).unwrap();

        let controller = PoseRecord::Controller(ControllerPose {
            pose: BasePose::at([0.1, 0.0, 0.0]),
            ..Default::default()
        });
        let records = vec![PoseRecord::Headset(BasePose::at([0.0, 0.0, 0.0])), controller];
        mock.feed_read_data(&frame::frame(&records));
        mock.feed_read_data(&frame::frame(&records));

        wait_for(|| frames.lock().len() == 2);
        link.stop().unwrap();

        let got = frames.lock();
        assert_eq!(got[0], records);
        assert_eq!(got[1][1].kind(), DeviceKind::Controller);
        assert_eq!(got[1][1].base().position, [0.1, 0.0, 0.0]);
        assert_eq!(link.latest().unwrap(), records);
        assert!(mock.get_written_data().starts_with(b"hello\n"));
    }

    #[test]
    fn test_update_topology_switches_decoder() {
        let mock = MockStream::new();
        let link = HostLink::new(Topology::parse("h").unwrap(), fast_config());
        link.start_with_stream(mock.clone()).unwrap();

        let handle = link.topology_handle();
        link.update_topology(Topology::parse("t t").unwrap()).unwrap();
        assert_eq!(handle.current().descriptor(), "t t");
        wait_for(|| link.metrics().snapshot().resyncs == 1);

        let trackers = Topology::parse("t t").unwrap().default_records();
        mock.feed_read_data(&frame::frame(&trackers));
        wait_for(|| link.latest().is_some());
        link.stop().unwrap();

        assert_eq!(link.latest().unwrap().len(), 2);
        assert_eq!(link.metrics().frames_dropped(), 0);
    }

    #[test]
    fn test_send_message_is_framed() {
        let mock = MockStream::new();
        let link = HostLink::new(Topology::parse("h").unwrap(), fast_config());
        link.start_with_stream(mock.clone()).unwrap();
        link.send_message(b"rumble").unwrap();
        link.stop().unwrap();

        let written = mock.get_written_data();
        assert_eq!(&written[..6], b"hello\n");
        assert_eq!(&written[6..15], b"rumble\t\r\n");
    }

    #[test]
    fn test_calls_before_start() {
        let link = HostLink::new(Topology::parse("h").unwrap(), fast_config());
        assert!(matches!(
            link.update_topology(Topology::parse("c").unwrap()),
            Err(Error::StartBeforeReady("update_topology"))
        ));
        assert!(matches!(
            link.send_message(b"x"),
            Err(Error::StartBeforeReady("send_message"))
        ));
        assert!(matches!(link.wait(), Err(Error::StartBeforeReady("wait"))));
        assert_eq!(link.topology().descriptor(), "h");
    }
}
