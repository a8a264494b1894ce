// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket read loop and frame dispatch.
//!
//! Registered as the `receive` role. Each tick performs one read into the
//! tail of a [`ReceiveBuffer`], then extracts and dispatches every complete
//! frame:
//!
//! ```text
//!   read ──► ReceiveBuffer ──► try_extract_frame ──► FrameHandler::on_frame
//!    │                              │  ▲                    │
//!    │                              ▼  │                    ▼ Err (per frame)
//!    │                           consume ◄──────────── log + drop, keep going
//!    ▼
//!   Ok(0) / hard error ──► Break (role stops, control role notices)
//! ```
//!
//! `WouldBlock`, `TimedOut` and `Interrupted` are not errors here: the tick
//! returns and the registry pauses for the receive poll interval.
//!
//! A topology change is a hard discontinuity. The [`TopologySlot`] carries a
//! generation counter; when it moves, the receiver throws away whatever is
//! buffered, partial frame included, before the next read.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::frame::{strip_terminator, Extract, ReceiveBuffer};
use crate::handshake::CLOSE_LINE;
use crate::metrics::LinkMetrics;
use crate::pose::PoseRecord;
use crate::registry::{KeepAlive, Tick, Worker};
use crate::stream::{is_transient, BoxedByteStream};
use crate::topology::Topology;

// ============================================================================
// Handler seams
// ============================================================================

/// Consumer of complete frames.
pub trait FrameHandler: Send + 'static {
    /// Handle one frame, terminator included.
    ///
    /// A non-fatal error drops this frame only.
    fn on_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Called once when the receive loop ends.
    fn on_close(&mut self) {}
}

/// Consumer of decoded pose frames.
pub trait PoseSink: Send + 'static {
    fn on_poses(&mut self, records: &[PoseRecord]);
}

impl<F> PoseSink for F
where
    F: FnMut(&[PoseRecord]) + Send + 'static,
{
    fn on_poses(&mut self, records: &[PoseRecord]) {
        self(records)
    }
}

/// Consumer of free-form messages (terminator stripped).
pub trait MessageHandler: Send + 'static {
    fn on_message(&mut self, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: FnMut(&[u8]) + Send + 'static,
{
    fn on_message(&mut self, payload: &[u8]) {
        self(payload)
    }
}

// ============================================================================
// TopologySlot
// ============================================================================

/// Live topology of a receiving link.
#[derive(Debug)]
pub struct TopologySlot {
    topology: RwLock<Arc<Topology>>,
    generation: AtomicU64,
}

impl TopologySlot {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: RwLock::new(Arc::new(topology)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<Topology> {
        Arc::clone(&self.topology.read())
    }

    /// Bumped by every [`TopologySlot::replace`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Install a new topology and start a new generation.
    pub fn replace(&self, topology: Topology) {
        *self.topology.write() = Arc::new(topology);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Decodes frames against the live topology and hands them to a [`PoseSink`].
pub struct PoseDecoder<S> {
    slot: Arc<TopologySlot>,
    sink: S,
}

impl<S: PoseSink> PoseDecoder<S> {
    pub fn new(slot: Arc<TopologySlot>, sink: S) -> Self {
        Self { slot, sink }
    }
}

impl<S: PoseSink> FrameHandler for PoseDecoder<S> {
    fn on_frame(&mut self, frame: &[u8]) -> Result<()> {
        let topology = self.slot.current();
        if frame.len() != topology.frame_len() {
            return Err(Error::MalformedFrame {
                expected: topology.frame_len(),
                got: frame.len(),
            });
        }
        let records = topology.decode_payload(strip_terminator(frame))?;
        self.sink.on_poses(&records);
        Ok(())
    }
}

/// Passes every frame payload through as raw bytes.
pub struct MessageForwarder<H> {
    handler: H,
}

impl<H: MessageHandler> MessageForwarder<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H: MessageHandler> FrameHandler for MessageForwarder<H> {
    fn on_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.handler.on_message(strip_terminator(frame));
        Ok(())
    }
}

// ============================================================================
// ReceiverEngine
// ============================================================================

/// Owns the read half of a link and its reassembly buffer.
pub struct ReceiverEngine<H> {
    reader: BoxedByteStream,
    buffer: ReceiveBuffer,
    handler: H,
    metrics: Arc<LinkMetrics>,
    slot: Option<Arc<TopologySlot>>,
    seen_generation: u64,
    peer_closed: bool,
}

impl<H: FrameHandler> ReceiverEngine<H> {
    pub fn new(
        reader: BoxedByteStream,
        buffer: ReceiveBuffer,
        handler: H,
        metrics: Arc<LinkMetrics>,
    ) -> Self {
        Self {
            reader,
            buffer,
            handler,
            metrics,
            slot: None,
            seen_generation: 0,
            peer_closed: false,
        }
    }

    /// Reset the buffer whenever `slot` moves to a new generation.
    pub fn with_topology(mut self, slot: Arc<TopologySlot>) -> Self {
        self.seen_generation = slot.generation();
        self.slot = Some(slot);
        self
    }

    /// Drop buffered bytes if the topology changed since the last tick.
    fn check_resync(&mut self) {
        let Some(slot) = &self.slot else {
            return;
        };
        let generation = slot.generation();
        if generation != self.seen_generation {
            let dropped = self.buffer.num_buffered();
            self.buffer.clear();
            self.seen_generation = generation;
            self.metrics.record_resync();
            log::info!(
                "[receiver] topology changed to {:?}, dropped {} buffered bytes",
                slot.current().descriptor(),
                dropped
            );
        }
    }

    /// Extract and dispatch every complete frame in the buffer.
    fn drain_frames(&mut self) {
        while let Extract::Frame(len) = self.buffer.try_extract_frame() {
            let frame = self.buffer.frame(len);
            self.metrics.record_frame_received();
            if let Err(e) = self.handler.on_frame(frame) {
                self.metrics.record_frame_dropped();
                if e.is_fatal() {
                    log::error!("[receiver] handler failed: {}", e);
                } else {
                    log::warn!("[receiver] dropping frame: {}", e);
                }
            }
            self.buffer.consume(len);
        }

        if self.buffer.as_slice().starts_with(CLOSE_LINE) {
            self.peer_closed = true;
        }
    }

    /// One read plus dispatch. Returns `false` when the loop should end.
    pub fn poll_once(&mut self) -> bool {
        self.check_resync();

        match self.buffer.read_from(&mut self.reader) {
            Ok(0) => {
                log::info!("[receiver] connection closed by peer");
                false
            }
            Ok(n) => {
                self.metrics.record_bytes_received(n);
                self.drain_frames();
                if self.peer_closed {
                    log::info!("[receiver] peer sent CLOSE");
                    return false;
                }
                true
            }
            Err(e) if is_transient(&e) => true,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                log::warn!("[receiver] {}, discarding buffer", e);
                self.buffer.clear();
                self.metrics.record_frame_dropped();
                true
            }
            Err(e) => {
                log::warn!("[receiver] read failed: {}", e);
                self.metrics.record_recv_error();
                false
            }
        }
    }
}

impl<H: FrameHandler> Worker for ReceiverEngine<H> {
    fn tick(&mut self, ctx: &KeepAlive) -> Tick {
        if self.poll_once() {
            Tick::Continue
        } else {
            if !ctx.is_alive() {
                log::debug!("[receiver] read ended after stop request");
            }
            Tick::Break
        }
    }

    fn finish(&mut self, _ctx: &KeepAlive) {
        self.handler.on_close();
        log::debug!(
            "[receiver] stopped after {} frames",
            self.buffer.frames_extracted()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use crate::pose::{BasePose, ControllerPose, DeviceKind};
    use crate::stream::mock::MockStream;
    use parking_lot::Mutex;

    type Collected = Arc<Mutex<Vec<Vec<PoseRecord>>>>;

    fn collecting_engine(
        mock: &MockStream,
        desc: &str,
    ) -> (ReceiverEngine<PoseDecoder<impl PoseSink>>, Collected, Arc<TopologySlot>) {
        let slot = Arc::new(TopologySlot::new(Topology::parse(desc).unwrap()));
        let collected: Collected = Arc::new(Mutex::new(Vec::new()));
        let sink_out = Arc::clone(&collected);
        let sink = move |records: &[PoseRecord]| sink_out.lock().push(records.to_vec());
        let engine = ReceiverEngine::new(
            Box::new(mock.clone()),
            ReceiveBuffer::for_frame_len(slot.current().frame_len(), 4),
            PoseDecoder::new(Arc::clone(&slot), sink),
            Arc::new(LinkMetrics::new()),
        )
        .with_topology(Arc::clone(&slot));
        (engine, collected, slot)
    }

    fn poll_until_idle<H: FrameHandler>(engine: &mut ReceiverEngine<H>, mock: &MockStream) {
        while engine.poll_once() && mock.pending() > 0 {}
    }

    #[test]
    fn test_h_c_scenario() {
        let mock = MockStream::new();
        let (mut engine, collected, _) = collecting_engine(&mock, "h c");

        let records = [
            PoseRecord::Headset(BasePose::at([0.0, 0.0, 0.0])),
            PoseRecord::Controller(ControllerPose {
                pose: BasePose::at([0.1, 0.0, 0.0]),
                ..Default::default()
            }),
        ];
        mock.feed_read_data(&frame::frame(&records));
        assert!(engine.poll_once());

        let got = collected.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].len(), 2);
        assert_eq!(got[0][0].kind(), DeviceKind::Headset);
        assert_eq!(got[0][0].base().position, [0.0, 0.0, 0.0]);
        assert_eq!(got[0][1].kind(), DeviceKind::Controller);
        assert_eq!(got[0][1].base().position, [0.1, 0.0, 0.0]);
        assert_eq!(got[0][1].base().orientation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_random_splits_yield_same_records() {
        let topology = Topology::parse("h c t").unwrap();
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for i in 0..20 {
            let mut records = topology.default_records();
            records[0].base_mut().position = [i as f32, 0.5, -0.5];
            records[2].base_mut().velocity = [0.0, i as f32 * 0.25, 0.0];
            stream.extend_from_slice(&frame::frame(&records));
            expected.push(records);
        }

        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..10 {
            let mock = MockStream::new().with_chunk(rng.usize(1..=300));
            let (mut engine, collected, _) = collecting_engine(&mock, "h c t");
            let mut offset = 0;
            while offset < stream.len() {
                let end = (offset + rng.usize(1..=200)).min(stream.len());
                mock.feed_read_data(&stream[offset..end]);
                offset = end;
                poll_until_idle(&mut engine, &mock);
            }
            poll_until_idle(&mut engine, &mock);
            assert_eq!(*collected.lock(), expected);
        }
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mock = MockStream::new();
        let (mut engine, collected, _) = collecting_engine(&mock, "h");

        mock.feed_read_data(&frame::frame_payload(b"garbage"));
        mock.feed_read_data(&frame::frame(&[PoseRecord::default_for(DeviceKind::Headset)]));
        poll_until_idle(&mut engine, &mock);

        assert_eq!(collected.lock().len(), 1);
        assert_eq!(engine.metrics.frames_dropped(), 1);
        assert_eq!(engine.metrics.frames_received(), 2);
    }

    #[test]
    fn test_eof_ends_loop() {
        let mock = MockStream::new();
        let (mut engine, collected, _) = collecting_engine(&mock, "t");
        mock.feed_read_data(&frame::frame(&[PoseRecord::default_for(DeviceKind::Tracker)]));
        mock.disconnect();

        assert!(engine.poll_once());
        assert!(!engine.poll_once());
        assert_eq!(collected.lock().len(), 1);
    }

    #[test]
    fn test_close_line_ends_loop() {
        let mock = MockStream::new();
        let (mut engine, _collected, _) = collecting_engine(&mock, "t");
        mock.feed_read_data(CLOSE_LINE);
        assert!(!engine.poll_once());
    }

    #[test]
    fn test_hard_read_error_ends_loop() {
        let mock = MockStream::new();
        let (mut engine, _collected, _) = collecting_engine(&mock, "t");
        mock.inject_read_error(io::ErrorKind::ConnectionReset);
        assert!(!engine.poll_once());
        assert_eq!(engine.metrics.snapshot().recv_errors, 1);
    }

    #[test]
    fn test_transient_errors_continue() {
        let mock = MockStream::new();
        let (mut engine, _collected, _) = collecting_engine(&mock, "t");
        mock.inject_read_error(io::ErrorKind::TimedOut);
        assert!(engine.poll_once());
        assert!(engine.poll_once()); // WouldBlock on empty queue
    }

    #[test]
    fn test_topology_change_drops_partial() {
        let mock = MockStream::new();
        let (mut engine, collected, slot) = collecting_engine(&mock, "h");

        let old = frame::frame(&[PoseRecord::default_for(DeviceKind::Headset)]);
        mock.feed_read_data(&old[..30]);
        assert!(engine.poll_once());
        assert_eq!(engine.buffer.num_buffered(), 30);

        slot.replace(Topology::parse("c").unwrap());
        let new = frame::frame(&[PoseRecord::default_for(DeviceKind::Controller)]);
        mock.feed_read_data(&new);
        poll_until_idle(&mut engine, &mock);

        let got = collected.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0][0].kind(), DeviceKind::Controller);
        assert_eq!(engine.metrics.snapshot().resyncs, 1);
    }

    #[test]
    fn test_message_forwarder_strips_terminator() {
        let mock = MockStream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        let mut engine = ReceiverEngine::new(
            Box::new(mock.clone()),
            ReceiveBuffer::new(64),
            MessageForwarder::new(move |payload: &[u8]| out.lock().push(payload.to_vec())),
            Arc::new(LinkMetrics::new()),
        );
        mock.feed_read_data(b"2000\t\r\nhi\t\r\n");
        assert!(engine.poll_once());
        assert_eq!(*seen.lock(), vec![b"2000".to_vec(), b"hi".to_vec()]);
    }
}
