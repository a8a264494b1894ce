// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Poser side of a link: streams the pose board, listens for host messages.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{LinkCore, LinkState, RECEIVE_ROLE, SEND_ROLE};
use crate::board::PoseBoard;
use crate::config::LinkConfig;
use crate::error::Result;
use crate::frame::{ReceiveBuffer, MIN_BUFFER_CAPACITY};
use crate::handshake::PeerRole;
use crate::metrics::LinkMetrics;
use crate::receiver::{MessageForwarder, ReceiverEngine};
use crate::registry::ThreadRegistry;
use crate::sender::{SenderEngine, SenderState, SenderStatus};
use crate::stream::ByteStream;
use crate::topology::Topology;

type BoxedMessageHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Active poser connection.
///
/// ```ignore
/// let link = PoserLink::new(Topology::parse("h c c")?, LinkConfig::default());
/// link.start()?;
/// link.board().update_pose(0, |p| p.position = [0.0, 1.6, 0.0]);
/// ```
pub struct PoserLink {
    core: LinkCore,
    board: PoseBoard,
    handler: Mutex<Option<BoxedMessageHandler>>,
    last_message: Arc<Mutex<Option<Vec<u8>>>>,
    status: Mutex<Option<Arc<SenderStatus>>>,
}

impl PoserLink {
    pub fn new(topology: Topology, config: LinkConfig) -> Self {
        Self {
            core: LinkCore::new("poser", PeerRole::Poser, config),
            board: PoseBoard::new(topology),
            handler: Mutex::new(None),
            last_message: Arc::new(Mutex::new(None)),
            status: Mutex::new(None),
        }
    }

    /// Called with every message the host pushes back, terminator stripped.
    pub fn with_message_handler<F>(self, handler: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        *self.handler.lock() = Some(Box::new(handler));
        self
    }

    /// Board streamed by the `send` role. Clones share state.
    pub fn board(&self) -> PoseBoard {
        self.board.clone()
    }

    /// Most recent host message.
    pub fn last_message(&self) -> Option<Vec<u8>> {
        self.last_message.lock().clone()
    }

    pub fn sender_state(&self) -> SenderState {
        self.status
            .lock()
            .as_ref()
            .map_or(SenderState::Idle, |s| s.get())
    }

    /// Connect to the configured server and start streaming.
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

    fn register_roles(&self, registry: &ThreadRegistry, wiring: &super::Wiring) -> Result<()> {
        let config = self.core.config();
        let metrics = self.core.metrics();

        let sender = SenderEngine::new(
            self.board.clone(),
            Arc::clone(&wiring.writer),
            Arc::clone(&metrics),
        );
        *self.status.lock() = Some(sender.status());
        registry.register(SEND_ROLE, config.send_interval, sender)?;

        let last = Arc::clone(&self.last_message);
        let mut user = self.handler.lock().take();
        let forward = move |payload: &[u8]| {
            *last.lock() = Some(payload.to_vec());
            match user.as_mut() {
                Some(handler) => handler(payload),
                None => log::debug!(
                    "[link] host message: {:?}",
                    String::from_utf8_lossy(payload)
                ),
            }
        };
        let receiver = ReceiverEngine::new(
            wiring.reader()?,
            ReceiveBuffer::new(MIN_BUFFER_CAPACITY),
            MessageForwarder::new(forward),
            metrics,
        );
        registry.register(RECEIVE_ROLE, config.recv_interval, receiver)?;
        Ok(())
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
    use crate::error::Error;
    use crate::frame::{frame_payload, Extract};
    use crate::handshake::CLOSE_LINE;
    use crate::registry::ThreadState;
    use crate::stream::mock::MockStream;
    use crate::supervisor::CONTROL_ROLE;
    use std::time::Duration;

    fn fast_config() -> LinkConfig {
        LinkConfig::default()
            .with_send_interval(Duration::from_millis(2))
            .with_close_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_streams_after_handshake() {
        let mock = MockStream::new();
        let link = PoserLink::new(Topology::parse("h c").unwrap(), fast_config());
        link.board().update_pose(1, |p| p.position = [0.1, 0.0, 0.0]);
        link.start_with_stream(mock.clone()).unwrap();
        assert_eq!(link.state(), LinkState::Running);
        assert_eq!(
            link.registry().unwrap().names(),
            vec![CONTROL_ROLE, SEND_ROLE, RECEIVE_ROLE]
        );

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(link.sender_state(), SenderState::Streaming);
        link.stop().unwrap();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(link.sender_state(), SenderState::Closed);

        let written = mock.get_written_data();
        assert!(written.starts_with(b"holla\n"));
        assert!(written.ends_with(CLOSE_LINE));

        let mut buf = ReceiveBuffer::new(4096);
        buf.extend_from_slice(&written[6..written.len() - CLOSE_LINE.len()]);
        let mut frames = 0;
        while let Extract::Frame(len) = buf.try_extract_frame() {
            assert_eq!(len, 143);
            let records = Topology::parse("h c")
                .unwrap()
                .decode_payload(&buf.frame(len)[..140])
                .unwrap();
            assert_eq!(records[1].base().position, [0.1, 0.0, 0.0]);
            buf.consume(len);
            frames += 1;
        }
        assert!(frames > 0);
        assert!(buf.is_empty());
        assert_eq!(link.metrics().frames_sent(), frames);
    }

    #[test]
    fn test_host_message_reaches_handler() {
        let mock = MockStream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let link = PoserLink::new(Topology::parse("t").unwrap(), fast_config())
            .with_message_handler(move |m: &[u8]| seen_in.lock().push(m.to_vec()));
        link.start_with_stream(mock.clone()).unwrap();

        mock.feed_read_data(&frame_payload(b"vibrate"));
        std::thread::sleep(Duration::from_millis(30));
        link.stop().unwrap();

        assert_eq!(link.last_message().as_deref(), Some(&b"vibrate"[..]));
        assert_eq!(*seen.lock(), vec![b"vibrate".to_vec()]);
    }

    #[test]
    fn test_peer_close_ends_every_role() {
        let mock = MockStream::new();
        let link = PoserLink::new(Topology::parse("h").unwrap(), fast_config());
        link.start_with_stream(mock.clone()).unwrap();

        mock.feed_read_data(CLOSE_LINE);
        link.wait().unwrap();

        let registry = link.registry().unwrap();
        for name in [CONTROL_ROLE, SEND_ROLE, RECEIVE_ROLE] {
            assert_eq!(registry.state(name), Some(ThreadState::Stopped));
        }
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_start_twice_rejected() {
        let link = PoserLink::new(Topology::parse("h").unwrap(), fast_config());
        link.start_with_stream(MockStream::new()).unwrap();
        assert!(matches!(
            link.start_with_stream(MockStream::new()),
            Err(Error::AlreadyStarted)
        ));
        link.stop().unwrap();
    }

    #[test]
    fn test_stop_before_start() {
        let link = PoserLink::new(Topology::parse("h").unwrap(), fast_config());
        assert!(matches!(link.stop(), Err(Error::StartBeforeReady(_))));
        assert_eq!(link.sender_state(), SenderState::Idle);
    }
}
