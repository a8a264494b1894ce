// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Manager side of a link: applies control messages and replies.
//!
//! ```text
//!   523-byte frame ──► ControlMessage::decode ──► ControlHandler::handle ──► reply
//!                          │ unknown type / bad fields                          ▲
//!                          └──────────────────────► Rejected ───────────────────┘
//!   any other length ──► ignored (replies of other managers travel here too)
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{LinkCore, LinkState, TopologyHandle, Wiring, RECEIVE_ROLE};
use crate::config::LinkConfig;
use crate::control::{ControlHandler, ControlMessage, ControlReply, CONTROL_FRAME_LEN};
use crate::error::{Error, Result};
use crate::frame::{ReceiveBuffer, MIN_FRAMES_PER_BUFFER};
use crate::handshake::PeerRole;
use crate::metrics::LinkMetrics;
use crate::receiver::{FrameHandler, ReceiverEngine};
use crate::registry::ThreadRegistry;
use crate::stream::{ByteStream, SharedWriter};

/// Decodes control frames, runs the handler and writes its reply.
pub struct ControlDispatcher<H> {
    handler: H,
    writer: SharedWriter,
    topology: Option<TopologyHandle>,
    metrics: Arc<LinkMetrics>,
}

impl<H: ControlHandler> ControlDispatcher<H> {
    pub fn new(handler: H, writer: SharedWriter, metrics: Arc<LinkMetrics>) -> Self {
        Self {
            handler,
            writer,
            topology: None,
            metrics,
        }
    }

    /// Apply every `TopologyUpdate` to `handle` before the handler sees it.
    pub fn with_topology_handle(mut self, handle: TopologyHandle) -> Self {
        self.topology = Some(handle);
        self
    }

    fn reply_to(&mut self, frame: &[u8]) -> ControlReply {
        match ControlMessage::decode(frame) {
            Ok(msg) => {
                log::debug!("[link] control message {:?}", msg);
                if let (ControlMessage::TopologyUpdate(topology), Some(handle)) =
                    (&msg, &self.topology)
                {
                    handle.update(topology.clone());
                }
                self.handler.handle(&msg)
            }
            Err(e) => {
                log::warn!("[link] rejecting control frame: {}", e);
                ControlReply::Rejected
            }
        }
    }
}

impl<H: ControlHandler> FrameHandler for ControlDispatcher<H> {
    fn on_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() != CONTROL_FRAME_LEN {
            log::debug!("[link] ignoring {} byte frame", frame.len());
            return Ok(());
        }

        let reply = self.reply_to(frame);
        self.metrics.record_control_message();
        let bytes = reply.encode();
        let mut writer = self.writer.lock();
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }
}

/// Active manager connection, the receiving end of control messages.
pub struct ManagerLink<H> {
    core: LinkCore,
    handler: Mutex<Option<H>>,
    topology: Option<TopologyHandle>,
}

impl<H: ControlHandler> ManagerLink<H> {
    pub fn new(config: LinkConfig, handler: H) -> Self {
        Self {
            core: LinkCore::new("manager", PeerRole::Manager, config),
            handler: Mutex::new(Some(handler)),
            topology: None,
        }
    }

    /// Forward topology updates to a host link.
    pub fn with_topology_handle(mut self, handle: TopologyHandle) -> Self {
        self.topology = Some(handle);
        self
    }

    /// Connect to the configured server and start serving control messages.
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
        let handler = self.handler.lock().take().ok_or(Error::AlreadyStarted)?;
        let metrics = self.core.metrics();

        let mut dispatcher =
            ControlDispatcher::new(handler, Arc::clone(&wiring.writer), Arc::clone(&metrics));
        if let Some(handle) = &self.topology {
            dispatcher = dispatcher.with_topology_handle(handle.clone());
        }
        let receiver = ReceiverEngine::new(
            wiring.reader()?,
            ReceiveBuffer::for_frame_len(CONTROL_FRAME_LEN, MIN_FRAMES_PER_BUFFER),
            dispatcher,
            metrics,
        );
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
