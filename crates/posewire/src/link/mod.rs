// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session façades over one socket.
//!
//! A link owns a connection and the roles that run on it:
//!
//! ```text
//!              +---------------------- ThreadRegistry ----------------------+
//!              |  control (Supervisor)   send (SenderEngine)   receive      |
//!              |        |                     |                  |          |
//!              |   CLOSE + shutdown      SharedWriter       ReceiverEngine  |
//!              +--------|---------------------|------------------|----------+
//!                       +---------- one TcpStream (cloned fds) --+
//! ```
//!
//! | Link                       | Id      | Roles                      |
//! |----------------------------|---------|----------------------------|
//! | [`PoserLink`]              | `holla` | control, send, receive     |
//! | [`HostLink`]               | `hello` | control, receive           |
//! | [`ManagerLink`]            | `monky` | control, receive           |
//! | [`ControlClient`]          | `monky` | none (blocking request)    |
//!
//! # State Machine
//!
//! ```text
//!      +----------+
//!      |   Idle   |
//!      +----+-----+
//!           | start()
//!           v
//!      +----------+
//!      | Running  |--(peer closed / write error)--+
//!      +----+-----+                               |
//!           | stop()                              |
//!           v                                     |
//!      +----------+                               |
//!      | Stopping |<------------------------------+
//!      +----+-----+
//!           | every role joined
//!           v
//!      +----------+
//!      |  Closed  |
//!      +----------+
//! ```

mod control_client;
mod host;
mod manager;
mod poser;

pub use control_client::ControlClient;
pub use host::{HostLink, TopologyHandle};
pub use manager::{ControlDispatcher, ManagerLink};
pub use poser::PoserLink;

use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::handshake::{send_id_line, PeerRole};
use crate::metrics::LinkMetrics;
use crate::registry::{ThreadRegistry, ThreadState};
use crate::stream::{shared_writer, BoxedByteStream, SharedWriter};
use crate::supervisor::{Supervisor, CONTROL_ROLE};

/// Name of the pose sending role.
pub const SEND_ROLE: &str = "send";

/// Name of the socket reading role.
pub const RECEIVE_ROLE: &str = "receive";

// ============================================================================
// Link State
// ============================================================================

/// Lifecycle of a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Not started
    #[default]
    Idle,

    /// Roles running
    Running,

    /// Stop requested, roles still winding down
    Stopping,

    /// Every role has stopped
    Closed,
}

impl LinkState {
    /// Check if the link can send/receive data.
    pub fn is_operational(&self) -> bool {
        matches!(self, LinkState::Running)
    }

    /// Check if the link is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Closed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Idle => "Idle",
            LinkState::Running => "Running",
            LinkState::Stopping => "Stopping",
            LinkState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Connect
// ============================================================================

/// Single connect attempt to the configured server, with the configured
/// timeout and socket options. No retry.
pub fn connect(config: &LinkConfig) -> Result<TcpStream> {
    let addr = config.server_addr();
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::connection(addr, e))?;

    if config.socket_send_buffer > 0 {
        socket
            .set_send_buffer_size(config.socket_send_buffer)
            .map_err(|e| Error::connection(addr, e))?;
    }
    if config.socket_recv_buffer > 0 {
        socket
            .set_recv_buffer_size(config.socket_recv_buffer)
            .map_err(|e| Error::connection(addr, e))?;
    }

    socket
        .connect_timeout(&SockAddr::from(addr), config.connect_timeout)
        .map_err(|e| Error::connection(addr, e))?;

    let stream: TcpStream = socket.into();
    stream
        .set_nodelay(config.nodelay)
        .map_err(|e| Error::connection(addr, e))?;
    log::info!("[link] connected to {}", addr);
    Ok(stream)
}

// ============================================================================
// Wiring
// ============================================================================

/// Per-role handles to one connected stream.
pub(crate) struct Wiring {
    pub writer: SharedWriter,
    pub peer: SocketAddr,
    stream: BoxedByteStream,
}

impl Wiring {
    fn new(stream: BoxedByteStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let writer = shared_writer(stream.try_clone_box()?);
        Ok(Self {
            writer,
            peer,
            stream,
        })
    }

    /// A fresh handle for a reading role.
    pub fn reader(&self) -> Result<BoxedByteStream> {
        Ok(self.stream.try_clone_box()?)
    }
}

struct Session {
    registry: Arc<ThreadRegistry>,
    writer: SharedWriter,
    peer: SocketAddr,
}

/// Connection, roles and lifecycle shared by every link type.
pub(crate) struct LinkCore {
    kind: &'static str,
    role: PeerRole,
    config: LinkConfig,
    metrics: Arc<LinkMetrics>,
    session: Mutex<Option<Session>>,
}

impl LinkCore {
    pub fn new(kind: &'static str, role: PeerRole, config: LinkConfig) -> Self {
        Self {
            kind,
            role,
            config,
            metrics: Arc::new(LinkMetrics::new()),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Connect to the configured server, then start on that socket.
    pub fn start<F>(&self, register: F) -> Result<()>
    where
        F: FnOnce(&ThreadRegistry, &Wiring) -> Result<()>,
    {
        if self.session.lock().is_some() {
            return Err(Error::AlreadyStarted);
        }
        self.config
            .validate()
            .map_err(|reason| Error::Handshake(format!("invalid link config: {reason}")))?;
        let stream = connect(&self.config)?;
        self.start_on(Box::new(stream), register)
    }

    /// Send the identity line on `stream`, register the control role plus the
    /// roles added by `register`, and start them.
    pub fn start_on<F>(&self, mut stream: BoxedByteStream, register: F) -> Result<()>
    where
        F: FnOnce(&ThreadRegistry, &Wiring) -> Result<()>,
    {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(Error::AlreadyStarted);
        }

        send_id_line(&mut stream, &self.role)?;
        // Bounded reads let the receive role notice a stop even if shutdown fails.
        stream.set_read_timeout(Some(self.config.close_interval))?;

        let wiring = Wiring::new(stream)?;
        let registry = ThreadRegistry::new(format!("posewire-{}", self.kind));
        registry.register(
            CONTROL_ROLE,
            self.config.close_interval,
            Supervisor::new(
                Arc::clone(&wiring.writer),
                wiring.stream.try_clone_box()?,
                self.config.close_interval,
            ),
        )?;
        register(&registry, &wiring)?;
        registry.start_all()?;

        log::info!(
            "[link] {} link to {} running as {:?} ({} roles)",
            self.kind,
            wiring.peer,
            self.role.id(),
            registry.len()
        );
        *session = Some(Session {
            registry: Arc::new(registry),
            writer: wiring.writer,
            peer: wiring.peer,
        });
        Ok(())
    }

    fn registry_for(&self, op: &'static str) -> Result<Arc<ThreadRegistry>> {
        self.session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.registry))
            .ok_or(Error::StartBeforeReady(op))
    }

    /// Request stop on every role, then join: control first, the rest in order.
    pub fn stop(&self) -> Result<()> {
        let registry = self.registry_for("stop")?;
        registry.request_stop_all();
        let panicked = registry.join_all();
        if !panicked.is_empty() {
            log::warn!("[link] roles panicked: {}", panicked.join(", "));
        }
        log::info!("[link] {} link stopped", self.kind);
        Ok(())
    }

    /// Block until the link ends on its own.
    pub fn wait(&self) -> Result<()> {
        let registry = self.registry_for("wait")?;
        registry.join_all();
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            return LinkState::Idle;
        };
        if session.registry.all_stopped() {
            LinkState::Closed
        } else if session.registry.state(CONTROL_ROLE) == Some(ThreadState::Running) {
            LinkState::Running
        } else {
            LinkState::Stopping
        }
    }

    pub fn registry(&self) -> Option<Arc<ThreadRegistry>> {
        self.session.lock().as_ref().map(|s| Arc::clone(&s.registry))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.lock().as_ref().map(|s| s.peer)
    }

    /// Write one pre-framed message through the shared writer.
    pub fn write_frame(&self, op: &'static str, frame: &[u8]) -> Result<()> {
        use std::io::Write;

        let writer = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.writer))
            .ok_or(Error::StartBeforeReady(op))?;
        let mut w = writer.lock();
        w.write_all(frame)?;
        w.flush()?;
        Ok(())
    }
}
