// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay event loop.
//!
//! One thread, one `mio::Poll`, every peer non-blocking:
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                         Relay                               |
//! |  +-------------------------------------------------------+  |
//! |  |                    mio::Poll                          |  |
//! |  |  - TcpListener (accept new peers)                     |  |
//! |  |  - TcpStreams  (read frames / flush backlogs)         |  |
//! |  |  - Waker       (stop request from RelayHandle)        |  |
//! |  +-------------------------------------------------------+  |
//! |                              |                              |
//! |                              v                              |
//! |  +-------------+    +----------------+    +-------------+  |
//! |  |  identity   |--->| ReceiveBuffer  |--->|   route     |  |
//! |  |    line     |    | (per peer)     |    | to backlogs |  |
//! |  +-------------+    +----------------+    +-------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! Each peer's bytes are reassembled into whole frames before routing, so
//! frames from two senders never interleave on a receiver. A frame from
//! `sender` goes to every other identified peer `p` with
//! `p.receives_from(sender)`: pose peers (posers, drivers) talk among
//! themselves, control peers among themselves, and posers hear everything.
//!
//! `CLOSE\n`, EOF, a read/write error or a frame over `max_frame_size` ends a
//! peer. `CLOSE\n` itself is not forwarded.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use thiserror::Error;
use tracing::{debug, info, warn};

use posewire::frame::MIN_BUFFER_CAPACITY;
use posewire::handshake::split_id_line;
use posewire::{PeerRole, ReceiveBuffer, CLOSE_LINE};

use crate::config::{ConfigError, RelayConfig};

// ============================================================================
// Constants
// ============================================================================

/// Token for the TCP listener
const LISTENER_TOKEN: Token = Token(0);

/// Token for the waker (stop requests)
const WAKER_TOKEN: Token = Token(1);

/// Starting token for peers
const PEER_TOKEN_START: usize = 2;

/// Default poll timeout
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 128;

// ============================================================================
// Errors and stats
// ============================================================================

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Global relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub connections_accepted: AtomicU64,
    pub connections_refused: AtomicU64,
    pub connections_closed: AtomicU64,
    pub handshakes: AtomicU64,
    pub frames_routed: AtomicU64,
    pub bytes_routed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub oversized_frames: AtomicU64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let accepted = self.connections_accepted.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        RelayStatsSnapshot {
            connections_accepted: accepted,
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            connections_closed: closed,
            active_peers: accepted.saturating_sub(closed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            bytes_routed: self.bytes_routed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_refused: u64,
    pub connections_closed: u64,
    pub active_peers: u64,
    pub handshakes: u64,
    pub frames_routed: u64,
    pub bytes_routed: u64,
    pub frames_dropped: u64,
    pub oversized_frames: u64,
}

// ============================================================================
// Handle
// ============================================================================

/// Control handle for a relay running on another thread.
#[derive(Clone)]
pub struct RelayHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    stats: Arc<RelayStats>,
    local_addr: SocketAddr,
}

impl RelayHandle {
    /// Ask the loop to exit. Peers receive `CLOSE\n` on the way out.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake relay: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandle")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================================================
// Peer
// ============================================================================

enum ReadOutcome {
    Open,
    Close(String),
}

/// Per-connection state.
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    /// `None` until the identity line arrived
    role: Option<PeerRole>,
    rx: ReceiveBuffer,
    tx: Vec<u8>,
    tx_offset: usize,
    frames_in: u64,
    frames_out: u64,
    frames_dropped: u64,
}

impl Peer {
    fn new(stream: TcpStream, addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            addr,
            role: None,
            rx: ReceiveBuffer::new(MIN_BUFFER_CAPACITY).with_max_capacity(max_frame_size),
            tx: Vec::new(),
            tx_offset: 0,
            frames_in: 0,
            frames_out: 0,
            frames_dropped: 0,
        }
    }

    fn label(&self) -> String {
        match &self.role {
            Some(role) => format!("{} ({})", self.addr, role),
            None => self.addr.to_string(),
        }
    }

    fn pending(&self) -> usize {
        self.tx.len() - self.tx_offset
    }

    /// Read until `WouldBlock`, collecting complete frames.
    fn read_available(&mut self, frames: &mut Vec<Vec<u8>>, stats: &RelayStats) -> ReadOutcome {
        loop {
            match self.rx.read_from(&mut self.stream) {
                Ok(0) => {
                    return match self.drain(frames, stats) {
                        ReadOutcome::Open => ReadOutcome::Close("connection closed by peer".into()),
                        closed => closed,
                    }
                }
                Ok(_) => {
                    if let ReadOutcome::Close(reason) = self.drain(frames, stats) {
                        return ReadOutcome::Close(reason);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    RelayStats::bump(&stats.oversized_frames);
                    return ReadOutcome::Close(format!(
                        "frame exceeds {} bytes",
                        self.rx.max_capacity()
                    ));
                }
                Err(e) => return ReadOutcome::Close(format!("read error: {}", e)),
            }
        }
    }

    fn drain(&mut self, frames: &mut Vec<Vec<u8>>, stats: &RelayStats) -> ReadOutcome {
        if self.role.is_none() {
            match split_id_line(self.rx.as_slice()) {
                Ok(Some((role, used))) => {
                    self.rx.consume(used);
                    info!("{} identified as {}", self.addr, role);
                    RelayStats::bump(&stats.handshakes);
                    self.role = Some(role);
                }
                Ok(None) => return ReadOutcome::Open,
                Err(e) => return ReadOutcome::Close(e.to_string()),
            }
        }

        while let Some(frame) = self.rx.next_frame() {
            self.frames_in += 1;
            frames.push(frame);
        }

        if self.rx.as_slice().starts_with(CLOSE_LINE) {
            return ReadOutcome::Close("peer sent CLOSE".into());
        }
        ReadOutcome::Open
    }

    /// Append a frame to the backlog. `false` if the backlog is full.
    fn queue(&mut self, frame: &[u8], max_pending: usize) -> bool {
        if self.pending() + frame.len() > max_pending {
            self.frames_dropped += 1;
            return false;
        }
        if self.tx_offset > 0 && self.tx_offset >= self.tx.len() / 2 {
            self.tx.drain(..self.tx_offset);
            self.tx_offset = 0;
        }
        self.tx.extend_from_slice(frame);
        self.frames_out += 1;
        true
    }

    /// Write as much of the backlog as the socket takes.
    fn flush(&mut self) -> io::Result<()> {
        while self.tx_offset < self.tx.len() {
            match self.stream.write(&self.tx[self.tx_offset..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => self.tx_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if self.tx_offset == self.tx.len() {
            self.tx.clear();
            self.tx_offset = 0;
        }
        Ok(())
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Relay state and runner.
pub struct Relay {
    config: RelayConfig,
    poll: Poll,
    listener: TcpListener,
    peers: HashMap<Token, Peer>,
    next_token: usize,
    stats: Arc<RelayStats>,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    local_addr: SocketAddr,
}

impl Relay {
    /// Validate `config`, bind the listener and register it.
    pub fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.listen_addr())?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let local_addr = listener.local_addr()?;

        Ok(Self {
            config,
            poll,
            listener,
            peers: HashMap::new(),
            next_token: PEER_TOKEN_START,
            stats: Arc::new(RelayStats::default()),
            running: Arc::new(AtomicBool::new(true)),
            waker,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            running: Arc::clone(&self.running),
            waker: Arc::clone(&self.waker),
            stats: Arc::clone(&self.stats),
            local_addr: self.local_addr,
        }
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<(RelayHandle, JoinHandle<Result<(), RelayError>>)> {
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name("posewire-relay".to_string())
            .spawn(move || self.run())?;
        Ok((handle, thread))
    }

    /// Run the event loop until [`RelayHandle::stop`].
    pub fn run(mut self) -> Result<(), RelayError> {
        info!("{} listening on {}", self.config.name, self.local_addr);

        let mut events = Events::with_capacity(MAX_EVENTS);
        let stats_interval = Duration::from_secs(self.config.stats_interval_secs);
        let mut last_stats = Instant::now();

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(DEFAULT_POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.shutdown_peers();
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.handle_accept(),
                    WAKER_TOKEN => {}
                    token => {
                        if event.is_readable() || event.is_read_closed() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
            }

            if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
                self.report_stats();
                last_stats = Instant::now();
            }
        }

        self.shutdown_peers();
        info!("{} stopped", self.config.name);
        Ok(())
    }

    /// Handle incoming connections.
    fn handle_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.peers.len() >= self.config.max_peers {
                        warn!("refusing {}: {} peers connected", addr, self.peers.len());
                        RelayStats::bump(&self.stats.connections_refused);
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!("failed to register {}: {}", addr, e);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(self.config.nodelay) {
                        debug!("set_nodelay on {}: {}", addr, e);
                    }

                    debug!("accepted {}", addr);
                    RelayStats::bump(&self.stats.connections_accepted);
                    self.peers
                        .insert(token, Peer::new(stream, addr, self.config.max_frame_size));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Read from a peer, route what arrived, close it if the read said so.
    fn handle_readable(&mut self, token: Token) {
        let mut frames = Vec::new();
        let outcome = match self.peers.get_mut(&token) {
            Some(peer) => peer.read_available(&mut frames, &self.stats),
            None => return,
        };

        if !frames.is_empty() {
            self.route(token, &frames);
        }
        if let ReadOutcome::Close(reason) = outcome {
            self.close_peer(token, &reason);
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let result = match self.peers.get_mut(&token) {
            Some(peer) => peer.flush(),
            None => return,
        };
        if let Err(e) = result {
            self.close_peer(token, &format!("write error: {}", e));
        }
    }

    /// Fan `frames` out from `from` to every peer that receives from it.
    fn route(&mut self, from: Token, frames: &[Vec<u8>]) {
        let Some(sender) = self.peers.get(&from).and_then(|p| p.role.clone()) else {
            return;
        };

        let max_pending = self.config.max_pending_bytes;
        let mut broken = Vec::new();
        for (token, peer) in self.peers.iter_mut() {
            if *token == from {
                continue;
            }
            match &peer.role {
                Some(role) if role.receives_from(&sender) => {}
                _ => continue,
            }

            for frame in frames {
                if peer.queue(frame, max_pending) {
                    RelayStats::bump(&self.stats.frames_routed);
                    self.stats
                        .bytes_routed
                        .fetch_add(frame.len() as u64, Ordering::Relaxed);
                } else {
                    RelayStats::bump(&self.stats.frames_dropped);
                }
            }
            if let Err(e) = peer.flush() {
                broken.push((*token, format!("write error: {}", e)));
            }
        }

        for (token, reason) in broken {
            self.close_peer(token, &reason);
        }
    }

    fn close_peer(&mut self, token: Token, reason: &str) {
        let Some(mut peer) = self.peers.remove(&token) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut peer.stream);
        let _ = peer.stream.shutdown(Shutdown::Both);
        RelayStats::bump(&self.stats.connections_closed);
        info!(
            "{} disconnected: {} ({} frames in, {} out, {} dropped)",
            peer.label(),
            reason,
            peer.frames_in,
            peer.frames_out,
            peer.frames_dropped
        );
    }

    /// Best-effort CLOSE to every peer, then drop them all.
    fn shutdown_peers(&mut self) {
        let tokens: Vec<Token> = self.peers.keys().copied().collect();
        for token in tokens {
            if let Some(peer) = self.peers.get_mut(&token) {
                peer.tx.extend_from_slice(CLOSE_LINE);
                if let Err(e) = peer.flush() {
                    debug!("CLOSE to {} not delivered: {}", peer.addr, e);
                }
            }
            self.close_peer(token, "relay shutting down");
        }
    }

    fn report_stats(&self) {
        let s = self.stats.snapshot();
        info!(
            "--- {} peers, {} frames routed ({} bytes), {} dropped, {} refused ---",
            self.peers.len(),
            s.frames_routed,
            s.bytes_routed,
            s.frames_dropped,
            s.connections_refused
        );
        for peer in self.peers.values() {
            info!(
                "  {}: {} in, {} out, {} dropped, {} B pending",
                peer.label(),
                peer.frames_in,
                peer.frames_out,
                peer.frames_dropped,
                peer.pending()
            );
        }
    }
}
