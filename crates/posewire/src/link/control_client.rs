// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking request/reply client for the manager channel.
//!
//! Used by posers and command-line tools to push a setting to the host: one
//! [`ControlMessage`] out, one [`ControlReply`] back. No roles, no threads.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use super::connect;
use crate::config::LinkConfig;
use crate::control::{ControlMessage, ControlReply, CONTROL_FRAME_LEN};
use crate::error::{Error, Result};
use crate::frame::{ReceiveBuffer, MIN_BUFFER_CAPACITY};
use crate::handshake::{send_id_line, PeerRole, CLOSE_LINE};
use crate::stream::is_transient;

/// Default time to wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ControlClient {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: ReceiveBuffer,
    reply_timeout: Duration,
}

impl ControlClient {
    /// Connect and announce the manager role.
    pub fn connect(config: &LinkConfig) -> Result<Self> {
        Self::from_stream(connect(config)?)
    }

    /// Announce the manager role on an already connected stream.
    pub fn from_stream(mut stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        send_id_line(&mut stream, &PeerRole::Manager)?;
        Ok(Self {
            stream,
            peer,
            buffer: ReceiveBuffer::new(MIN_BUFFER_CAPACITY),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send `msg` and wait for the reply.
    ///
    /// Control frames from other managers sharing the relay are skipped.
    pub fn send(&mut self, msg: &ControlMessage) -> Result<ControlReply> {
        let bytes = msg.encode()?;
        self.stream
            .write_all(&bytes)
            .and_then(|()| self.stream.flush())
            .map_err(|e| Error::connection(self.peer, e))?;
        log::debug!("[ctl] sent type {} to {}", msg.message_type(), self.peer);
        self.read_reply()
    }

    fn read_reply(&mut self) -> Result<ControlReply> {
        let deadline = Instant::now() + self.reply_timeout;
        loop {
            while let Some(frame) = self.buffer.next_frame() {
                if frame.len() != CONTROL_FRAME_LEN {
                    return Ok(ControlReply::parse(&frame));
                }
            }
            if self.buffer.as_slice().starts_with(CLOSE_LINE) {
                return Err(Error::connection(
                    self.peer,
                    io::Error::new(io::ErrorKind::ConnectionAborted, "peer sent CLOSE"),
                ));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::connection(
                    self.peer,
                    io::Error::new(io::ErrorKind::TimedOut, "no control reply"),
                ));
            }
            self.stream.set_read_timeout(Some(remaining))?;

            match self.buffer.read_from(&mut self.stream) {
                Ok(0) => {
                    return Err(Error::connection(
                        self.peer,
                        io::Error::from(io::ErrorKind::UnexpectedEof),
                    ))
                }
                Ok(_) => {}
                Err(e) if is_transient(&e) => {}
                Err(e) => return Err(Error::connection(self.peer, e)),
            }
        }
    }

    /// Send CLOSE and shut the socket down.
    pub fn close(mut self) -> Result<()> {
        let sent = self.stream.write_all(CLOSE_LINE);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("[ctl] shutdown: {}", e);
        }
        sent.map_err(|e| Error::connection(self.peer, e))
    }
}
