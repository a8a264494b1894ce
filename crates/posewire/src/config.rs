// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link configuration.
//!
//! # Example
//!
//! ```
//! use posewire::LinkConfig;
//! use std::time::Duration;
//!
//! let config = LinkConfig {
//!     port: 7000,
//!     send_interval: Duration::from_millis(4),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::MIN_FRAMES_PER_BUFFER;

/// Default server port.
pub const DEFAULT_PORT: u16 = 6969;

/// Settings shared by poser, host and manager links.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // === Endpoint ===
    /// Server address
    pub address: IpAddr,

    /// Server port
    pub port: u16,

    // === Cadence ===
    /// Pause between two frames sent by a poser
    #[serde(with = "millis")]
    pub send_interval: Duration,

    /// Poll interval of the receive role
    #[serde(with = "millis")]
    pub recv_interval: Duration,

    /// Poll interval of the control role
    #[serde(with = "millis")]
    pub close_interval: Duration,

    // === Socket ===
    /// Timeout for the single connect attempt
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub nodelay: bool,

    /// Receive buffer capacity, in frames (at least 4)
    pub recv_buffer_frames: usize,

    /// SO_SNDBUF in bytes (0 = OS default)
    pub socket_send_buffer: usize,

    /// SO_RCVBUF in bytes (0 = OS default)
    pub socket_recv_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            send_interval: Duration::from_millis(10),
            recv_interval: Duration::from_millis(1),
            close_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
            recv_buffer_frames: 8,
            socket_send_buffer: 0,
            socket_recv_buffer: 0,
        }
    }
}

impl LinkConfig {
    /// Server socket address.
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn with_server(mut self, addr: SocketAddr) -> Self {
        self.address = addr.ip();
        self.port = addr.port();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// Send at `hz` frames per second.
    pub fn with_rate(mut self, hz: f64) -> Self {
        if hz > 0.0 {
            self.send_interval = Duration::from_secs_f64(1.0 / hz);
        }
        self
    }

    pub fn with_recv_interval(mut self, interval: Duration) -> Self {
        self.recv_interval = interval;
        self
    }

    pub fn with_close_interval(mut self, interval: Duration) -> Self {
        self.close_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_recv_buffer_frames(mut self, frames: usize) -> Self {
        self.recv_buffer_frames = frames;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.port == 0 {
            return Err("port must be > 0");
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0");
        }
        if self.close_interval.is_zero() {
            return Err("close_interval must be > 0");
        }
        if self.recv_buffer_frames < MIN_FRAMES_PER_BUFFER {
            return Err("recv_buffer_frames must be >= 4");
        }
        Ok(())
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
