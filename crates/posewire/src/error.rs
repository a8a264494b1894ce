// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for posewire.
//!
//! Errors fall in two groups:
//!
//! - **Setup errors** (`InvalidTopology`, `DuplicateRegistration`, `Connection`,
//!   `Handshake`, `StartBeforeReady`, `AlreadyStarted`, `ThreadSpawn`) abort
//!   construction and are returned to the caller synchronously.
//! - **Per-frame errors** (`MalformedRecord`, `MalformedFrame`,
//!   `UnknownControlMessage`, `MalformedControl`) are isolated to one frame:
//!   the receive loop logs them, drops the frame and keeps running.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::pose::DeviceKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// posewire errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid topology {descriptor:?}: {reason}")]
    InvalidTopology { descriptor: String, reason: String },

    #[error("thread {0:?} is already registered")]
    DuplicateRegistration(String),

    #[error("malformed {kind} record: expected {expected} bytes, got {got}")]
    MalformedRecord {
        kind: DeviceKind,
        expected: usize,
        got: usize,
    },

    #[error("malformed frame: expected {expected} bytes, got {got}")]
    MalformedFrame { expected: usize, got: usize },

    #[error("unknown control message type {0}")]
    UnknownControlMessage(u32),

    #[error("malformed control message: {0}")]
    MalformedControl(String),

    #[error("connection error{}: {source}", addr.map(|a| format!(" ({a})")).unwrap_or_default())]
    Connection {
        addr: Option<SocketAddr>,
        #[source]
        source: io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("{0} called before the link was started")]
    StartBeforeReady(&'static str),

    #[error("already started")]
    AlreadyStarted,

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a `Connection` error for a known peer.
    pub fn connection(addr: SocketAddr, source: io::Error) -> Self {
        Error::Connection {
            addr: Some(addr),
            source,
        }
    }

    /// Build an `InvalidTopology` error.
    pub fn invalid_topology(descriptor: &str, reason: impl Into<String>) -> Self {
        Error::InvalidTopology {
            descriptor: descriptor.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error ends the operation that raised it.
    ///
    /// Per-frame errors return `false`: the caller drops the frame and continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::MalformedRecord { .. }
                | Error::MalformedFrame { .. }
                | Error::UnknownControlMessage(_)
                | Error::MalformedControl(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_errors_are_not_fatal() {
        let err = Error::MalformedRecord {
            kind: DeviceKind::Controller,
            expected: 88,
            got: 52,
        };
        assert!(!err.is_fatal());
        assert!(!Error::MalformedFrame {
            expected: 195,
            got: 12
        }
        .is_fatal());
        assert!(!Error::UnknownControlMessage(99).is_fatal());
    }

    #[test]
    fn test_setup_errors_are_fatal() {
        assert!(Error::invalid_topology("x", "bad").is_fatal());
        assert!(Error::DuplicateRegistration("send".into()).is_fatal());
        assert!(Error::StartBeforeReady("stop").is_fatal());
    }

    #[test]
    fn test_connection_display_includes_addr() {
        let addr: SocketAddr = "127.0.0.1:6969".parse().unwrap();
        let err = Error::connection(
            addr,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:6969"), "{}", text);
        assert!(text.contains("refused"), "{}", text);
    }
}
