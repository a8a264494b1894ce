// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection roles and the identity line.
//!
//! The active side opens every connection with a five-character id and a
//! newline. The passive side (the relay) uses it to decide where traffic
//! from that connection may go. A peer leaving on purpose sends
//! [`CLOSE_LINE`] before closing the socket.

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Graceful-close line.
pub const CLOSE_LINE: &[u8] = b"CLOSE\n";

/// Longest identity line accepted by [`read_id_line`] and [`split_id_line`].
pub const MAX_ID_LINE: usize = 50;

/// What a connection is used for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Produces device state (`holla`).
    Poser,
    /// Consumes device state (`hello`).
    Driver,
    /// Control channel (`monky`).
    Manager,
    /// Any other id.
    Other(String),
}

impl PeerRole {
    /// Five-character id, without the newline.
    pub fn id(&self) -> &str {
        match self {
            PeerRole::Poser => "holla",
            PeerRole::Driver => "hello",
            PeerRole::Manager => "monky",
            PeerRole::Other(id) => id,
        }
    }

    /// Identity line as written on the wire.
    pub fn id_line(&self) -> Vec<u8> {
        let mut line = self.id().as_bytes().to_vec();
        line.push(b'\n');
        line
    }

    /// Parse an id, with or without its newline.
    pub fn from_id_line(line: &[u8]) -> Self {
        let id = line.strip_suffix(b"\n").unwrap_or(line);
        let id = id.strip_suffix(b"\r").unwrap_or(id);
        match id {
            b"holla" => PeerRole::Poser,
            b"hello" => PeerRole::Driver,
            b"monky" => PeerRole::Manager,
            other => PeerRole::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    /// Whether the connection carries pose traffic.
    pub fn is_tracked(&self) -> bool {
        matches!(self, PeerRole::Poser | PeerRole::Driver)
    }

    /// Whether `self` should see a frame sent by `sender`.
    ///
    /// Tracked peers talk to tracked peers, control peers to control peers,
    /// and posers hear everything.
    pub fn receives_from(&self, sender: &PeerRole) -> bool {
        self.is_tracked() == sender.is_tracked() || *self == PeerRole::Poser
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Poser => write!(f, "poser"),
            PeerRole::Driver => write!(f, "driver"),
            PeerRole::Manager => write!(f, "manager"),
            PeerRole::Other(id) => write!(f, "other({id})"),
        }
    }
}

/// Write the identity line for `role`.
pub fn send_id_line<W: Write + ?Sized>(w: &mut W, role: &PeerRole) -> Result<()> {
    w.write_all(&role.id_line())
        .and_then(|()| w.flush())
        .map_err(|e| Error::Handshake(format!("sending {:?}: {}", role.id(), e)))
}

/// Blocking read of an identity line, one byte at a time so nothing past
/// the newline is consumed.
pub fn read_id_line<R: Read + ?Sized>(r: &mut R) -> Result<PeerRole> {
    let mut line = Vec::with_capacity(8);
    let mut byte = [0u8; 1];
    while line.len() < MAX_ID_LINE {
        match r.read(&mut byte) {
            Ok(0) => {
                return Err(Error::Handshake(
                    "connection closed before identity line".into(),
                ))
            }
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    return Ok(PeerRole::from_id_line(&line));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Handshake(format!("reading identity line: {e}"))),
        }
    }
    Err(Error::Handshake(format!(
        "no newline within {MAX_ID_LINE} bytes"
    )))
}

/// Split an identity line off the front of `buf`.
///
/// Returns the role and the bytes consumed, `Ok(None)` if the newline has not
/// arrived yet, or an error once [`MAX_ID_LINE`] bytes passed without one.
pub fn split_id_line(buf: &[u8]) -> Result<Option<(PeerRole, usize)>> {
    let window = &buf[..buf.len().min(MAX_ID_LINE)];
    match window.iter().position(|b| *b == b'\n') {
        Some(pos) => Ok(Some((PeerRole::from_id_line(&buf[..=pos]), pos + 1))),
        None if buf.len() >= MAX_ID_LINE => Err(Error::Handshake(format!(
            "no newline within {MAX_ID_LINE} bytes"
        ))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_lines() {
        assert_eq!(PeerRole::Poser.id_line(), b"holla\n");
        assert_eq!(PeerRole::Driver.id_line(), b"hello\n");
        assert_eq!(PeerRole::Manager.id_line(), b"monky\n");
        for role in [PeerRole::Poser, PeerRole::Driver, PeerRole::Manager] {
            assert_eq!(PeerRole::from_id_line(&role.id_line()), role);
            assert_eq!(role.id().len(), 5);
        }
        assert_eq!(
            PeerRole::from_id_line(b"zzzzz\n"),
            PeerRole::Other("zzzzz".into())
        );
    }

    #[test]
    fn test_routing_predicate() {
        let poser = PeerRole::Poser;
        let driver = PeerRole::Driver;
        let manager = PeerRole::Manager;

        // pose traffic
        assert!(driver.receives_from(&poser));
        assert!(poser.receives_from(&driver));
        assert!(!manager.receives_from(&poser));

        // control traffic
        assert!(manager.receives_from(&manager));
        assert!(!driver.receives_from(&manager));
        assert!(poser.receives_from(&manager));
    }

    #[test]
    fn test_read_id_line_stops_at_newline() {
        let data = b"holla\nREST";
        let mut reader = &data[..];
        assert_eq!(read_id_line(&mut reader).unwrap(), PeerRole::Poser);
        assert_eq!(reader, b"REST");
    }

    #[test]
    fn test_read_id_line_eof() {
        let mut reader = &b"hol"[..];
        assert!(matches!(read_id_line(&mut reader), Err(Error::Handshake(_))));
    }

    #[test]
    fn test_split_id_line() {
        assert!(split_id_line(b"hel").unwrap().is_none());
        let (role, used) = split_id_line(b"hello\n\x01\x02").unwrap().unwrap();
        assert_eq!(role, PeerRole::Driver);
        assert_eq!(used, 6);
        assert!(split_id_line(&[b'x'; 60]).is_err());
    }

    #[test]
    fn test_send_id_line() {
        let mut out = Vec::new();
        send_id_line(&mut out, &PeerRole::Manager).unwrap();
        assert_eq!(out, b"monky\n");
    }
}
