// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ByteStream trait for the socket under a link.
//!
//! The sender, the receiver and the control role each hold their own handle
//! to the same connection. For a `TcpStream` those are `try_clone`d file
//! descriptors, so shutting one down unblocks a read parked on another.
//!
//! # Example
//!
//! ```ignore
//! use posewire::stream::ByteStream;
//!
//! fn send_frame<S: ByteStream + ?Sized>(stream: &mut S, frame: &[u8]) -> io::Result<()> {
//!     stream.write_all(frame)?;
//!     stream.flush()
//! }
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Abstraction over the duplex byte stream of a link.
pub trait ByteStream: Read + Write + Send {
    /// Another handle to the same underlying connection.
    fn try_clone_box(&self) -> io::Result<Box<dyn ByteStream>>;

    /// Shutdown the stream.
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Get the local address of this stream.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Get the peer address of this stream.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Set read timeout.
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Set TCP_NODELAY (disable Nagle's algorithm).
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;
}

// ============================================================================
// TcpStream implementation
// ============================================================================

impl ByteStream for TcpStream {
    fn try_clone_box(&self) -> io::Result<Box<dyn ByteStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

// ============================================================================
// Boxed ByteStream
// ============================================================================

/// Type alias for a boxed ByteStream.
pub type BoxedByteStream = Box<dyn ByteStream>;

/// Write half of a link, shared by every role that writes to the socket.
pub type SharedWriter = Arc<Mutex<BoxedByteStream>>;

/// Wrap a stream for shared writing.
pub fn shared_writer(stream: BoxedByteStream) -> SharedWriter {
    Arc::new(Mutex::new(stream))
}

impl ByteStream for BoxedByteStream {
    fn try_clone_box(&self) -> io::Result<Box<dyn ByteStream>> {
        (**self).try_clone_box()
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        (**self).shutdown(how)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(dur)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        (**self).set_nodelay(nodelay)
    }
}

/// Whether a read error only means "nothing yet".
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// ============================================================================
// Test mock stream
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mock::MockStream;
    use super::*;

    #[test]
    fn test_mock_chunked_reads() {
        let mut s = MockStream::new().with_chunk(3);
        s.feed_read_data(b"abcdefg");
        let mut buf = [0u8; 16];
        assert_eq!(s.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(s.read(&mut buf).unwrap(), 3);
        assert_eq!(s.read(&mut buf).unwrap(), 1);
        let err = s.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_mock_clone_shares_connection() {
        let s = MockStream::new();
        let mut other = s.try_clone_box().unwrap();
        other.shutdown(Shutdown::Both).unwrap();
        assert!(!s.is_connected());

        let mut s = s;
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert_eq!(
            s.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_mock_error_injection() {
        let mut s = MockStream::new();
        s.inject_write_error(io::ErrorKind::ConnectionReset);
        assert!(s.write(b"a").is_err());
        assert_eq!(s.write(b"b").unwrap(), 1);
        assert_eq!(s.get_written_data(), b"b");
    }

    #[test]
    fn test_transient_kinds() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn test_tcp_stream_clone_box() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut clone = client.try_clone_box().unwrap();
        clone.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(clone.peer_addr().unwrap(), addr);
    }
}
