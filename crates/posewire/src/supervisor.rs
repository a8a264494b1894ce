// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control role of a link.
//!
//! Registered first under the name `control`, with the close interval as its
//! poll interval. It watches the other roles; as soon as one of them stops on
//! its own (peer closed, broken pipe) it asks every role to stop.
//!
//! On exit it writes [`CLOSE_LINE`] and shuts the socket down in both
//! directions. The shutdown is what unblocks a receive role parked in a read.

use std::io::Write;
use std::net::Shutdown;
use std::time::Duration;

use crate::handshake::CLOSE_LINE;
use crate::registry::{KeepAlive, Tick, Worker};
use crate::stream::{BoxedByteStream, SharedWriter};

/// Name the control role is registered under.
pub const CONTROL_ROLE: &str = "control";

/// Watches peer roles and closes the socket on the way out.
pub struct Supervisor {
    writer: SharedWriter,
    closer: BoxedByteStream,
    lock_timeout: Duration,
}

impl Supervisor {
    /// `closer` is a separate handle to the same socket, so shutdown does not
    /// wait on a writer stuck in a full socket buffer.
    pub fn new(writer: SharedWriter, closer: BoxedByteStream, lock_timeout: Duration) -> Self {
        Self {
            writer,
            closer,
            lock_timeout,
        }
    }

    /// Write CLOSE, then shut the socket down while still holding the writer,
    /// so no frame can follow the CLOSE line.
    fn close(&mut self) {
        let mut guard = self.writer.try_lock_for(self.lock_timeout);
        match guard.as_mut() {
            Some(w) => {
                if let Err(e) = w.write_all(CLOSE_LINE).and_then(|()| w.flush()) {
                    log::debug!("[link] CLOSE not delivered: {}", e);
                }
            }
            None => log::debug!("[link] writer busy, skipping CLOSE"),
        }
        if let Err(e) = self.closer.shutdown(Shutdown::Both) {
            log::debug!("[link] shutdown: {}", e);
        }
        drop(guard);
    }
}

impl Worker for Supervisor {
    fn tick(&mut self, ctx: &KeepAlive) -> Tick {
        let stopped = ctx.stopped_peers();
        if stopped.is_empty() {
            return Tick::Continue;
        }
        log::info!(
            "[link] role(s) {} stopped, shutting the link down",
            stopped.join(", ")
        );
        ctx.request_stop_all();
        Tick::Break
    }

    fn finish(&mut self, ctx: &KeepAlive) {
        // Covers the external-stop path, where only this role saw the request.
        ctx.request_stop_all();
        self.close();
    }
}
