// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link metrics.
//!
//! Lock-free counters updated by the sender, receiver and control roles:
//! - Frame throughput (sent, received)
//! - Byte throughput
//! - Dropped frames and I/O errors
//!
//! # Example
//!
//! ```
//! use posewire::LinkMetrics;
//!
//! let metrics = LinkMetrics::new();
//! metrics.record_frame_sent(143);
//! metrics.record_frame_dropped();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.frames_sent, 1);
//! assert_eq!(snapshot.frames_dropped, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one link.
#[derive(Debug)]
pub struct LinkMetrics {
    // Frame metrics
    frames_sent: AtomicU64,
    frames_received: AtomicU64,

    // Byte metrics (framing included)
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    /// Frames dropped by decode failure or overflow
    frames_dropped: AtomicU64,

    /// Partial data thrown away by a topology change
    resyncs: AtomicU64,

    /// Control messages handled by a manager link
    control_messages: AtomicU64,

    // Error metrics
    send_errors: AtomicU64,
    recv_errors: AtomicU64,

    start_time: Instant,
}

impl LinkMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            control_messages: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            recv_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn record_frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes read from the socket, before reassembly.
    pub fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_message(&self) {
        self.control_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
            uptime: self.uptime(),
        }
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of [`LinkMetrics`] at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkMetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_dropped: u64,
    pub resyncs: u64,
    pub control_messages: u64,
    pub send_errors: u64,
    pub recv_errors: u64,
    pub uptime: Duration,
}

impl LinkMetricsSnapshot {
    /// Frames sent per second since creation.
    pub fn send_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }

    /// Frames received per second since creation.
    pub fn receive_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_received as f64 / secs
        } else {
            0.0
        }
    }
}
