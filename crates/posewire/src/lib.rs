// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming of tracked-device poses over TCP.
//!
//! A poser process owns the state of a fixed set of devices (headset,
//! controllers, trackers) and streams it to a host, frame after frame, over
//! one TCP connection. The device set and its order are fixed by a short
//! topology descriptor such as `"h c c"`.
//!
//! # Architecture
//!
//! ```text
//! +------------------------------------------------------------+
//! |                        PoserLink                           |
//! |  PoseBoard --snapshot--> SenderEngine --frame--> socket ---+---+
//! |                                                            |   |
//! |  MessageHandler <--- ReceiverEngine <--------------------- +-+ |
//! +------------------------------------------------------------+ | |
//!                                                                | v
//!                                                (posewire-relay, optional)
//!                                                                ^ |
//! +------------------------------------------------------------+ | |
//! |                         HostLink                           | | |
//! |  PoseSink <--decode-- ReceiverEngine <-- ReceiveBuffer <---+-+-+
//! |                            ^                               | |
//! |                  TopologySlot (generation)    send_message-+-+
//! +------------------------------------------------------------+
//! ```
//!
//! Every link runs one OS thread per role (`control`, `send`, `receive`)
//! under a [`ThreadRegistry`]. Stopping is cooperative: each role checks its
//! liveness flag once per tick, and the control role closes the socket so a
//! blocked read returns.
//!
//! # Wire Format
//!
//! Little-endian `f32` fields, records in topology order, one terminator per
//! frame:
//!
//! ```text
//! +--------------+-----------------+----------+-----------+---------+-----------+
//! | position (3) | orientation (4) | vel (3)  | ang vel 3 | inputs* | \t \r \n  |
//! +--------------+-----------------+----------+-----------+---------+-----------+
//!                                              * controllers only, 9 fields
//! ```
//!
//! # Example
//!
//! ```ignore
//! use posewire::{LinkConfig, PoserLink, Topology};
//!
//! let link = PoserLink::new(Topology::parse("h c c")?, LinkConfig::default());
//! link.start()?;
//! link.board().update_pose(0, |p| p.position = [0.0, 1.7, 0.0]);
//! // ...
//! link.stop()?;
//! ```

pub mod board;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod link;
pub mod metrics;
pub mod pose;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod stream;
pub mod supervisor;
pub mod topology;

pub use board::PoseBoard;
pub use config::{LinkConfig, DEFAULT_PORT};
pub use control::{ControlHandler, ControlMessage, ControlReply};
pub use error::{Error, Result};
pub use frame::{Extract, ReceiveBuffer, TERMINATOR};
pub use handshake::{PeerRole, CLOSE_LINE};
pub use link::{ControlClient, HostLink, LinkState, ManagerLink, PoserLink, TopologyHandle};
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use pose::{BasePose, ControllerInputs, ControllerPose, DeviceKind, PoseRecord, TrackerPose};
pub use receiver::{FrameHandler, MessageHandler, PoseSink};
pub use registry::{KeepAlive, ThreadRegistry, ThreadState, Tick, Worker};
pub use sender::SenderState;
pub use topology::Topology;
