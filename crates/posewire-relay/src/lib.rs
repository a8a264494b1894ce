// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Posewire relay service
//!
//! The passive side of a posewire deployment: one listening port shared by
//! posers, hosts and managers. Each connection announces its role with a
//! five-character identity line; the relay then forwards whole frames
//! between roles that talk to each other.
//!
//! # Quick Start
//!
//! ```bash
//! # Listen on the default port (6969)
//! posewire-relay
//!
//! # Using a configuration file
//! posewire-relay --config relay.toml
//! ```
//!
//! # Routing
//!
//! | From \ To | poser | driver | manager |
//! |-----------|-------|--------|---------|
//! | poser     | [OK]  | [OK]   | [X]     |
//! | driver    | [OK]  | [OK]   | [X]     |
//! | manager   | [OK]  | [X]    | [OK]    |
//!
//! # Configuration File
//!
//! ```toml
//! name = "lab-relay"
//! listen_address = "0.0.0.0"
//! port = 6969
//! max_frame_size = 65536
//! stats_interval_secs = 10
//! ```

pub mod config;
pub mod relay;

pub use config::{ConfigError, RelayConfig};
pub use relay::{Relay, RelayError, RelayHandle, RelayStats, RelayStatsSnapshot};
