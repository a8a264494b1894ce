// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Current device state, shared between producer code and the sender.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::frame;
use crate::pose::{BasePose, ControllerInputs, PoseRecord};
use crate::topology::Topology;

#[derive(Debug)]
struct BoardInner {
    topology: Topology,
    records: Vec<PoseRecord>,
}

/// Owning, indexable set of records in topology order.
///
/// Cloning yields another handle to the same board. Writers hold the lock
/// only for the duration of one update, and the sender snapshots the whole
/// board once per tick.
#[derive(Debug, Clone)]
pub struct PoseBoard {
    inner: Arc<RwLock<BoardInner>>,
}

impl PoseBoard {
    /// Board with default records for every device in `topology`.
    pub fn new(topology: Topology) -> Self {
        let records = topology.default_records();
        Self {
            inner: Arc::new(RwLock::new(BoardInner { topology, records })),
        }
    }

    pub fn topology(&self) -> Topology {
        self.inner.read().topology.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of one record.
    pub fn get(&self, index: usize) -> Option<PoseRecord> {
        self.inner.read().records.get(index).copied()
    }

    /// Replace the record at `index`. The kind must match the topology.
    pub fn set(&self, index: usize, record: PoseRecord) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner.records.get_mut(index).ok_or_else(|| {
            Error::invalid_topology(
                &format!("index {index}"),
                "no device at this index",
            )
        })?;
        if slot.kind() != record.kind() {
            return Err(Error::MalformedRecord {
                kind: slot.kind(),
                expected: slot.byte_len(),
                got: record.byte_len(),
            });
        }
        *slot = record;
        Ok(())
    }

    /// Mutate the pose part of a device in place. Returns `false` for a bad index.
    pub fn update_pose<F>(&self, index: usize, f: F) -> bool
    where
        F: FnOnce(&mut BasePose),
    {
        match self.inner.write().records.get_mut(index) {
            Some(record) => {
                f(record.base_mut());
                true
            }
            None => false,
        }
    }

    /// Mutate controller inputs in place. Returns `false` if `index` is not a controller.
    pub fn update_inputs<F>(&self, index: usize, f: F) -> bool
    where
        F: FnOnce(&mut ControllerInputs),
    {
        match self
            .inner
            .write()
            .records
            .get_mut(index)
            .and_then(PoseRecord::inputs_mut)
        {
            Some(inputs) => {
                f(inputs);
                true
            }
            None => false,
        }
    }

    /// Copy of every record.
    pub fn snapshot(&self) -> Vec<PoseRecord> {
        self.inner.read().records.clone()
    }

    /// Encode the current state as one frame.
    pub fn encode_frame(&self, out: &mut Vec<u8>) {
        let inner = self.inner.read();
        out.clear();
        frame::frame_into(&inner.records, out);
    }

    /// Swap the topology. Devices whose kind is unchanged at the same index
    /// keep their state; the rest are reset to defaults.
    pub fn retopologize(&self, topology: Topology) {
        let mut inner = self.inner.write();
        let records = topology
            .kinds()
            .iter()
            .enumerate()
            .map(|(i, kind)| match inner.records.get(i) {
                Some(old) if old.kind() == *kind => *old,
                _ => PoseRecord::default_for(*kind),
            })
            .collect();
        inner.records = records;
        inner.topology = topology;
    }
}
