// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-layout device records.
//!
//! Every record is a run of little-endian `f32` values with no padding:
//!
//! ```text
//! +-------------+----------------+-----------------+------------------+-----------------+
//! | position(3) | orientation(4) | lin. velocity(3)| ang. velocity(3) | inputs(9) [c]   |
//! |  12 bytes   | w,x,y,z 16 B   |    12 bytes     |     12 bytes     | 36 bytes        |
//! +-------------+----------------+-----------------+------------------+-----------------+
//! ```
//!
//! Headset and tracker records are 13 floats (52 bytes). Controller records
//! append the nine input channels for 22 floats (88 bytes). No kind tag is
//! written per record; the topology fixes which layout sits at which offset.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Floats in a bare pose.
pub const BASE_POSE_FLOATS: usize = 13;

/// Floats in a controller record (bare pose + 9 inputs).
pub const CONTROLLER_FLOATS: usize = 22;

const INPUT_FLOATS: usize = CONTROLLER_FLOATS - BASE_POSE_FLOATS;

// ============================================================================
// DeviceKind
// ============================================================================

/// Closed set of record layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Bare pose (`h`), used for headsets.
    Headset,
    /// Pose plus analog/digital inputs (`c`).
    Controller,
    /// Bare pose (`t`); same bytes as a headset, different device class.
    Tracker,
}

impl DeviceKind {
    /// Descriptor character.
    pub const fn tag(self) -> char {
        match self {
            DeviceKind::Headset => 'h',
            DeviceKind::Controller => 'c',
            DeviceKind::Tracker => 't',
        }
    }

    /// Parse a descriptor character.
    pub const fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'h' => Some(DeviceKind::Headset),
            'c' => Some(DeviceKind::Controller),
            't' => Some(DeviceKind::Tracker),
            _ => None,
        }
    }

    /// Numeric code used by control messages (0 = headset, 1 = controller, 2 = tracker).
    pub const fn code(self) -> u32 {
        match self {
            DeviceKind::Headset => 0,
            DeviceKind::Controller => 1,
            DeviceKind::Tracker => 2,
        }
    }

    /// Inverse of [`DeviceKind::code`].
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(DeviceKind::Headset),
            1 => Some(DeviceKind::Controller),
            2 => Some(DeviceKind::Tracker),
            _ => None,
        }
    }

    /// Number of `f32` fields in the record.
    pub const fn float_count(self) -> usize {
        match self {
            DeviceKind::Headset | DeviceKind::Tracker => BASE_POSE_FLOATS,
            DeviceKind::Controller => CONTROLLER_FLOATS,
        }
    }

    /// Encoded size in bytes (52, 88, 52).
    pub const fn byte_len(self) -> usize {
        self.float_count() * 4
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Headset => write!(f, "headset"),
            DeviceKind::Controller => write!(f, "controller"),
            DeviceKind::Tracker => write!(f, "tracker"),
        }
    }
}

// ============================================================================
// Record types
// ============================================================================

/// Position, orientation and velocities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasePose {
    pub position: [f32; 3],
    /// Quaternion in `w, x, y, z` order.
    pub orientation: [f32; 4],
    pub velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
}

impl BasePose {
    /// Identity quaternion in wire order.
    pub const IDENTITY: [f32; 4] = [1.0, 0.0, 0.0, 0.0];

    /// Pose at `position` with identity orientation and zero velocity.
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    fn write_floats(&self, out: &mut [f32]) {
        out[0..3].copy_from_slice(&self.position);
        out[3..7].copy_from_slice(&self.orientation);
        out[7..10].copy_from_slice(&self.velocity);
        out[10..13].copy_from_slice(&self.angular_velocity);
    }

    fn from_floats(v: &[f32]) -> Self {
        Self {
            position: [v[0], v[1], v[2]],
            orientation: [v[3], v[4], v[5], v[6]],
            velocity: [v[7], v[8], v[9]],
            angular_velocity: [v[10], v[11], v[12]],
        }
    }
}

impl Default for BasePose {
    /// A stale orientation on the first frame upsets VR runtimes, so the
    /// default is the identity rotation rather than all zeros.
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: Self::IDENTITY,
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
        }
    }
}

/// Controller input channels, in wire order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerInputs {
    pub grip: f32,
    pub system: f32,
    pub menu: f32,
    pub trackpad_click: f32,
    pub trigger_value: f32,
    pub trackpad_x: f32,
    pub trackpad_y: f32,
    pub trackpad_touch: f32,
    pub trigger_click: f32,
}

impl ControllerInputs {
    fn to_array(self) -> [f32; INPUT_FLOATS] {
        [
            self.grip,
            self.system,
            self.menu,
            self.trackpad_click,
            self.trigger_value,
            self.trackpad_x,
            self.trackpad_y,
            self.trackpad_touch,
            self.trigger_click,
        ]
    }

    fn from_floats(v: &[f32]) -> Self {
        Self {
            grip: v[0],
            system: v[1],
            menu: v[2],
            trackpad_click: v[3],
            trigger_value: v[4],
            trackpad_x: v[5],
            trackpad_y: v[6],
            trackpad_touch: v[7],
            trigger_click: v[8],
        }
    }
}

/// Bare pose plus controller inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerPose {
    pub pose: BasePose,
    pub inputs: ControllerInputs,
}

/// Tracker pose. Byte-identical to a bare pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerPose {
    pub pose: BasePose,
}

// ============================================================================
// PoseRecord
// ============================================================================

/// One device record of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PoseRecord {
    Headset(BasePose),
    Controller(ControllerPose),
    Tracker(TrackerPose),
}

impl PoseRecord {
    /// Default record for a kind (identity orientation, inputs released).
    pub fn default_for(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Headset => PoseRecord::Headset(BasePose::default()),
            DeviceKind::Controller => PoseRecord::Controller(ControllerPose::default()),
            DeviceKind::Tracker => PoseRecord::Tracker(TrackerPose::default()),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            PoseRecord::Headset(_) => DeviceKind::Headset,
            PoseRecord::Controller(_) => DeviceKind::Controller,
            PoseRecord::Tracker(_) => DeviceKind::Tracker,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.kind().byte_len()
    }

    /// Shared pose part.
    pub fn base(&self) -> &BasePose {
        match self {
            PoseRecord::Headset(p) => p,
            PoseRecord::Controller(c) => &c.pose,
            PoseRecord::Tracker(t) => &t.pose,
        }
    }

    pub fn base_mut(&mut self) -> &mut BasePose {
        match self {
            PoseRecord::Headset(p) => p,
            PoseRecord::Controller(c) => &mut c.pose,
            PoseRecord::Tracker(t) => &mut t.pose,
        }
    }

    /// Controller inputs, if this is a controller record.
    pub fn inputs_mut(&mut self) -> Option<&mut ControllerInputs> {
        match self {
            PoseRecord::Controller(c) => Some(&mut c.inputs),
            _ => None,
        }
    }

    /// Append the encoded record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut floats = [0.0f32; CONTROLLER_FLOATS];
        self.base().write_floats(&mut floats[..BASE_POSE_FLOATS]);
        if let PoseRecord::Controller(c) = self {
            floats[BASE_POSE_FLOATS..].copy_from_slice(&c.inputs.to_array());
        }

        let count = self.kind().float_count();
        let start = out.len();
        out.resize(start + count * 4, 0);
        LittleEndian::write_f32_into(&floats[..count], &mut out[start..]);
    }

    /// Encode into a fresh buffer of exactly [`PoseRecord::byte_len`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode a record of `kind` from exactly `kind.byte_len()` bytes.
    pub fn decode(kind: DeviceKind, bytes: &[u8]) -> Result<Self> {
        let expected = kind.byte_len();
        if bytes.len() != expected {
            return Err(Error::MalformedRecord {
                kind,
                expected,
                got: bytes.len(),
            });
        }

        let mut floats = [0.0f32; CONTROLLER_FLOATS];
        let count = kind.float_count();
        LittleEndian::read_f32_into(bytes, &mut floats[..count]);

        let pose = BasePose::from_floats(&floats[..BASE_POSE_FLOATS]);
        Ok(match kind {
            DeviceKind::Headset => PoseRecord::Headset(pose),
            DeviceKind::Tracker => PoseRecord::Tracker(TrackerPose { pose }),
            DeviceKind::Controller => PoseRecord::Controller(ControllerPose {
                pose,
                inputs: ControllerInputs::from_floats(&floats[BASE_POSE_FLOATS..]),
            }),
        })
    }
}

impl From<BasePose> for PoseRecord {
    fn from(pose: BasePose) -> Self {
        PoseRecord::Headset(pose)
    }
}

impl From<ControllerPose> for PoseRecord {
    fn from(pose: ControllerPose) -> Self {
        PoseRecord::Controller(pose)
    }
}

impl From<TrackerPose> for PoseRecord {
    fn from(pose: TrackerPose) -> Self {
        PoseRecord::Tracker(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_controller() -> ControllerPose {
        ControllerPose {
            pose: BasePose {
                position: [0.1, -1.5, 2.25],
                orientation: [0.7071, 0.0, 0.7071, 0.0],
                velocity: [0.01, 0.02, 0.03],
                angular_velocity: [-0.5, 0.25, 0.125],
            },
            inputs: ControllerInputs {
                grip: 1.0,
                system: 0.0,
                menu: 1.0,
                trackpad_click: 0.0,
                trigger_value: 0.42,
                trackpad_x: -0.3,
                trackpad_y: 0.9,
                trackpad_touch: 1.0,
                trigger_click: 0.0,
            },
        }
    }

    #[test]
    fn test_byte_lengths() {
        assert_eq!(DeviceKind::Headset.byte_len(), 52);
        assert_eq!(DeviceKind::Controller.byte_len(), 88);
        assert_eq!(DeviceKind::Tracker.byte_len(), 52);
    }

    #[test]
    fn test_default_orientation_is_identity() {
        for kind in [
            DeviceKind::Headset,
            DeviceKind::Controller,
            DeviceKind::Tracker,
        ] {
            let rec = PoseRecord::default_for(kind);
            assert_eq!(rec.base().orientation, [1.0, 0.0, 0.0, 0.0]);
            assert_eq!(rec.kind(), kind);
        }
    }

    #[test]
    fn test_headset_layout() {
        let rec = PoseRecord::Headset(BasePose::at([1.0, 2.0, 3.0]));
        let bytes = rec.encode();
        assert_eq!(bytes.len(), 52);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3.0f32.to_le_bytes());
        // w of the identity quaternion sits right after the position
        assert_eq!(&bytes[12..16], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_controller_inputs_follow_pose() {
        let rec = PoseRecord::Controller(sample_controller());
        let bytes = rec.encode();
        assert_eq!(bytes.len(), 88);
        // grip is float 13, trigger_click float 21
        assert_eq!(&bytes[52..56], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[68..72], &0.42f32.to_le_bytes());
        assert_eq!(&bytes[84..88], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let records = [
            PoseRecord::Headset(BasePose::at([f32::MIN_POSITIVE, -0.0, 1e-30])),
            PoseRecord::Controller(sample_controller()),
            PoseRecord::Tracker(TrackerPose {
                pose: BasePose::at([9.5, 8.5, 7.5]),
            }),
        ];
        for rec in records {
            let decoded = PoseRecord::decode(rec.kind(), &rec.encode()).unwrap();
            assert_eq!(decoded.encode(), rec.encode());
            assert_eq!(decoded.kind(), rec.kind());
        }
    }

    #[test]
    fn test_tracker_and_headset_share_bytes() {
        let pose = BasePose::at([0.5, 0.5, 0.5]);
        let h = PoseRecord::Headset(pose).encode();
        let t = PoseRecord::Tracker(TrackerPose { pose }).encode();
        assert_eq!(h, t);
        assert!(matches!(
            PoseRecord::decode(DeviceKind::Tracker, &t).unwrap(),
            PoseRecord::Tracker(_)
        ));
    }

    #[test]
    fn test_decode_wrong_size() {
        let bytes = PoseRecord::default_for(DeviceKind::Headset).encode();
        let err = PoseRecord::decode(DeviceKind::Controller, &bytes).unwrap_err();
        match err {
            Error::MalformedRecord {
                kind,
                expected,
                got,
            } => {
                assert_eq!(kind, DeviceKind::Controller);
                assert_eq!(expected, 88);
                assert_eq!(got, 52);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_encode_into_appends() {
        let mut out = vec![0xAA];
        PoseRecord::default_for(DeviceKind::Tracker).encode_into(&mut out);
        assert_eq!(out.len(), 53);
        assert_eq!(out[0], 0xAA);
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            DeviceKind::Headset,
            DeviceKind::Controller,
            DeviceKind::Tracker,
        ] {
            assert_eq!(DeviceKind::from_code(kind.code()), Some(kind));
            assert_eq!(DeviceKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(DeviceKind::from_code(3), None);
        assert_eq!(DeviceKind::from_tag('p'), None);
    }
}
