// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Manager-channel control messages.
//!
//! A control message is a fixed block of 130 little-endian `u32` words
//! followed by the frame terminator:
//!
//! ```text
//! +--------+---------+---------+-----+----------+----------------+
//! | type   | word 1  | word 2  | ... | word 129 | 0x09 0x0D 0x0A |
//! +--------+---------+---------+-----+----------+----------------+
//!   4 B      4 B                        4 B        3 B   = 523 B
//! ```
//!
//! Real values travel as numerator/denominator pairs; the numerator word holds
//! a two's-complement `i32`. The receiving side answers with `"2000"` (applied)
//! or `"-100"` (rejected), framed the same way.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::frame::{self, strip_terminator, TERMINATOR};
use crate::pose::DeviceKind;
use crate::topology::Topology;

/// Words in a control block.
pub const CONTROL_WORDS: usize = 130;

/// Control block size without the terminator.
pub const CONTROL_PAYLOAD_LEN: usize = CONTROL_WORDS * 4;

/// Control frame size on the wire.
pub const CONTROL_FRAME_LEN: usize = CONTROL_PAYLOAD_LEN + TERMINATOR.len();

/// Denominator used when encoding real values.
pub const FRACTION_DENOMINATOR: u32 = 10_000;

/// Most devices a topology update can describe.
pub const MAX_TOPOLOGY_DEVICES: usize = (CONTROL_WORDS - 2) / 2;

/// Control message type codes.
pub mod msg_type {
    pub const IPD: u32 = 10;
    pub const TOPOLOGY: u32 = 20;
    pub const POSE_TIME_OFFSET: u32 = 30;
    pub const DISTORTION: u32 = 40;
    pub const EYE_GAP: u32 = 50;
    pub const SET_SELF_POSE: u32 = 60;
}

/// Settings change pushed over the manager channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Inter-pupillary distance, meters.
    Ipd(f32),
    /// Replace the device topology.
    TopologyUpdate(Topology),
    /// Pose prediction offset, seconds.
    PoseTimeOffset(f32),
    /// Lens distortion coefficients and zoom.
    Distortion {
        k1: f32,
        k2: f32,
        zoom_width: f32,
        zoom_height: f32,
    },
    /// Gap between the eye viewports, pixels.
    EyeGap(i32),
    /// Position of the tracking reference itself.
    SetSelfPose([f32; 3]),
}

impl ControlMessage {
    pub fn message_type(&self) -> u32 {
        match self {
            ControlMessage::Ipd(_) => msg_type::IPD,
            ControlMessage::TopologyUpdate(_) => msg_type::TOPOLOGY,
            ControlMessage::PoseTimeOffset(_) => msg_type::POSE_TIME_OFFSET,
            ControlMessage::Distortion { .. } => msg_type::DISTORTION,
            ControlMessage::EyeGap(_) => msg_type::EYE_GAP,
            ControlMessage::SetSelfPose(_) => msg_type::SET_SELF_POSE,
        }
    }

    /// Encode as a full 523-byte frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut words = [0u32; CONTROL_WORDS];
        words[0] = self.message_type();

        match self {
            ControlMessage::Ipd(v) | ControlMessage::PoseTimeOffset(v) => {
                put_fraction(&mut words, 1, *v);
            }
            ControlMessage::TopologyUpdate(topology) => {
                if topology.len() > MAX_TOPOLOGY_DEVICES {
                    return Err(Error::MalformedControl(format!(
                        "topology has {} devices, at most {} fit",
                        topology.len(),
                        MAX_TOPOLOGY_DEVICES
                    )));
                }
                words[1] = topology.len() as u32;
                for (i, kind) in topology.kinds().iter().enumerate() {
                    words[2 + i * 2] = kind.code();
                    words[3 + i * 2] = kind.float_count() as u32;
                }
            }
            ControlMessage::Distortion {
                k1,
                k2,
                zoom_width,
                zoom_height,
            } => {
                put_fraction(&mut words, 1, *k1);
                put_fraction(&mut words, 3, *k2);
                put_fraction(&mut words, 5, *zoom_width);
                put_fraction(&mut words, 7, *zoom_height);
            }
            ControlMessage::EyeGap(gap) => {
                words[1] = *gap as u32;
            }
            ControlMessage::SetSelfPose(pos) => {
                for (i, v) in pos.iter().enumerate() {
                    put_fraction(&mut words, 1 + i * 2, *v);
                }
            }
        }

        let mut payload = vec![0u8; CONTROL_PAYLOAD_LEN];
        LittleEndian::write_u32_into(&words, &mut payload);
        Ok(frame::frame_payload(&payload))
    }

    /// Decode a control block, with or without its terminator.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload = strip_terminator(bytes);
        if payload.len() != CONTROL_PAYLOAD_LEN {
            return Err(Error::MalformedFrame {
                expected: CONTROL_FRAME_LEN,
                got: bytes.len(),
            });
        }

        let mut words = [0u32; CONTROL_WORDS];
        LittleEndian::read_u32_into(payload, &mut words);

        let msg = match words[0] {
            msg_type::IPD => ControlMessage::Ipd(get_fraction(&words, 1)?),
            msg_type::POSE_TIME_OFFSET => {
                ControlMessage::PoseTimeOffset(get_fraction(&words, 1)?)
            }
            msg_type::TOPOLOGY => ControlMessage::TopologyUpdate(decode_topology(&words)?),
            msg_type::DISTORTION => ControlMessage::Distortion {
                k1: get_fraction(&words, 1)?,
                k2: get_fraction(&words, 3)?,
                zoom_width: get_fraction(&words, 5)?,
                zoom_height: get_fraction(&words, 7)?,
            },
            msg_type::EYE_GAP => ControlMessage::EyeGap(words[1] as i32),
            msg_type::SET_SELF_POSE => ControlMessage::SetSelfPose([
                get_fraction(&words, 1)?,
                get_fraction(&words, 3)?,
                get_fraction(&words, 5)?,
            ]),
            other => return Err(Error::UnknownControlMessage(other)),
        };
        Ok(msg)
    }
}

fn put_fraction(words: &mut [u32], at: usize, value: f32) {
    let scaled = (f64::from(value) * f64::from(FRACTION_DENOMINATOR)).round();
    let clamped = scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
    words[at] = clamped as u32;
    words[at + 1] = FRACTION_DENOMINATOR;
}

fn get_fraction(words: &[u32], at: usize) -> Result<f32> {
    let numerator = words[at] as i32;
    let denominator = words[at + 1];
    if denominator == 0 {
        return Err(Error::MalformedControl(format!(
            "zero denominator in word {}",
            at + 1
        )));
    }
    Ok((f64::from(numerator) / f64::from(denominator)) as f32)
}

fn decode_topology(words: &[u32]) -> Result<Topology> {
    let count = words[1] as usize;
    if count == 0 || count > MAX_TOPOLOGY_DEVICES {
        return Err(Error::MalformedControl(format!(
            "topology device count {count} out of range"
        )));
    }

    let mut kinds = Vec::with_capacity(count);
    for i in 0..count {
        let code = words[2 + i * 2];
        let size = words[3 + i * 2] as usize;
        let kind = DeviceKind::from_code(code).ok_or_else(|| {
            Error::MalformedControl(format!("unknown device code {code} at index {i}"))
        })?;
        if size != kind.float_count() {
            return Err(Error::MalformedControl(format!(
                "{kind} at index {i} declares {size} floats"
            )));
        }
        kinds.push(kind);
    }
    Topology::from_kinds(kinds)
}

// ============================================================================
// Replies
// ============================================================================

/// Answer to a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// `"2000"`: applied.
    Ok,
    /// `"-100"`: not recognized or refused.
    Rejected,
    /// Anything else.
    Other(String),
}

impl ControlReply {
    pub fn as_str(&self) -> &str {
        match self {
            ControlReply::Ok => "2000",
            ControlReply::Rejected => "-100",
            ControlReply::Other(s) => s,
        }
    }

    /// Framed reply.
    pub fn encode(&self) -> Vec<u8> {
        frame::frame_payload(self.as_str().as_bytes())
    }

    /// Parse a reply frame, with or without terminator.
    pub fn parse(bytes: &[u8]) -> Self {
        match strip_terminator(bytes) {
            b"2000" => ControlReply::Ok,
            b"-100" => ControlReply::Rejected,
            other => ControlReply::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ControlReply::Ok
    }
}

/// Applies control messages on the receiving side of a manager channel.
pub trait ControlHandler: Send + 'static {
    fn handle(&mut self, msg: &ControlMessage) -> ControlReply;
}

impl<F> ControlHandler for F
where
    F: FnMut(&ControlMessage) -> ControlReply + Send + 'static,
{
    fn handle(&mut self, msg: &ControlMessage) -> ControlReply {
        self(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_of(frame: &[u8]) -> Vec<u32> {
        let mut words = vec![0u32; CONTROL_WORDS];
        LittleEndian::read_u32_into(&frame[..CONTROL_PAYLOAD_LEN], &mut words);
        words
    }

    #[test]
    fn test_frame_size() {
        let bytes = ControlMessage::EyeGap(3).encode().unwrap();
        assert_eq!(bytes.len(), 523);
        assert_eq!(&bytes[520..], &TERMINATOR);
    }

    #[test]
    fn test_topology_layout() {
        let t = Topology::parse("h c t").unwrap();
        let bytes = ControlMessage::TopologyUpdate(t.clone()).encode().unwrap();
        let w = words_of(&bytes);
        assert_eq!(&w[..8], &[20, 3, 0, 13, 1, 22, 2, 13]);
        assert!(w[8..].iter().all(|x| *x == 0));
        assert_eq!(
            ControlMessage::decode(&bytes).unwrap(),
            ControlMessage::TopologyUpdate(t)
        );
    }

    #[test]
    fn test_ipd_fraction() {
        let bytes = ControlMessage::Ipd(0.063).encode().unwrap();
        let w = words_of(&bytes);
        assert_eq!(w[0], 10);
        assert_eq!(w[1], 630);
        assert_eq!(w[2], FRACTION_DENOMINATOR);
        match ControlMessage::decode(&bytes).unwrap() {
            ControlMessage::Ipd(v) => assert!((v - 0.063).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_negative_values() {
        let msg = ControlMessage::SetSelfPose([-1.25, 0.5, -0.0001]);
        let back = ControlMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, msg);

        let gap = ControlMessage::EyeGap(-12);
        assert_eq!(ControlMessage::decode(&gap.encode().unwrap()).unwrap(), gap);
    }

    #[test]
    fn test_decode_accepts_foreign_denominator() {
        // numerator/denominator chosen by another encoder
        let mut words = [0u32; CONTROL_WORDS];
        words[0] = msg_type::POSE_TIME_OFFSET;
        words[1] = 1;
        words[2] = 4;
        let mut payload = vec![0u8; CONTROL_PAYLOAD_LEN];
        LittleEndian::write_u32_into(&words, &mut payload);
        assert_eq!(
            ControlMessage::decode(&payload).unwrap(),
            ControlMessage::PoseTimeOffset(0.25)
        );
    }

    #[test]
    fn test_unknown_type() {
        let mut payload = vec![0u8; CONTROL_PAYLOAD_LEN];
        LittleEndian::write_u32(&mut payload[..4], 77);
        let err = ControlMessage::decode(&payload).unwrap_err();
        assert!(matches!(err, Error::UnknownControlMessage(77)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_zero_denominator() {
        let mut payload = vec![0u8; CONTROL_PAYLOAD_LEN];
        LittleEndian::write_u32(&mut payload[..4], msg_type::IPD);
        assert!(matches!(
            ControlMessage::decode(&payload),
            Err(Error::MalformedControl(_))
        ));
    }

    #[test]
    fn test_wrong_length() {
        let err = ControlMessage::decode(&[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedFrame {
                expected: 523,
                got: 100
            }
        ));
    }

    #[test]
    fn test_bad_topology_sizes() {
        let mut words = [0u32; CONTROL_WORDS];
        words[0] = msg_type::TOPOLOGY;
        words[1] = 1;
        words[2] = 1;
        words[3] = 13;
        let mut payload = vec![0u8; CONTROL_PAYLOAD_LEN];
        LittleEndian::write_u32_into(&words, &mut payload);
        assert!(matches!(
            ControlMessage::decode(&payload),
            Err(Error::MalformedControl(_))
        ));
    }

    #[test]
    fn test_topology_too_large() {
        let t = Topology::from_kinds(vec![DeviceKind::Tracker; MAX_TOPOLOGY_DEVICES + 1]).unwrap();
        assert!(ControlMessage::TopologyUpdate(t).encode().is_err());
    }

    #[test]
    fn test_replies() {
        assert_eq!(ControlReply::Ok.encode(), b"2000\t\r\n");
        assert_eq!(ControlReply::parse(b"-100\t\r\n"), ControlReply::Rejected);
        assert_eq!(
            ControlReply::parse(b"what"),
            ControlReply::Other("what".into())
        );
        assert!(ControlReply::parse(b"2000").is_ok());
    }
}
