// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology descriptors.
//!
//! A descriptor such as `"h c c"` fixes how many records a frame carries,
//! their kinds, and their order for the lifetime of a connection:
//!
//! ```text
//! descriptor := DEVICE (" " DEVICE)*
//! DEVICE     := "h" | "c" | "t"
//! ```
//!
//! The runtime side also uses a sized form where each device carries its
//! float count, e.g. `"h13 c22 c22"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::TERMINATOR;
use crate::pose::{DeviceKind, PoseRecord};

/// Ordered, non-empty list of device kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topology {
    kinds: Vec<DeviceKind>,
}

impl Topology {
    /// Parse a short descriptor (`"h c t"`).
    ///
    /// Anything outside `{h, c, t, ' '}`, an empty string, a missing or
    /// doubled separator, or a leading/trailing space is rejected.
    pub fn parse(descriptor: &str) -> Result<Self> {
        if descriptor.is_empty() {
            return Err(Error::invalid_topology(descriptor, "empty descriptor"));
        }

        let mut kinds = Vec::with_capacity(descriptor.len() / 2 + 1);
        for (i, ch) in descriptor.chars().enumerate() {
            if i % 2 == 1 {
                if ch != ' ' {
                    return Err(Error::invalid_topology(
                        descriptor,
                        format!("expected ' ' at position {i}, found {ch:?}"),
                    ));
                }
                continue;
            }
            match DeviceKind::from_tag(ch) {
                Some(kind) => kinds.push(kind),
                None => {
                    return Err(Error::invalid_topology(
                        descriptor,
                        format!("expected one of 'h', 'c', 't' at position {i}, found {ch:?}"),
                    ))
                }
            }
        }

        // "h c " passes the loop but ends on a separator
        if descriptor.ends_with(' ') {
            return Err(Error::invalid_topology(descriptor, "trailing separator"));
        }

        Ok(Self { kinds })
    }

    /// Parse the sized form (`"h13 c22 c22"`), checking each size against its kind.
    pub fn parse_expanded(descriptor: &str) -> Result<Self> {
        if descriptor.is_empty() {
            return Err(Error::invalid_topology(descriptor, "empty descriptor"));
        }

        let mut kinds = Vec::new();
        for token in descriptor.split(' ') {
            let mut chars = token.chars();
            let kind = chars
                .next()
                .and_then(DeviceKind::from_tag)
                .ok_or_else(|| {
                    Error::invalid_topology(descriptor, format!("bad device token {token:?}"))
                })?;
            let size: usize = chars.as_str().parse().map_err(|_| {
                Error::invalid_topology(descriptor, format!("bad size in token {token:?}"))
            })?;
            if size != kind.float_count() {
                return Err(Error::invalid_topology(
                    descriptor,
                    format!(
                        "{kind} records carry {} floats, descriptor says {size}",
                        kind.float_count()
                    ),
                ));
            }
            kinds.push(kind);
        }

        Ok(Self { kinds })
    }

    /// Build from an explicit kind list. Fails if `kinds` is empty.
    pub fn from_kinds(kinds: Vec<DeviceKind>) -> Result<Self> {
        if kinds.is_empty() {
            return Err(Error::invalid_topology("", "no devices"));
        }
        Ok(Self { kinds })
    }

    pub fn kinds(&self) -> &[DeviceKind] {
        &self.kinds
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Always `false`; a parsed topology has at least one device.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Count of devices of `kind`.
    pub fn count(&self, kind: DeviceKind) -> usize {
        self.kinds.iter().filter(|k| **k == kind).count()
    }

    /// Short descriptor (`"h c c"`).
    pub fn descriptor(&self) -> String {
        let mut out = String::with_capacity(self.kinds.len() * 2);
        for (i, kind) in self.kinds.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push(kind.tag());
        }
        out
    }

    /// Sized descriptor (`"h13 c22 c22"`).
    pub fn expanded(&self) -> String {
        self.kinds
            .iter()
            .map(|k| format!("{}{}", k.tag(), k.float_count()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Encoded record bytes per frame, without the terminator.
    pub fn payload_len(&self) -> usize {
        self.kinds.iter().map(|k| k.byte_len()).sum()
    }

    /// Full frame length including the terminator.
    pub fn frame_len(&self) -> usize {
        self.payload_len() + TERMINATOR.len()
    }

    /// One default record per device, in topology order.
    pub fn default_records(&self) -> Vec<PoseRecord> {
        self.kinds
            .iter()
            .map(|k| PoseRecord::default_for(*k))
            .collect()
    }

    /// Decode a frame payload (terminator already stripped) into records.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<Vec<PoseRecord>> {
        let expected = self.payload_len();
        if payload.len() != expected {
            return Err(Error::MalformedFrame {
                expected: self.frame_len(),
                got: payload.len() + TERMINATOR.len(),
            });
        }

        let mut records = Vec::with_capacity(self.kinds.len());
        let mut offset = 0;
        for kind in &self.kinds {
            let end = offset + kind.byte_len();
            records.push(PoseRecord::decode(*kind, &payload[offset..end])?);
            offset = end;
        }
        Ok(records)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for Topology {
    type Err = Error;

    /// Accepts either the short or the sized form.
    fn from_str(s: &str) -> Result<Self> {
        if s.chars().any(|c| c.is_ascii_digit()) {
            Self::parse_expanded(s)
        } else {
            Self::parse(s)
        }
    }
}

impl TryFrom<String> for Topology {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Topology> for String {
    fn from(t: Topology) -> Self {
        t.descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order() {
        let t = Topology::parse("h c t c").unwrap();
        assert_eq!(
            t.kinds(),
            &[
                DeviceKind::Headset,
                DeviceKind::Controller,
                DeviceKind::Tracker,
                DeviceKind::Controller
            ]
        );
        assert_eq!(t.len(), 4);
        assert_eq!(t.count(DeviceKind::Controller), 2);
    }

    #[test]
    fn test_parse_single_device() {
        let t = Topology::parse("t").unwrap();
        assert_eq!(t.kinds(), &[DeviceKind::Tracker]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "", "hc", "h  c", " h", "h ", "h c ", "h1", "x", "h,c", "H", "h\tc", "13",
        ] {
            let err = Topology::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidTopology { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_length_matches_device_chars() {
        let descriptors = ["h", "h c", "c c c c", "t h c t h"];
        for d in descriptors {
            let t = Topology::parse(d).unwrap();
            let expected = d.chars().filter(|c| "hct".contains(*c)).count();
            assert_eq!(t.len(), expected);
            assert_eq!(t.descriptor(), d);
        }
    }

    #[test]
    fn test_expanded_form() {
        let t = Topology::parse("h c c").unwrap();
        assert_eq!(t.expanded(), "h13 c22 c22");
        assert_eq!(Topology::parse_expanded("h13 c22 c22").unwrap(), t);
    }

    #[test]
    fn test_parse_expanded_checks_sizes() {
        assert!(Topology::parse_expanded("h13 c13").is_err());
        assert!(Topology::parse_expanded("h").is_err());
        assert!(Topology::parse_expanded("q13").is_err());
        assert!(Topology::parse_expanded("").is_err());
    }

    #[test]
    fn test_frame_len() {
        let t = Topology::parse("h c").unwrap();
        assert_eq!(t.payload_len(), 140);
        assert_eq!(t.frame_len(), 143);
    }

    #[test]
    fn test_from_str_accepts_both_forms() {
        let a: Topology = "h t".parse().unwrap();
        let b: Topology = "h13 t13".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serde_as_string() {
        let t = Topology::parse("h c").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"h c\"");
        let back: Topology = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<Topology>("\"h x\"").is_err());
    }

    #[test]
    fn test_decode_payload_rejects_short() {
        let t = Topology::parse("h").unwrap();
        let err = t.decode_payload(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedFrame {
                expected: 55,
                got: 13
            }
        ));
    }

    #[test]
    fn test_from_kinds_rejects_empty() {
        assert!(Topology::from_kinds(Vec::new()).is_err());
    }
}
