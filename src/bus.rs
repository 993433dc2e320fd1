// SPDX-License-Identifier: Apache-2.0

//! OD4-style sensor bus datagram framing.
//!
//! Every datagram on the multicast bus carries a fixed 20-byte little-endian
//! header followed by a message-specific payload:
//!
//! ```text
//! ┌─────────┬────────────┬───────────┬──────────┬─────────────┬─────────┐
//! │ magic   │ message id │ sender id │ sequence │ payload len │ payload │
//! │ 4B      │ u32        │ u32       │ u32      │ u32         │ ...     │
//! └─────────┴────────────┴───────────┴──────────┴─────────────┴─────────┘
//! ```
//!
//! The magic is the ASCII bytes `OD4` followed by the wire layout version.
//! The payload length field must equal the number of bytes remaining after
//! the header; any mismatch is a decode error, never a crash.

use std::fmt;

/// Header magic bytes: "OD4" plus wire layout version 1.
pub const MAGIC: [u8; 4] = [0x4f, 0x44, 0x34, 0x01];

/// Message id for LiDAR point-cloud readings.
pub const MSG_POINT_CLOUD: u32 = 49;

/// Message id for geodetic WGS-84 position readings.
pub const MSG_GEODETIC_POSITION: u32 = 19;

/// Message id for geodetic heading readings.
pub const MSG_GEODETIC_HEADING: u32 = 1051;

/// Decode errors for bus datagrams and message payloads.
///
/// Out-of-range sensor readings are deliberately *not* an error: they are a
/// valid real-world condition and are surfaced as metadata on the decoded
/// scan instead (see [`crate::scan::Scan::out_of_range`]).
#[derive(Debug)]
pub enum DecodeError {
    /// Message id is not present in the registry.  Non-fatal: the pipeline
    /// skips the datagram and keeps processing.
    UnknownMessageType(u32),
    /// Datagram shorter than the declared layout, or a declared length that
    /// disagrees with the actual bytes.
    TruncatedOrMalformed(String),
}

impl std::error::Error for DecodeError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::UnknownMessageType(id) => write!(f, "unknown message type: {}", id),
            DecodeError::TruncatedOrMalformed(msg) => {
                write!(f, "truncated or malformed datagram: {}", msg)
            }
        }
    }
}

/// Messages the bridge knows how to route.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    /// LiDAR point-cloud reading, the only payload the bridge decodes.
    PointCloud,
    /// Geodetic WGS-84 position reading.  Recognized but not re-published;
    /// position fusion is out of scope.
    GeodeticPosition,
    /// Geodetic heading reading.  Recognized but not re-published.
    GeodeticHeading,
}

impl MessageKind {
    /// Look up a message id in the registry.
    pub fn from_id(id: u32) -> Option<MessageKind> {
        match id {
            MSG_POINT_CLOUD => Some(MessageKind::PointCloud),
            MSG_GEODETIC_POSITION => Some(MessageKind::GeodeticPosition),
            MSG_GEODETIC_HEADING => Some(MessageKind::GeodeticHeading),
            _ => None,
        }
    }

    /// Stable topic segment for this message kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PointCloud => "lidar",
            MessageKind::GeodeticPosition => "position",
            MessageKind::GeodeticHeading => "heading",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owned bus datagram header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// Message id, demultiplexing key for the payload format.
    pub message_id: u32,
    /// Stable id of the sending sensor/process.
    pub sender_id: u32,
    /// Per-sender sequence counter, carried through to the envelope for
    /// downstream gap detection.
    pub sequence: u32,
    /// Declared payload length in bytes.
    pub payload_len: u32,
}

impl Header {
    /// Length of the header in bytes/octets.
    pub const LEN: usize = 20;
}

/// Zero-copy view of a bus datagram with a validated header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeaderSlice<'a> {
    slice: &'a [u8],
}

impl<'a> HeaderSlice<'a> {
    /// Validate the header of a raw datagram.
    ///
    /// Checks the magic/version marker, the minimum length, and that the
    /// declared payload length matches the bytes actually present.
    pub fn from_slice(slice: &'a [u8]) -> Result<HeaderSlice<'a>, DecodeError> {
        if slice.len() < Header::LEN {
            return Err(DecodeError::TruncatedOrMalformed(format!(
                "datagram too short for header: {} bytes",
                slice.len()
            )));
        }

        if slice[0..4] != MAGIC {
            return Err(DecodeError::TruncatedOrMalformed(format!(
                "bad magic or unsupported layout version: {:02x?}",
                &slice[0..4]
            )));
        }

        let declared = u32::from_le_bytes([slice[16], slice[17], slice[18], slice[19]]) as usize;
        let actual = slice.len() - Header::LEN;
        if declared != actual {
            return Err(DecodeError::TruncatedOrMalformed(format!(
                "declared payload length {} but {} bytes remain",
                declared, actual
            )));
        }

        Ok(HeaderSlice { slice })
    }

    pub fn to_header(&self) -> Header {
        Header {
            message_id: self.message_id(),
            sender_id: self.sender_id(),
            sequence: self.sequence(),
            payload_len: self.payload_len(),
        }
    }

    pub fn message_id(&self) -> u32 {
        u32::from_le_bytes([self.slice[4], self.slice[5], self.slice[6], self.slice[7]])
    }

    pub fn sender_id(&self) -> u32 {
        u32::from_le_bytes([self.slice[8], self.slice[9], self.slice[10], self.slice[11]])
    }

    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes([self.slice[12], self.slice[13], self.slice[14], self.slice[15]])
    }

    pub fn payload_len(&self) -> u32 {
        u32::from_le_bytes([self.slice[16], self.slice[17], self.slice[18], self.slice[19]])
    }

    /// Message kind for the header's id, or `UnknownMessageType`.
    pub fn kind(&self) -> Result<MessageKind, DecodeError> {
        let id = self.message_id();
        MessageKind::from_id(id).ok_or(DecodeError::UnknownMessageType(id))
    }

    /// The payload bytes following the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.slice[Header::LEN..]
    }
}

/// Encode a datagram with the given header fields and payload.
///
/// Used by tests, benchmarks, and bus simulators; the bridge itself only
/// decodes.
pub fn encode_datagram(message_id: u32, sender_id: u32, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(Header::LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&message_id.to_le_bytes());
    out.extend_from_slice(&sender_id.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let datagram = encode_datagram(MSG_POINT_CLOUD, 7, 42, &[1, 2, 3, 4]);
        let slice = HeaderSlice::from_slice(&datagram).unwrap();

        let header = slice.to_header();
        assert_eq!(header.message_id, MSG_POINT_CLOUD);
        assert_eq!(header.sender_id, 7);
        assert_eq!(header.sequence, 42);
        assert_eq!(header.payload_len, 4);
        assert_eq!(slice.payload(), &[1, 2, 3, 4]);
        assert_eq!(slice.kind().unwrap(), MessageKind::PointCloud);
    }

    #[test]
    fn test_short_datagram() {
        for len in 0..Header::LEN {
            let datagram = vec![0u8; len];
            let err = HeaderSlice::from_slice(&datagram).unwrap_err();
            assert!(matches!(err, DecodeError::TruncatedOrMalformed(_)));
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut datagram = encode_datagram(MSG_POINT_CLOUD, 1, 1, &[]);
        datagram[0] = 0xde;
        let err = HeaderSlice::from_slice(&datagram).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedOrMalformed(_)));
    }

    #[test]
    fn test_payload_length_mismatch() {
        let mut datagram = encode_datagram(MSG_POINT_CLOUD, 1, 1, &[1, 2, 3, 4]);
        // Declare more bytes than are present.
        datagram[16..20].copy_from_slice(&8u32.to_le_bytes());
        let err = HeaderSlice::from_slice(&datagram).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedOrMalformed(_)));

        let truncated = &datagram[..datagram.len() - 2];
        assert!(HeaderSlice::from_slice(truncated).is_err());
    }

    #[test]
    fn test_unknown_message_id() {
        let datagram = encode_datagram(0xff, 1, 1, &[]);
        let slice = HeaderSlice::from_slice(&datagram).unwrap();
        match slice.kind() {
            Err(DecodeError::UnknownMessageType(id)) => assert_eq!(id, 0xff),
            other => panic!("expected UnknownMessageType, got {:?}", other),
        }
    }

    #[test]
    fn test_registry() {
        assert_eq!(
            MessageKind::from_id(MSG_POINT_CLOUD),
            Some(MessageKind::PointCloud)
        );
        assert_eq!(
            MessageKind::from_id(MSG_GEODETIC_POSITION),
            Some(MessageKind::GeodeticPosition)
        );
        assert_eq!(
            MessageKind::from_id(MSG_GEODETIC_HEADING),
            Some(MessageKind::GeodeticHeading)
        );
        assert_eq!(MessageKind::from_id(0), None);
        assert_eq!(MessageKind::PointCloud.as_str(), "lidar");
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let datagram = encode_datagram(MSG_POINT_CLOUD, 1, 0, &[]);
        let slice = HeaderSlice::from_slice(&datagram).unwrap();
        assert_eq!(slice.payload_len(), 0);
        assert!(slice.payload().is_empty());
    }
}
