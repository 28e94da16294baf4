//! Wire format encoding and decoding.
//!
//! Implements the 12-byte frame header:
//! ```text
//! ┌─────────┬────────┬─────────┬───────────┬──────────┐
//! │ Version │ Type   │ Flags   │ Stream ID │ Length   │
//! │ 1 byte  │ 1 byte │ 2 bytes │ 4 bytes   │ 4 bytes  │
//! │ uint8   │ uint8  │ u16 BE  │ uint32 BE │ uint32 BE│
//! └─────────┴────────┴─────────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The meaning of `length`
//! depends on the frame type: payload size for Data, window delta for
//! WindowUpdate, correlation ID for Ping and reason code for GoAway.

use crate::error::{MuxError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// The only protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 0;

/// Window every stream starts with, in both directions (256 KiB).
pub const INITIAL_STREAM_WINDOW: u32 = 256 * 1024;

/// Stream ID reserved for session-level control frames.
pub const SESSION_STREAM_ID: u32 = 0;

/// Frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Carries stream payload.
    Data = 0,
    /// Grants send window, and carries stream flags without payload.
    WindowUpdate = 1,
    /// Session keepalive and round-trip measurement.
    Ping = 2,
    /// Session termination notice.
    GoAway = 3,
}

impl FrameType {
    /// Map a raw type byte, `None` for unknown types.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameType::Data),
            1 => Some(FrameType::WindowUpdate),
            2 => Some(FrameType::Ping),
            3 => Some(FrameType::GoAway),
            _ => None,
        }
    }
}

/// Go-away reason codes, carried in the `length` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GoAwayCode {
    /// Orderly shutdown.
    Normal = 0,
    /// The sender saw a protocol violation.
    ProtocolError = 1,
    /// The sender failed internally.
    InternalError = 2,
}

impl GoAwayCode {
    /// Map a raw reason code, `None` for unknown codes.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(GoAwayCode::Normal),
            1 => Some(GoAwayCode::ProtocolError),
            2 => Some(GoAwayCode::InternalError),
            _ => None,
        }
    }
}

/// Flag constants for the protocol.
pub mod flags {
    /// Opens a new stream, or marks a ping request.
    pub const SYN: u16 = 0b0000_0001;
    /// Acknowledges a new stream, or marks a ping response.
    pub const ACK: u16 = 0b0000_0010;
    /// Half-closes the sender's direction of a stream.
    pub const FIN: u16 = 0b0000_0100;
    /// Aborts a stream immediately.
    pub const RST: u16 = 0b0000_1000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (always [`PROTOCOL_VERSION`] when we send).
    pub version: u8,
    /// Raw frame type byte (see [`FrameType`]).
    pub frame_type: u8,
    /// Flag bits (see `flags` module).
    pub flags: u16,
    /// Stream identifier (0 = session).
    pub stream_id: u32,
    /// Payload length, window delta, ping ID or go-away code.
    pub length: u32,
}

impl Header {
    /// Create a new header at the current protocol version.
    pub fn new(frame_type: FrameType, flags: u16, stream_id: u32, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            frame_type: frame_type as u8,
            flags,
            stream_id,
            length,
        }
    }

    /// Data frame header announcing `length` payload bytes.
    pub fn data(flags: u16, stream_id: u32, length: u32) -> Self {
        Self::new(FrameType::Data, flags, stream_id, length)
    }

    /// Window update header granting `delta` bytes.
    pub fn window_update(flags: u16, stream_id: u32, delta: u32) -> Self {
        Self::new(FrameType::WindowUpdate, flags, stream_id, delta)
    }

    /// Ping header (SYN for a request, ACK for the reply).
    pub fn ping(flags: u16, ping_id: u32) -> Self {
        Self::new(FrameType::Ping, flags, SESSION_STREAM_ID, ping_id)
    }

    /// Go-away header.
    pub fn go_away(code: GoAwayCode) -> Self {
        Self::new(FrameType::GoAway, 0, SESSION_STREAM_ID, code as u32)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{flags, Header};
    ///
    /// let header = Header::ping(flags::SYN, 7);
    /// assert_eq!(header.encode(), [0, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 7]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.frame_type;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short; the caller keeps buffering.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            frame_type: buf[1],
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            stream_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Validate version and frame type.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(MuxError::InvalidVersion(self.version));
        }
        if FrameType::from_u8(self.frame_type).is_none() {
            return Err(MuxError::InvalidMessageType(self.frame_type));
        }
        Ok(())
    }

    /// Typed frame type, `None` if unknown.
    #[inline]
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// Check if a flag is set.
    #[inline]
    pub fn has_flag(&self, flag: u16) -> bool {
        flags::has_flag(self.flags, flag)
    }

    /// Number of payload bytes that follow this header on the wire.
    #[inline]
    pub fn payload_len(&self) -> u32 {
        match self.kind() {
            Some(FrameType::Data) => self.length,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let frame_types = [
            FrameType::Data,
            FrameType::WindowUpdate,
            FrameType::Ping,
            FrameType::GoAway,
        ];
        let flag_sets = (0..=0x0Fu16).chain([0x00F0, 0x8000, 0xFFFF]);
        let edges = [0, 1, 0x7FFF_FFFF, 0x8000_0000, u32::MAX];

        for flag_set in flag_sets {
            for frame_type in frame_types {
                for stream_id in edges {
                    for length in edges {
                        let original = Header {
                            version: PROTOCOL_VERSION,
                            frame_type: frame_type as u8,
                            flags: flag_set,
                            stream_id,
                            length,
                        };
                        let decoded = Header::decode(&original.encode()).unwrap();
                        assert_eq!(original, decoded);
                        assert_eq!(decoded.kind(), Some(frame_type));
                        assert!(decoded.validate().is_ok());
                    }
                }
            }
        }
    }

    #[test]
    fn test_decode_keeps_unvalidated_fields() {
        for byte in [1u8, 0x7F, 0xFF] {
            let bytes = [byte, byte, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
            let header = Header::decode(&bytes).unwrap();
            assert_eq!(header.version, byte);
            assert_eq!(header.frame_type, byte);
            assert_eq!(header.encode(), bytes);
        }
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header {
            version: 0x01,
            frame_type: 0x02,
            flags: 0x0304,
            stream_id: 0x05060708,
            length: 0x090A0B0C,
        };
        let bytes = header.encode();

        assert_eq!(
            bytes,
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]
        );
    }

    #[test]
    fn test_header_size_is_exactly_12() {
        assert_eq!(HEADER_SIZE, 12);
        let header = Header::window_update(0, 1, 0);
        assert_eq!(header.encode().len(), 12);
    }

    #[test]
    fn test_decode_ping_and_reencode() {
        let bytes = [0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07];
        let header = Header::decode(&bytes).unwrap();

        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.kind(), Some(FrameType::Ping));
        assert_eq!(header.flags, flags::SYN);
        assert_eq!(header.stream_id, 0);
        assert_eq!(header.length, 7);
        assert_eq!(header.encode(), bytes);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 11]; // One byte short
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_rejects_foreign_version() {
        let mut header = Header::ping(flags::SYN, 0);
        header.version = 1;
        let result = header.validate();
        assert!(matches!(result, Err(MuxError::InvalidVersion(1))));
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let mut header = Header::ping(flags::SYN, 0);
        header.frame_type = 9;
        let result = header.validate();
        assert!(matches!(result, Err(MuxError::InvalidMessageType(9))));
    }

    #[test]
    fn test_payload_len_only_for_data() {
        assert_eq!(Header::data(0, 1, 5).payload_len(), 5);
        assert_eq!(Header::window_update(0, 1, 5).payload_len(), 0);
        assert_eq!(Header::ping(flags::SYN, 5).payload_len(), 0);
        assert_eq!(Header::go_away(GoAwayCode::InternalError).payload_len(), 0);
    }

    #[test]
    fn test_go_away_header_carries_code() {
        let header = Header::go_away(GoAwayCode::ProtocolError);
        assert_eq!(header.kind(), Some(FrameType::GoAway));
        assert_eq!(header.stream_id, SESSION_STREAM_ID);
        assert_eq!(GoAwayCode::from_u32(header.length), Some(GoAwayCode::ProtocolError));
        assert_eq!(GoAwayCode::from_u32(7), None);
    }

    #[test]
    fn test_flags_has_flag() {
        let header = Header::window_update(flags::SYN | flags::FIN, 3, 0);
        assert!(header.has_flag(flags::SYN));
        assert!(header.has_flag(flags::FIN));
        assert!(!header.has_flag(flags::ACK));
        assert!(!header.has_flag(flags::RST));
    }

    #[test]
    fn test_min_max_values() {
        let header = Header::data(u16::MAX, u32::MAX, u32::MAX);
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }
}
