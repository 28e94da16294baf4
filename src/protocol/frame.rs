//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{Frame, Header, flags};
//! use bytes::Bytes;
//!
//! let header = Header::data(flags::SYN, 1, 5);
//! let frame = Frame::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.stream_id(), 1);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{flags, FrameType, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (empty for everything but Data frames).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the stream ID.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Get the typed frame type.
    #[inline]
    pub fn kind(&self) -> Option<FrameType> {
        self.header.kind()
    }

    /// Check if this frame opens a stream (or is a ping request).
    #[inline]
    pub fn is_syn(&self) -> bool {
        flags::has_flag(self.header.flags, flags::SYN)
    }

    /// Check if this frame acknowledges a stream (or is a ping reply).
    #[inline]
    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.header.flags, flags::ACK)
    }

    /// Check if this frame half-closes a stream.
    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.header.flags, flags::FIN)
    }

    /// Check if this frame resets a stream.
    #[inline]
    pub fn is_rst(&self) -> bool {
        flags::has_flag(self.header.flags, flags::RST)
    }
}

/// Build a complete frame as a single byte vector.
///
/// ```
/// use muxwire::protocol::{build_frame, Header, HEADER_SIZE};
///
/// let bytes = build_frame(&Header::data(0, 1, 5), b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let header = Header::data(flags::ACK, 42, 5);
        let frame = Frame::new(header, Bytes::from_static(b"hello"));

        assert_eq!(frame.stream_id(), 42);
        assert_eq!(frame.kind(), Some(FrameType::Data));
        assert_eq!(frame.payload(), b"hello");
        assert!(frame.is_ack());
        assert!(!frame.is_syn());
    }

    #[test]
    fn test_frame_flag_accessors() {
        let fin = Frame::new(Header::window_update(flags::FIN, 1, 0), Bytes::new());
        assert!(fin.is_fin());
        assert!(!fin.is_rst());

        let rst = Frame::new(Header::window_update(flags::RST, 1, 0), Bytes::new());
        assert!(rst.is_rst());

        let syn = Frame::new(Header::ping(flags::SYN, 3), Bytes::new());
        assert!(syn.is_syn());
        assert_eq!(syn.kind(), Some(FrameType::Ping));
    }

    #[test]
    fn test_build_frame() {
        let header = Header::data(0, 3, 5);
        let bytes = build_frame(&header, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        let parsed = Header::decode(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_build_frame_without_payload() {
        let bytes = build_frame(&Header::window_update(flags::SYN, 1, 0), b"");
        assert_eq!(bytes, [0, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0]);
    }
}
