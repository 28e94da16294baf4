//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 12 bytes
//! - `WaitingForPayload`: Data header parsed, need N more payload bytes
//!
//! Only Data frames carry a payload; every other frame is complete as
//! soon as its header is. Version and frame type are validated the moment
//! a header is parsed, so a bad frame never makes the session wait for a
//! payload that will never be interpreted. The same goes for a Data frame
//! longer than the payload limit.

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, HEADER_SIZE};
use super::Frame;
use crate::error::{MuxError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 12 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Largest Data payload accepted.
    max_payload: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer (64KB initial capacity).
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    /// Create a new frame buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
            max_payload: u32::MAX,
        }
    }

    /// Reject Data frames whose payload is longer than `limit`.
    ///
    /// Default: no limit.
    pub fn with_max_payload(mut self, limit: u32) -> Self {
        self.max_payload = limit;
        self
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns error on a header with a foreign version or unknown type,
    /// or a Data header over the payload limit.
    /// Frames extracted before the bad header are discarded with it; the
    /// session loop uses [`next_frame`](Self::next_frame) to keep them.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Some(header) => header,
                        None => return Ok(None),
                    };

                    header.validate()?;

                    let remaining = header.payload_len();
                    if remaining > self.max_payload {
                        return Err(MuxError::FrameTooLarge(remaining));
                    }

                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if remaining == 0 {
                        return Ok(Some(Frame::new(header, Bytes::new())));
                    }

                    self.state = State::WaitingForPayload { header, remaining };
                }

                State::WaitingForPayload { header, remaining } => {
                    let remaining = *remaining as usize;

                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    let header = *header;

                    self.state = State::WaitingForHeader;

                    return Ok(Some(Frame::new(header, payload)));
                }
            }
        }
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;
    use crate::protocol::{build_frame, flags, FrameType, GoAwayCode};

    fn data_frame(stream_id: u32, payload: &[u8]) -> Vec<u8> {
        build_frame(
            &Header::data(0, stream_id, payload.len() as u32),
            payload,
        )
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&data_frame(1, b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id(), 1);
        assert_eq!(frames[0].payload(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_control_frames_have_no_payload() {
        let mut buffer = FrameBuffer::new();

        let mut bytes = Vec::new();
        // A window update whose delta would look like a huge payload length.
        bytes.extend(build_frame(&Header::window_update(flags::SYN, 1, 1 << 20), b""));
        bytes.extend(build_frame(&Header::ping(flags::SYN, 9), b""));
        bytes.extend(build_frame(&Header::go_away(GoAwayCode::Normal), b""));

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].kind(), Some(FrameType::WindowUpdate));
        assert_eq!(frames[0].header.length, 1 << 20);
        assert_eq!(frames[1].kind(), Some(FrameType::Ping));
        assert_eq!(frames[2].kind(), Some(FrameType::GoAway));
        assert!(frames.iter().all(|f| f.payload.is_empty()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = data_frame(1, b"first");
        combined.extend(data_frame(3, b"second"));
        combined.extend(data_frame(5, b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].stream_id(), 1);
        assert_eq!(frames[1].stream_id(), 3);
        assert_eq!(frames[2].payload(), b"third");
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let bytes = data_frame(1, b"test");

        let frames = buffer.push(&bytes[..5]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = data_frame(1, payload);

        let partial_len = HEADER_SIZE + 10;
        let frames = buffer.push(&bytes[..partial_len]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), payload);
    }

    #[test]
    fn test_empty_data_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&data_frame(7, b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_invalid_version_rejected_before_payload() {
        let mut buffer = FrameBuffer::new();
        let mut header = Header::data(0, 1, 1000);
        header.version = 1;

        let result = buffer.push(&header.encode());
        assert!(matches!(result, Err(MuxError::InvalidVersion(1))));
    }

    #[test]
    fn test_invalid_type_rejected() {
        let mut buffer = FrameBuffer::new();
        let mut header = Header::ping(flags::SYN, 0);
        header.frame_type = 4;

        let result = buffer.push(&header.encode());
        assert!(matches!(result, Err(MuxError::InvalidMessageType(4))));
    }

    #[test]
    fn test_oversized_data_rejected_before_payload() {
        let mut buffer = FrameBuffer::new().with_max_payload(16);

        let frames = buffer.push(&data_frame(1, &[0u8; 16])).unwrap();
        assert_eq!(frames.len(), 1);

        let result = buffer.push(&Header::data(0, 1, 17).encode());
        assert!(matches!(result, Err(MuxError::FrameTooLarge(17))));
        assert_eq!(buffer.len(), HEADER_SIZE);
    }

    #[test]
    fn test_payload_limit_ignores_control_frames() {
        let mut buffer = FrameBuffer::new().with_max_payload(16);

        let frames = buffer
            .push(&build_frame(&Header::window_update(0, 1, 1 << 20), b""))
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.length, 1 << 20);
    }

    #[test]
    fn test_next_frame_keeps_frames_before_bad_header() {
        let mut buffer = FrameBuffer::new();
        let mut bad = Header::ping(flags::SYN, 0);
        bad.version = 9;

        let mut bytes = data_frame(1, b"ok");
        bytes.extend_from_slice(&bad.encode());
        buffer.extend(&bytes);

        let first = buffer.next_frame().unwrap().unwrap();
        assert_eq!(first.payload(), b"ok");
        assert!(buffer.next_frame().is_err());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = data_frame(1, b"test");

        buffer.push(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = data_frame(1, b"hi");
        bytes.extend(build_frame(&Header::ping(flags::ACK, 4), b""));

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 2);
        assert_eq!(all_frames[0].payload(), b"hi");
        assert_eq!(all_frames[1].header.length, 4);
    }
}
