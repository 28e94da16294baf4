//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol shared by both ends:
//! - 12-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    flags, FrameType, GoAwayCode, Header, HEADER_SIZE, INITIAL_STREAM_WINDOW, PROTOCOL_VERSION,
    SESSION_STREAM_ID,
};
