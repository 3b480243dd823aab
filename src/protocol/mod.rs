//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the frame layer of the Arrow Native protocol:
//! - 5-byte envelope encoding/decoding (u32 BE length + type byte)
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//!
//! It has no knowledge of message payload layouts; see [`crate::codec`].

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, build_frame_parts, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    Header, MessageType, ABSOLUTE_MAX_FRAME_LENGTH, DEFAULT_MAX_FRAME_LENGTH, HEADER_SIZE,
    LENGTH_PREFIX_SIZE, PROTOCOL_VERSION,
};
