//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForBody`: Length parsed, need N more bytes (type byte + payload)
//!
//! # Example
//!
//! ```
//! use cube_native_client::protocol::{build_frame, FrameBuffer};
//!
//! let bytes = build_frame(6, b"boom").unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].payload(), b"boom");
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_FRAME_LENGTH, LENGTH_PREFIX_SIZE};
use super::Frame;
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete length prefix (need 4 bytes).
    WaitingForLength,
    /// Length parsed, waiting for type byte and payload.
    WaitingForBody { length: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
/// The length prefix is validated before any body bytes are buffered, so a
/// corrupt prefix never causes unbounded growth.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame length.
    max_frame_length: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame length: 256MB.
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Create a new frame buffer with a custom max frame length.
    pub fn with_max_frame_length(max_frame_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_length,
        }
    }

    /// Configured frame length ceiling.
    pub fn max_frame_length(&self) -> u32 {
        self.max_frame_length
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a length prefix exceeds the ceiling, or
    /// `MalformedMessage` for a zero length prefix.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from already buffered bytes.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let Some(length) = Header::decode_length(&self.buffer) else {
                        return Ok(None);
                    };
                    Header::validate_length(length, self.max_frame_length)?;

                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForBody { length };
                }

                State::WaitingForBody { length } => {
                    let length = length as usize;
                    if self.buffer.len() < length {
                        return Ok(None);
                    }

                    let mut body = self.buffer.split_to(length);
                    let type_byte = body[0];
                    let payload = body.split_off(1).freeze();

                    self.state = State::WaitingForLength;
                    return Ok(Some(Frame::new(type_byte, payload)));
                }
            }
        }
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes still needed to complete the frame in progress.
    ///
    /// Used to report how far a read got when the peer disconnects.
    pub fn pending(&self) -> (usize, usize) {
        match self.state {
            State::WaitingForLength => (LENGTH_PREFIX_SIZE, self.buffer.len()),
            State::WaitingForBody { length } => (length as usize, self.buffer.len()),
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer holds no partial frame.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && matches!(self.state, State::WaitingForLength)
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
