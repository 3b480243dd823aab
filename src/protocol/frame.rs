//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame: type byte plus payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use cube_native_client::protocol::{Frame, MessageType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(MessageType::Error.as_u8(), Bytes::from_static(b"oops"));
//!
//! assert_eq!(frame.message_type(), Some(MessageType::Error));
//! assert_eq!(frame.length(), 5);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, MessageType, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type byte.
    pub type_byte: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a type byte and payload.
    pub fn new(type_byte: u8, payload: Bytes) -> Self {
        Self { type_byte, payload }
    }

    /// Create a frame from raw bytes (copies data).
    pub fn from_parts(type_byte: u8, payload: &[u8]) -> Self {
        Self {
            type_byte,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Value of the length prefix for this frame (type byte + payload).
    #[inline]
    pub fn length(&self) -> usize {
        self.payload.len() + 1
    }

    /// Decoded message type, if the byte is known.
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.type_byte).ok()
    }

    /// Check if this is a server error frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.type_byte == MessageType::Error.as_u8()
    }

    /// Envelope for this frame.
    pub fn header(&self) -> Result<Header> {
        Header::for_payload(self.type_byte, self.payload.len())
    }
}

/// Build a complete frame as a single byte vector.
///
/// Use `build_frame_parts` for scatter/gather I/O (writev).
///
/// # Example
///
/// ```
/// use cube_native_client::protocol::build_frame;
///
/// let bytes = build_frame(2, b"hello").unwrap();
/// assert_eq!(bytes, [0, 0, 0, 6, 2, b'h', b'e', b'l', b'l', b'o']);
/// ```
pub fn build_frame(type_byte: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let header = Header::for_payload(type_byte, payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Build frame parts for scatter/gather I/O.
///
/// Returns the encoded envelope and a reference to the payload.
pub fn build_frame_parts(type_byte: u8, payload: &[u8]) -> Result<([u8; HEADER_SIZE], &[u8])> {
    let header = Header::for_payload(type_byte, payload.len())?;
    Ok((header.encode(), payload))
}
