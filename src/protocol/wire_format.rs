//! Wire format encoding and decoding.
//!
//! Implements the 5-byte frame envelope:
//! ```text
//! ┌──────────┬───────┬─────────────────┐
//! │ Length   │ Type  │ Payload         │
//! │ 4 bytes  │ 1 byte│ Length - 1 bytes│
//! │ uint32 BE│       │                 │
//! └──────────┴───────┴─────────────────┘
//! ```
//!
//! `Length` counts the type byte plus the payload. All frame-level integers
//! are Big Endian.

use std::fmt;

use crate::error::{CubeError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Envelope size in bytes (length prefix + type byte).
pub const HEADER_SIZE: usize = 5;

/// Default maximum frame length (256 MB).
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 268_435_456;

/// Absolute maximum frame length (the length prefix is a u32).
pub const ABSOLUTE_MAX_FRAME_LENGTH: u32 = u32::MAX;

/// Arrow Native protocol version sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Message type byte carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0,
    Auth = 1,
    Query = 2,
    QueryResponseSchema = 3,
    QueryResponseBatch = 4,
    QueryComplete = 5,
    Error = 6,
}

impl MessageType {
    /// Get the wire byte for this type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name, used in logs and error context.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Handshake => "Handshake",
            MessageType::Auth => "Auth",
            MessageType::Query => "Query",
            MessageType::QueryResponseSchema => "QueryResponseSchema",
            MessageType::QueryResponseBatch => "QueryResponseBatch",
            MessageType::QueryComplete => "QueryComplete",
            MessageType::Error => "Error",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CubeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::Handshake),
            1 => Ok(MessageType::Auth),
            2 => Ok(MessageType::Query),
            3 => Ok(MessageType::QueryResponseSchema),
            4 => Ok(MessageType::QueryResponseBatch),
            5 => Ok(MessageType::QueryComplete),
            6 => Ok(MessageType::Error),
            other => Err(CubeError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded frame envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Byte count of type byte plus payload.
    pub length: u32,
    /// Raw type byte (not validated here; the message codec owns that).
    pub message_type: u8,
}

impl Header {
    /// Create a header for a payload of `payload_len` bytes.
    ///
    /// Fails if `payload_len + 1` does not fit in the u32 length prefix.
    pub fn for_payload(message_type: u8, payload_len: usize) -> Result<Self> {
        let length = u32::try_from(payload_len + 1).map_err(|_| CubeError::FrameTooLarge {
            length: u32::MAX,
            max: ABSOLUTE_MAX_FRAME_LENGTH,
        })?;
        Ok(Self {
            length,
            message_type,
        })
    }

    /// Payload length (excludes the type byte).
    #[inline]
    pub fn payload_length(&self) -> usize {
        self.length.saturating_sub(1) as usize
    }

    /// Encode header to bytes (Big Endian length).
    ///
    /// # Example
    ///
    /// ```
    /// use cube_native_client::protocol::Header;
    ///
    /// let header = Header::for_payload(2, 4).unwrap();
    /// assert_eq!(header.encode(), [0, 0, 0, 5, 2]);
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
    /// Panics if buffer is smaller than `HEADER_SIZE` (5 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4] = self.message_type;
    }

    /// Decode only the length prefix.
    ///
    /// Returns `None` if buffer is shorter than 4 bytes.
    pub fn decode_length(buf: &[u8]) -> Option<u32> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: Self::decode_length(buf)?,
            message_type: buf[4],
        })
    }

    /// Validate a declared frame length against the configured ceiling.
    ///
    /// A zero length is rejected: the type byte is mandatory.
    pub fn validate_length(length: u32, max_frame_length: u32) -> Result<()> {
        if length == 0 {
            return Err(CubeError::MalformedMessage {
                message_type: "frame",
                offset: 0,
                needed: 1,
                available: 0,
            });
        }
        if length > max_frame_length {
            return Err(CubeError::FrameTooLarge {
                length,
                max: max_frame_length,
            });
        }
        Ok(())
    }
}
