//! Typed Arrow Native messages.
//!
//! | Type | Message             | Payload                                   |
//! |------|---------------------|-------------------------------------------|
//! | 0    | Handshake           | `version: u32`                            |
//! | 1    | Auth                | `token: String`, `database: Option<String>` |
//! | 2    | Query               | `sql: String`                             |
//! | 3    | QueryResponseSchema | Arrow IPC chunk bytes                     |
//! | 4    | QueryResponseBatch  | Arrow IPC chunk bytes                     |
//! | 5    | QueryComplete       | `rows_affected: u64`                      |
//! | 6    | Error               | remaining bytes as UTF-8                  |
//!
//! # Example
//!
//! ```
//! use cube_native_client::codec::Message;
//!
//! let msg = Message::Query { sql: "SELECT 1".to_string() };
//! let (type_byte, payload) = msg.encode();
//! assert_eq!(Message::decode(type_byte, payload).unwrap(), msg);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire::{put_optional_string, put_string, put_u32, put_u64, PayloadReader};
use crate::error::Result;
use crate::protocol::{Frame, MessageType};

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Handshake { version: u32 },
    Auth {
        token: String,
        database: Option<String>,
    },
    Query { sql: String },
    QueryResponseSchema { arrow_ipc_bytes: Bytes },
    QueryResponseBatch { arrow_ipc_bytes: Bytes },
    QueryComplete { rows_affected: u64 },
    Error { message: String },
}

impl Message {
    /// Wire type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Handshake { .. } => MessageType::Handshake,
            Message::Auth { .. } => MessageType::Auth,
            Message::Query { .. } => MessageType::Query,
            Message::QueryResponseSchema { .. } => MessageType::QueryResponseSchema,
            Message::QueryResponseBatch { .. } => MessageType::QueryResponseBatch,
            Message::QueryComplete { .. } => MessageType::QueryComplete,
            Message::Error { .. } => MessageType::Error,
        }
    }

    /// Encode into a type byte and payload.
    pub fn encode(&self) -> (u8, Bytes) {
        let mut buf = BytesMut::new();
        match self {
            Message::Handshake { version } => put_u32(&mut buf, *version),
            Message::Auth { token, database } => {
                put_string(&mut buf, token);
                put_optional_string(&mut buf, database.as_deref());
            }
            Message::Query { sql } => put_string(&mut buf, sql),
            Message::QueryResponseSchema { arrow_ipc_bytes }
            | Message::QueryResponseBatch { arrow_ipc_bytes } => {
                return (self.message_type().as_u8(), arrow_ipc_bytes.clone());
            }
            Message::QueryComplete { rows_affected } => put_u64(&mut buf, *rows_affected),
            Message::Error { message } => buf.extend_from_slice(message.as_bytes()),
        }
        (self.message_type().as_u8(), buf.freeze())
    }

    /// Encode into a frame.
    pub fn to_frame(&self) -> Frame {
        let (type_byte, payload) = self.encode();
        Frame::new(type_byte, payload)
    }

    /// Decode a payload according to its type byte.
    pub fn decode(type_byte: u8, payload: Bytes) -> Result<Self> {
        let message_type = MessageType::try_from(type_byte)?;
        let mut reader = PayloadReader::new(message_type.name(), payload);

        let message = match message_type {
            MessageType::Handshake => Message::Handshake {
                version: reader.read_u32()?,
            },
            MessageType::Auth => Message::Auth {
                token: reader.read_string("token")?,
                database: reader.read_optional_string("database")?,
            },
            MessageType::Query => Message::Query {
                sql: reader.read_string("sql")?,
            },
            MessageType::QueryResponseSchema => Message::QueryResponseSchema {
                arrow_ipc_bytes: reader.take_remaining(),
            },
            MessageType::QueryResponseBatch => Message::QueryResponseBatch {
                arrow_ipc_bytes: reader.take_remaining(),
            },
            MessageType::QueryComplete => Message::QueryComplete {
                rows_affected: reader.read_u64()?,
            },
            MessageType::Error => Message::Error {
                message: reader.read_remaining_string("message")?,
            },
        };

        reader.finish()?;
        Ok(message)
    }

    /// Decode a complete frame.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        Self::decode(frame.type_byte, frame.payload)
    }
}
