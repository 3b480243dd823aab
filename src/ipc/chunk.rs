//! Arrow IPC chunk parsing.
//!
//! Each `QueryResponseSchema`/`QueryResponseBatch` payload holds one or more
//! whole Arrow IPC encapsulated messages:
//! ```text
//! ┌──────────────┬─────────────┬──────────────────┬─────────┬──────────────┐
//! │ Continuation │ Body length │ Body (metadata)  │ Padding │ Message body │
//! │ 0xFFFFFFFF   │ uint32 LE   │ Body length bytes│ to 8    │ (ArrowMessage│
//! │ uint32 LE    │             │                  │         │  layout only)│
//! └──────────────┴─────────────┴──────────────────┴─────────┴──────────────┘
//! ```
//!
//! A body length of zero is the end-of-stream marker. All integers here are
//! Little Endian, unlike the Big Endian frame envelope around them.

use bytes::{Bytes, BytesMut};

use crate::error::{CubeError, Result};

/// Required continuation marker value.
pub const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

/// Continuation marker + body length.
pub const CHUNK_PREFIX_SIZE: usize = 8;

/// Chunk alignment in bytes.
pub const ALIGNMENT: usize = 8;

/// Default ceiling for a single chunk body (256 MB).
pub const DEFAULT_MAX_BODY_LENGTH: u32 = 268_435_456;

/// Canonical end-of-stream marker bytes.
pub const END_OF_STREAM: [u8; CHUNK_PREFIX_SIZE] = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];

/// How much of the payload belongs to a chunk after its metadata body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkLayout {
    /// The chunk is exactly prefix + body + padding; the body is opaque.
    Opaque,
    /// The body is an Arrow `Message` flatbuffer; the data body it declares
    /// (`bodyLength`) follows the padding and belongs to the same chunk.
    #[default]
    ArrowMessage,
}

/// What an Arrow-aware chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    EndOfStream,
    Schema,
    RecordBatch,
    DictionaryBatch,
    /// Opaque layout, or a header type this crate does not interpret.
    Other,
}

/// One Arrow IPC encapsulated message found inside a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcChunk {
    /// Offset of the continuation marker within its payload.
    pub offset: usize,
    /// Declared body length.
    pub body_length: u32,
    /// Body bytes (metadata flatbuffer for Arrow messages).
    pub body: Bytes,
    /// Padding bytes present after the body (not validated).
    pub padding: Bytes,
    /// Arrow data body, empty for the opaque layout.
    pub message_body: Bytes,
    /// Header type, when known.
    pub kind: ChunkKind,
    /// Every byte of the chunk exactly as received.
    raw: Bytes,
}

impl IpcChunk {
    /// Continuation marker (always `0xFFFFFFFF` once parsed).
    #[inline]
    pub fn continuation(&self) -> u32 {
        CONTINUATION_MARKER
    }

    /// Check if this is the end-of-stream marker.
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        self.body_length == 0
    }

    /// Chunk bytes as received.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Cheap clone of the received bytes.
    #[inline]
    pub fn raw_bytes(&self) -> Bytes {
        self.raw.clone()
    }

    /// Whether the chunk ends on an 8-byte boundary.
    ///
    /// Only the last chunk of a payload can end short of it.
    pub fn is_aligned(&self) -> bool {
        self.raw.len() % ALIGNMENT == 0
    }

    /// Append the chunk's bytes, as received, to a reassembled stream.
    pub fn write_to(&self, out: &mut BytesMut) {
        out.extend_from_slice(&self.raw);
    }
}

/// Round `n` up to the next multiple of 8.
#[inline]
pub fn align(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Lazy, non-restartable iterator over the chunks of one payload.
///
/// Yields an error at most once and then stops.
#[derive(Debug)]
pub struct ChunkIter {
    payload: Bytes,
    offset: usize,
    layout: ChunkLayout,
    max_body_length: u32,
    done: bool,
}

impl ChunkIter {
    /// Iterate the chunks in `payload`.
    pub fn new(payload: Bytes, layout: ChunkLayout, max_body_length: u32) -> Self {
        Self {
            payload,
            offset: 0,
            layout,
            max_body_length,
            done: false,
        }
    }

    /// Offset of the next chunk to be parsed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn framing_error(&mut self, offset: usize, reason: String) -> CubeError {
        self.done = true;
        CubeError::InvalidIpcFraming { offset, reason }
    }

    fn parse_next(&mut self) -> Result<IpcChunk> {
        let start = self.offset;
        let len = self.payload.len();
        let remaining = len - start;

        if remaining < CHUNK_PREFIX_SIZE {
            return Err(self.framing_error(
                start,
                format!("chunk prefix needs {CHUNK_PREFIX_SIZE} bytes, {remaining} available"),
            ));
        }

        let prefix = &self.payload[start..start + CHUNK_PREFIX_SIZE];
        let continuation = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let body_length = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        if continuation != CONTINUATION_MARKER {
            return Err(self.framing_error(
                start,
                format!("continuation marker 0x{continuation:08x}, expected 0xffffffff"),
            ));
        }

        if body_length == 0 {
            // End-of-stream: nothing after it in this payload is parsed.
            self.done = true;
            self.offset = len;
            return Ok(IpcChunk {
                offset: start,
                body_length,
                body: Bytes::new(),
                padding: Bytes::new(),
                message_body: Bytes::new(),
                kind: ChunkKind::EndOfStream,
                raw: self.payload.slice(start..start + CHUNK_PREFIX_SIZE),
            });
        }

        if body_length >= self.max_body_length {
            return Err(self.framing_error(
                start + 4,
                format!(
                    "body length {body_length} exceeds maximum {}",
                    self.max_body_length
                ),
            ));
        }

        let body_start = start + CHUNK_PREFIX_SIZE;
        let body_end = body_start + body_length as usize;
        if body_end > len {
            return Err(self.framing_error(
                body_start,
                format!(
                    "body of {body_length} bytes overruns payload ({} available)",
                    len - body_start
                ),
            ));
        }
        let padded_end = align(body_end).min(len);

        let body = self.payload.slice(body_start..body_end);
        let padding = self.payload.slice(body_end..padded_end);

        let (kind, message_body, end) = match self.layout {
            ChunkLayout::Opaque => (ChunkKind::Other, Bytes::new(), padded_end),
            ChunkLayout::ArrowMessage => {
                let (kind, data_length) = inspect_message(&body)
                    .map_err(|reason| self.framing_error(body_start, reason))?;
                let data_start = align(body_end);
                let data_end = data_start + data_length;
                if data_end > len {
                    return Err(self.framing_error(
                        data_start.min(len),
                        format!(
                            "message body of {data_length} bytes overruns payload ({} available)",
                            len.saturating_sub(data_start)
                        ),
                    ));
                }
                let message_body = self.payload.slice(data_start..data_end);
                (kind, message_body, align(data_end).min(len))
            }
        };

        self.offset = end;
        Ok(IpcChunk {
            offset: start,
            body_length,
            body,
            padding,
            message_body,
            kind,
            raw: self.payload.slice(start..end),
        })
    }
}

impl Iterator for ChunkIter {
    type Item = Result<IpcChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.payload.len() {
            return None;
        }
        Some(self.parse_next())
    }
}

impl std::iter::FusedIterator for ChunkIter {}

/// Read the header type and declared data body length of an Arrow message.
fn inspect_message(metadata: &[u8]) -> std::result::Result<(ChunkKind, usize), String> {
    let message = arrow_ipc::root_as_message(metadata)
        .map_err(|e| format!("invalid Arrow message metadata: {e}"))?;

    let data_length = usize::try_from(message.bodyLength())
        .map_err(|_| format!("negative message body length {}", message.bodyLength()))?;

    let kind = match message.header_type() {
        arrow_ipc::MessageHeader::Schema => ChunkKind::Schema,
        arrow_ipc::MessageHeader::RecordBatch => ChunkKind::RecordBatch,
        arrow_ipc::MessageHeader::DictionaryBatch => ChunkKind::DictionaryBatch,
        _ => ChunkKind::Other,
    };

    Ok((kind, data_length))
}
