//! Decoding reassembled chunks into Arrow record batches.
//!
//! Chunk bytes are fed, in arrival order, to `arrow-ipc`'s push-based
//! stream decoder. Chunk boundaries do not matter to the decoder; it only
//! sees the same contiguous stream a file reader would.
//!
//! The schema is read from the schema chunk's metadata directly. The stream
//! decoder only installs a schema once bytes past it arrive, and a schema
//! with no rows behind it must still be available.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_buffer::Buffer;
use arrow_ipc::convert::fb_to_schema;
use arrow_ipc::reader::StreamDecoder;
use arrow_schema::SchemaRef;
use bytes::Bytes;

use super::chunk::{ChunkIter, ChunkKind, ChunkLayout, IpcChunk, DEFAULT_MAX_BODY_LENGTH};
use crate::error::{CubeError, Result};

/// Incremental Arrow IPC stream decoder.
pub struct BatchDecoder {
    decoder: StreamDecoder,
    schema: Option<SchemaRef>,
}

impl BatchDecoder {
    /// Create a decoder that has seen no bytes yet.
    pub fn new() -> Self {
        Self {
            decoder: StreamDecoder::new(),
            schema: None,
        }
    }

    /// Schema, once the schema chunk has been fed.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    /// Feed the chunks of one payload; returns every batch they complete.
    pub fn decode_chunks(&mut self, chunks: &[IpcChunk]) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        for chunk in chunks {
            if self.schema.is_none() {
                self.schema = chunk_schema(chunk)?;
            }
            batches.extend(self.feed(chunk.as_bytes())?);
        }
        Ok(batches)
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<RecordBatch>> {
        let mut buffer = Buffer::from_vec(bytes.to_vec());
        let mut batches = Vec::new();

        while !buffer.is_empty() {
            match self.decoder.decode(&mut buffer)? {
                Some(batch) => batches.push(batch),
                None => break,
            }
        }

        Ok(batches)
    }

    /// Check that the decoder is not holding a partial message.
    pub fn finish(&mut self) -> Result<()> {
        self.decoder.finish()?;
        Ok(())
    }
}

impl Default for BatchDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BatchDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDecoder")
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

/// Schema carried by `chunk`, if it is a schema message.
///
/// Opaque chunks are inspected too; a body that is not an Arrow message
/// simply carries no schema.
fn chunk_schema(chunk: &IpcChunk) -> Result<Option<SchemaRef>> {
    match chunk.kind {
        ChunkKind::Schema => {
            let message = arrow_ipc::root_as_message(&chunk.body).map_err(|e| {
                CubeError::InvalidIpcFraming {
                    offset: chunk.offset,
                    reason: format!("invalid Arrow message metadata: {e}"),
                }
            })?;
            Ok(message
                .header_as_schema()
                .map(|schema| Arc::new(fb_to_schema(schema))))
        }
        ChunkKind::Other => Ok(arrow_ipc::root_as_message(&chunk.body)
            .ok()
            .and_then(|message| message.header_as_schema())
            .map(|schema| Arc::new(fb_to_schema(schema)))),
        _ => Ok(None),
    }
}

/// Decode a complete, reassembled Arrow IPC stream in one go.
pub fn decode_stream(bytes: &[u8]) -> Result<(Option<SchemaRef>, Vec<RecordBatch>)> {
    let chunks = ChunkIter::new(
        Bytes::copy_from_slice(bytes),
        ChunkLayout::ArrowMessage,
        DEFAULT_MAX_BODY_LENGTH,
    )
    .collect::<Result<Vec<_>>>()?;

    let mut decoder = BatchDecoder::new();
    let batches = decoder.decode_chunks(&chunks)?;
    decoder.finish()?;
    Ok((decoder.schema(), batches))
}
