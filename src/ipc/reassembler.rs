//! Reassembly of per-message chunks into one Arrow IPC stream.
//!
//! The reassembler is a validating pass-through: chunks are appended in
//! arrival order, never reordered or merged. It enforces that the schema
//! section comes first and that nothing follows the end-of-stream marker.

use bytes::{Bytes, BytesMut};

use super::chunk::{ChunkIter, ChunkLayout, IpcChunk, DEFAULT_MAX_BODY_LENGTH};
use crate::error::{CubeError, Result};

/// Which message a payload arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Schema,
    Batch,
}

/// Reassembler settings.
#[derive(Debug, Clone, Copy)]
pub struct ReassemblerConfig {
    /// Chunk layout to expect.
    pub layout: ChunkLayout,
    /// Ceiling for a single chunk body.
    pub max_body_length: u32,
    /// Report `TruncatedIpcStream` when finishing without end-of-stream.
    pub require_end_of_stream: bool,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            layout: ChunkLayout::default(),
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
            require_end_of_stream: true,
        }
    }
}

/// The finished, contiguous Arrow IPC stream for one query.
///
/// `bytes` is every chunk exactly as received. Padding cut short is only
/// accepted on the final chunk, so every other chunk starts 8-byte aligned.
#[derive(Debug, Clone)]
pub struct ReassembledStream {
    /// Concatenated chunk bytes.
    pub bytes: Bytes,
    /// Number of chunks, including the end-of-stream marker.
    pub chunks: usize,
    /// Number of batch sections (QueryResponseBatch messages).
    pub batch_sections: usize,
    /// Whether the end-of-stream marker was seen.
    pub end_of_stream: bool,
}

/// Stateful reassembler for one query's result.
#[derive(Debug)]
pub struct IpcReassembler {
    config: ReassemblerConfig,
    stream: BytesMut,
    chunks: usize,
    schema_seen: bool,
    batch_sections: usize,
    end_of_stream: bool,
    /// The last chunk ended with its padding cut short.
    misaligned: bool,
    /// Bytes consumed so far; offsets in errors are stream-relative.
    stream_offset: usize,
}

impl IpcReassembler {
    /// Create a reassembler with default settings.
    pub fn new() -> Self {
        Self::with_config(ReassemblerConfig::default())
    }

    /// Create a reassembler with custom settings.
    pub fn with_config(config: ReassemblerConfig) -> Self {
        Self {
            config,
            stream: BytesMut::new(),
            chunks: 0,
            schema_seen: false,
            batch_sections: 0,
            end_of_stream: false,
            misaligned: false,
            stream_offset: 0,
        }
    }

    /// Lazily iterate the chunks of one payload with this reassembler's
    /// settings, without recording them.
    pub fn chunks(&self, payload: Bytes) -> ChunkIter {
        ChunkIter::new(payload, self.config.layout, self.config.max_body_length)
    }

    /// Add a `QueryResponseSchema` payload.
    pub fn push_schema(&mut self, payload: Bytes) -> Result<Vec<IpcChunk>> {
        self.push(Section::Schema, payload)
    }

    /// Add a `QueryResponseBatch` payload.
    pub fn push_batch(&mut self, payload: Bytes) -> Result<Vec<IpcChunk>> {
        self.push(Section::Batch, payload)
    }

    /// Validate a payload and append its chunks.
    ///
    /// The payload is validated as a whole before anything is appended, so a
    /// failed push leaves the stream unchanged.
    pub fn push(&mut self, section: Section, payload: Bytes) -> Result<Vec<IpcChunk>> {
        let offset = self.stream_offset;
        if self.end_of_stream {
            return Err(CubeError::InvalidIpcFraming {
                offset,
                reason: "chunk after end-of-stream marker".to_string(),
            });
        }
        match (section, self.schema_seen) {
            (Section::Schema, true) => {
                return Err(CubeError::InvalidIpcFraming {
                    offset,
                    reason: "second schema section".to_string(),
                })
            }
            (Section::Batch, false) => {
                return Err(CubeError::InvalidIpcFraming {
                    offset,
                    reason: "batch section before schema".to_string(),
                })
            }
            _ => {}
        }

        let chunks = self
            .chunks(payload)
            .map(|chunk| {
                chunk.map_err(|err| match err {
                    CubeError::InvalidIpcFraming { offset: at, reason } => {
                        CubeError::InvalidIpcFraming {
                            offset: offset + at,
                            reason,
                        }
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if self.misaligned && !chunks.is_empty() {
            return Err(CubeError::InvalidIpcFraming {
                offset,
                reason: "chunk follows padding cut short by its payload".to_string(),
            });
        }

        for chunk in &chunks {
            chunk.write_to(&mut self.stream);
            self.stream_offset += chunk.as_bytes().len();
            self.end_of_stream |= chunk.is_end_of_stream();
        }
        if let Some(last) = chunks.last() {
            self.misaligned = !last.is_aligned();
        }
        self.chunks += chunks.len();

        match section {
            Section::Schema => self.schema_seen = true,
            Section::Batch => self.batch_sections += 1,
        }

        tracing::trace!(
            ?section,
            chunks = chunks.len(),
            stream_len = self.stream.len(),
            end_of_stream = self.end_of_stream,
            "reassembled payload"
        );

        Ok(chunks)
    }

    /// Whether the end-of-stream marker has been seen.
    pub fn is_complete(&self) -> bool {
        self.end_of_stream
    }

    /// Whether the schema section has been received.
    pub fn has_schema(&self) -> bool {
        self.schema_seen
    }

    /// Chunks appended so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// The stream reassembled so far.
    pub fn stream_bytes(&self) -> &[u8] {
        &self.stream
    }

    /// Close the stream at the `QueryComplete` boundary.
    pub fn finish(self) -> Result<ReassembledStream> {
        if !self.end_of_stream && self.config.require_end_of_stream {
            return Err(CubeError::TruncatedIpcStream {
                chunks: self.chunks,
            });
        }
        Ok(ReassembledStream {
            bytes: self.stream.freeze(),
            chunks: self.chunks,
            batch_sections: self.batch_sections,
            end_of_stream: self.end_of_stream,
        })
    }
}

impl Default for IpcReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::chunk::tests::opaque_chunk;
    use crate::ipc::chunk::{CHUNK_PREFIX_SIZE, END_OF_STREAM};

    fn opaque_reassembler() -> IpcReassembler {
        IpcReassembler::with_config(ReassemblerConfig {
            layout: ChunkLayout::Opaque,
            ..ReassemblerConfig::default()
        })
    }

    #[test]
    fn test_concatenates_in_arrival_order() {
        let mut reassembler = opaque_reassembler();
        let schema = opaque_chunk(b"schema!");
        let batch1 = opaque_chunk(b"first batch");
        let mut batch2 = opaque_chunk(b"second");
        batch2.extend_from_slice(&END_OF_STREAM);

        reassembler.push_schema(Bytes::from(schema.clone())).unwrap();
        reassembler.push_batch(Bytes::from(batch1.clone())).unwrap();
        let chunks = reassembler.push_batch(Bytes::from(batch2.clone())).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(reassembler.is_complete());

        let stream = reassembler.finish().unwrap();
        let expected: Vec<u8> = [schema, batch1, batch2].concat();
        assert_eq!(&stream.bytes[..], &expected[..]);
        assert_eq!(stream.chunks, 4);
        assert_eq!(stream.batch_sections, 2);
        assert_eq!(stream.bytes.len() % 8, 0);
    }

    #[test]
    fn test_missing_end_of_stream_is_truncated() {
        let mut reassembler = opaque_reassembler();
        reassembler
            .push_schema(Bytes::from(opaque_chunk(b"schema")))
            .unwrap();
        reassembler
            .push_batch(Bytes::from(opaque_chunk(b"batch")))
            .unwrap();

        assert!(matches!(
            reassembler.finish(),
            Err(CubeError::TruncatedIpcStream { chunks: 2 })
        ));
    }

    #[test]
    fn test_missing_end_of_stream_tolerated_when_configured() {
        let mut reassembler = IpcReassembler::with_config(ReassemblerConfig {
            layout: ChunkLayout::Opaque,
            require_end_of_stream: false,
            ..ReassemblerConfig::default()
        });
        reassembler
            .push_schema(Bytes::from(opaque_chunk(b"schema")))
            .unwrap();

        let stream = reassembler.finish().unwrap();
        assert!(!stream.end_of_stream);
    }

    #[test]
    fn test_batch_before_schema_rejected() {
        let mut reassembler = opaque_reassembler();
        assert!(matches!(
            reassembler.push_batch(Bytes::from(opaque_chunk(b"batch"))),
            Err(CubeError::InvalidIpcFraming { .. })
        ));
    }

    #[test]
    fn test_chunk_after_end_of_stream_rejected() {
        let mut reassembler = opaque_reassembler();
        let mut schema = opaque_chunk(b"schema");
        schema.extend_from_slice(&END_OF_STREAM);
        reassembler.push_schema(Bytes::from(schema)).unwrap();

        let err = reassembler
            .push_batch(Bytes::from(opaque_chunk(b"late")))
            .unwrap_err();
        assert!(err.to_string().contains("after end-of-stream"));
    }

    #[test]
    fn test_failed_push_leaves_stream_unchanged() {
        let mut reassembler = opaque_reassembler();
        reassembler
            .push_schema(Bytes::from(opaque_chunk(b"schema")))
            .unwrap();
        let before = reassembler.stream_bytes().to_vec();

        let mut bad = opaque_chunk(b"good");
        bad.extend_from_slice(&[0u8; 8]);
        let err = reassembler.push_batch(Bytes::from(bad)).unwrap_err();

        // Offset is relative to the whole stream: 16 (schema) + 16 (first chunk).
        assert!(matches!(err, CubeError::InvalidIpcFraming { offset: 32, .. }));
        assert_eq!(reassembler.stream_bytes(), &before[..]);
        assert_eq!(reassembler.chunk_count(), 1);
    }

    #[test]
    fn test_short_padding_only_on_final_chunk() {
        let mut reassembler = opaque_reassembler();
        let mut schema = opaque_chunk(b"abc");
        schema.truncate(CHUNK_PREFIX_SIZE + 3);
        reassembler.push_schema(Bytes::from(schema.clone())).unwrap();
        assert_eq!(reassembler.stream_bytes(), &schema[..]);

        let err = reassembler
            .push_batch(Bytes::from(opaque_chunk(b"batch")))
            .unwrap_err();
        assert!(matches!(err, CubeError::InvalidIpcFraming { offset: 11, .. }));
        assert_eq!(reassembler.chunk_count(), 1);
    }

    #[test]
    fn test_short_padding_at_stream_end_kept_verbatim() {
        let mut reassembler = IpcReassembler::with_config(ReassemblerConfig {
            layout: ChunkLayout::Opaque,
            require_end_of_stream: false,
            ..ReassemblerConfig::default()
        });
        reassembler
            .push_schema(Bytes::from(opaque_chunk(b"schema")))
            .unwrap();
        let mut batch = opaque_chunk(b"xy");
        batch.truncate(CHUNK_PREFIX_SIZE + 2);
        reassembler.push_batch(Bytes::from(batch)).unwrap();

        let stream = reassembler.finish().unwrap();
        assert_eq!(stream.bytes.len(), 16 + 10);
    }
}
