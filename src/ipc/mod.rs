//! Arrow IPC reassembly.
//!
//! Query results arrive as Arrow IPC encapsulated messages spread over
//! `QueryResponseSchema` and `QueryResponseBatch` payloads. This module:
//! - parses each payload into [`IpcChunk`]s ([`ChunkIter`], lazy)
//! - concatenates them into one valid stream ([`IpcReassembler`])
//! - decodes the stream into record batches ([`BatchDecoder`])
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use cube_native_client::ipc::{ChunkIter, ChunkLayout, END_OF_STREAM};
//!
//! let chunks: Vec<_> = ChunkIter::new(Bytes::from_static(&END_OF_STREAM), ChunkLayout::Opaque, 1024)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert!(chunks[0].is_end_of_stream());
//! ```

mod chunk;
mod decoder;
mod reassembler;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk::{
    align, ChunkIter, ChunkKind, ChunkLayout, IpcChunk, ALIGNMENT, CHUNK_PREFIX_SIZE,
    CONTINUATION_MARKER, DEFAULT_MAX_BODY_LENGTH, END_OF_STREAM,
};
pub use decoder::{decode_stream, BatchDecoder};
pub use reassembler::{IpcReassembler, ReassembledStream, ReassemblerConfig, Section};
