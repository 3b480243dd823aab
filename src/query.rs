//! Streaming query results.

use std::collections::VecDeque;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;

use crate::client::Client;
use crate::codec::Message;
use crate::error::{CubeError, Result};
use crate::ipc::{BatchDecoder, IpcReassembler, ReassembledStream, ReassemblerConfig};

/// Lazily pulled result of one query.
///
/// Holds the client exclusively until dropped. Dropping it early is fine:
/// the remaining frames are drained before the client's next request.
#[derive(Debug)]
pub struct QueryStream<'a> {
    client: &'a mut Client,
    reassembler: Option<IpcReassembler>,
    reassembled: Option<ReassembledStream>,
    decoder: BatchDecoder,
    schema: SchemaRef,
    buffered: VecDeque<RecordBatch>,
    batches: usize,
    rows_affected: Option<u64>,
    done: bool,
}

impl<'a> QueryStream<'a> {
    /// Build the stream from the already observed schema message.
    pub(crate) fn start(
        client: &'a mut Client,
        config: ReassemblerConfig,
        schema_message: Message,
    ) -> Result<Self> {
        let payload = ipc_payload(schema_message);
        let mut reassembler = IpcReassembler::with_config(config);
        let mut decoder = BatchDecoder::new();

        let decoded = reassembler
            .push_schema(payload)
            .and_then(|chunks| decoder.decode_chunks(&chunks));
        let buffered = match decoded {
            Ok(batches) => VecDeque::from(batches),
            Err(err) => return Err(client_error(client, err)),
        };

        let Some(schema) = decoder.schema() else {
            let err = CubeError::InvalidIpcFraming {
                offset: 0,
                reason: "schema section carries no schema message".to_string(),
            };
            return Err(client_error(client, err));
        };

        tracing::debug!(fields = schema.fields().len(), "schema received");

        Ok(Self {
            client,
            reassembler: Some(reassembler),
            reassembled: None,
            decoder,
            schema,
            batches: buffered.len(),
            buffered,
            rows_affected: None,
            done: false,
        })
    }

    /// Result schema.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Rows reported by `QueryComplete`; `None` until the stream ends.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// The reassembled Arrow IPC stream, once the query completed.
    pub fn ipc_stream(&self) -> Option<&ReassembledStream> {
        self.reassembled.as_ref()
    }

    /// Next record batch, or `None` once the query completed.
    ///
    /// After an error the stream is finished; later calls return `None`.
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        loop {
            if let Some(batch) = self.buffered.pop_front() {
                return Ok(Some(batch));
            }
            if self.done {
                return Ok(None);
            }

            if let Err(err) = self.advance().await {
                self.done = true;
                return Err(err);
            }
        }
    }

    /// Pull every remaining batch.
    pub async fn collect(mut self) -> Result<QueryResult> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }

        Ok(QueryResult {
            schema: self.schema.clone(),
            batches,
            rows_affected: self.rows_affected.unwrap_or_default(),
            ipc_bytes: self
                .reassembled
                .take()
                .map(|stream| stream.bytes)
                .unwrap_or_default(),
        })
    }

    /// Read one frame and fold it into the stream.
    async fn advance(&mut self) -> Result<()> {
        let message = self.client.receive().await?;
        self.client.observe(&message).await?;

        match message {
            Message::QueryComplete { rows_affected } => {
                self.done = true;
                self.rows_affected = Some(rows_affected);
                self.finish()?;

                tracing::debug!(rows_affected, batches = self.batches, "query complete");
            }
            other => {
                let Some(reassembler) = self.reassembler.as_mut() else {
                    return Ok(());
                };
                let chunks = reassembler.push_batch(ipc_payload(other))?;
                let batches = self.decoder.decode_chunks(&chunks)?;
                self.batches += batches.len();
                self.buffered.extend(batches);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(reassembler) = self.reassembler.take() {
            let stream = reassembler.finish()?;
            tracing::trace!(
                chunks = stream.chunks,
                sections = stream.batch_sections,
                bytes = stream.bytes.len(),
                "result stream reassembled"
            );
            self.reassembled = Some(stream);
        }
        self.decoder.finish()
    }
}

/// A fully collected query result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub rows_affected: u64,
    /// The complete Arrow IPC stream the batches were decoded from.
    pub ipc_bytes: Bytes,
}

impl QueryResult {
    /// Total rows across all batches.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

fn ipc_payload(message: Message) -> Bytes {
    match message {
        Message::QueryResponseSchema { arrow_ipc_bytes }
        | Message::QueryResponseBatch { arrow_ipc_bytes } => arrow_ipc_bytes,
        _ => Bytes::new(),
    }
}

/// A result that cannot be decoded leaves the frames in order; the session
/// stays in `Streaming` and the rest is drained on the next request.
fn client_error(client: &mut Client, err: CubeError) -> CubeError {
    if err.is_fatal() {
        client.fail(err.to_string());
    }
    err
}
